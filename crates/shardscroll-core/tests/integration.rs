//! Public API tests: collaborator traits as trait objects, page accounting
//! and the JSON shape of pages.

use async_trait::async_trait;
use shardscroll_core::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Single-node executor that serves every shard from a fixed hit list and
/// never opens a context.
struct FixedShards {
    hits: HashMap<ShardId, Vec<Hit>>,
}

#[async_trait]
impl ShardQueryExecutor for FixedShards {
    async fn execute_initial(
        &self,
        _node: &NodeId,
        request: InitialShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        let hits = self
            .hits
            .get(&request.shard)
            .ok_or_else(|| ShardFailure::Rejected(format!("unknown {}", request.shard)))?;
        Ok(ShardPage {
            hits: hits.iter().take(request.page_size).cloned().collect(),
            handle: ShardContinuationHandle::from_context(0),
            has_more: hits.len() > request.page_size,
        })
    }

    async fn execute_resume(
        &self,
        _node: &NodeId,
        _request: ResumeShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        Err(ShardFailure::Rejected("contexts are not kept".into()))
    }

    async fn release(
        &self,
        _node: &NodeId,
        _request: ReleaseShardRequest,
    ) -> Result<bool, ShardFailure> {
        Ok(false)
    }
}

struct OneNode;

#[async_trait]
impl ClusterTopology for OneNode {
    async fn current_shards(&self, index: &str) -> Option<Vec<ShardId>> {
        (index == "logs").then(|| vec![ShardId::new(0), ShardId::new(1)])
    }

    async fn node_for(&self, _index: &str, _shard: ShardId) -> Option<NodeId> {
        Some(NodeId::new("node-0"))
    }
}

#[tokio::test]
async fn test_collaborators_as_trait_objects() {
    let mut hits = HashMap::new();
    hits.insert(
        ShardId::new(0),
        (0..3)
            .map(|i| Hit::new(ShardId::new(0), format!("doc-{i}"), 1.0, "{}"))
            .collect(),
    );
    let executor: Arc<dyn ShardQueryExecutor> = Arc::new(FixedShards { hits });
    let topology: Arc<dyn ClusterTopology> = Arc::new(OneNode);

    let shards = topology.current_shards("logs").await.unwrap();
    assert_eq!(shards.len(), 2);
    assert!(topology.current_shards("metrics").await.is_none());

    let node = topology.node_for("logs", shards[0]).await.unwrap();
    let page = executor
        .execute_initial(
            &node,
            InitialShardRequest {
                index: "logs".into(),
                shard: shards[0],
                query: Query::MatchAll,
                page_size: 2,
                keep_alive: DEFAULT_SHARD_KEEP_ALIVE,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.hits.len(), 2);
    assert!(page.has_more);

    let err = executor
        .execute_initial(
            &node,
            InitialShardRequest {
                index: "logs".into(),
                shard: shards[1],
                query: Query::MatchAll,
                page_size: 2,
                keep_alive: DEFAULT_SHARD_KEEP_ALIVE,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, ShardFailure::Rejected("unknown shard-1".into()));
}

#[test]
fn test_degraded_page_json_shape() {
    let page = Page {
        hits: vec![Hit::new(ShardId::new(0), "doc-1", 2.5, r#"{"a":1}"#)],
        total_shards: 2,
        successful_shards: 1,
        failed_shards: 1,
        shard_failures: vec![ShardFailureInfo {
            shard_id: ShardId::new(1),
            node: Some(NodeId::new("node-1")),
            failure: ShardFailure::Timeout,
        }],
        cursor_id: Some(CursorId::new()),
    };
    assert!(page.is_degraded());
    assert!(!page.is_exhausted());

    let json = serde_json::to_value(&page).unwrap();
    assert_eq!(json["successful_shards"], 1);
    assert_eq!(json["shard_failures"][0]["failure"], "Timeout");
    assert_eq!(json["hits"][0]["source"], r#"{"a":1}"#);

    let back: Page = serde_json::from_value(json).unwrap();
    assert_eq!(back, page);
}

#[test]
fn test_busy_is_the_only_retryable_error() {
    let id = CursorId::new();
    assert!(ScrollError::CursorBusy(id).is_retryable());
    assert!(!ScrollError::CursorNotFound(id).is_retryable());
    assert!(!ScrollError::TooManyScrollContexts { limit: 1 }.is_retryable());
}
