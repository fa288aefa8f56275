//! Shard location.
//!
//! The locator turns an index name into its shard set and each shard into
//! a node, answering from the topology at the moment of the call.

use crate::types::*;
use std::sync::Arc;
use tracing::debug;

/// Where a shard can currently be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardLocation {
    Node(NodeId),
    /// The topology knows the shard but no live node hosts it.
    Unavailable,
}

impl ShardLocation {
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            ShardLocation::Node(node) => Some(node),
            ShardLocation::Unavailable => None,
        }
    }
}

/// Resolves shards of an index and the nodes hosting them.
#[derive(Clone)]
pub struct ShardLocator {
    topology: Arc<dyn ClusterTopology>,
}

impl ShardLocator {
    pub fn new(topology: Arc<dyn ClusterTopology>) -> Self {
        Self { topology }
    }

    /// All shards of `index`, sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// `IndexNotFound` when the topology does not know the index.
    pub async fn resolve(&self, index: &str) -> ScrollResult<Vec<ShardId>> {
        let mut shards = self
            .topology
            .current_shards(index)
            .await
            .ok_or_else(|| ScrollError::IndexNotFound(index.to_string()))?;
        shards.sort();
        shards.dedup();
        debug!("Index [{}] resolved to {} shards", index, shards.len());
        Ok(shards)
    }

    /// Current location of one shard.
    pub async fn locate(&self, index: &str, shard: ShardId) -> ShardLocation {
        match self.topology.node_for(index, shard).await {
            Some(node) => ShardLocation::Node(node),
            None => ShardLocation::Unavailable,
        }
    }

    /// Locate several shards, preserving input order.
    pub async fn locate_all(
        &self,
        index: &str,
        shards: &[ShardId],
    ) -> Vec<(ShardId, ShardLocation)> {
        let mut located = Vec::with_capacity(shards.len());
        for &shard in shards {
            located.push((shard, self.locate(index, shard).await));
        }
        located
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedTopology;

    #[async_trait]
    impl ClusterTopology for FixedTopology {
        async fn current_shards(&self, index: &str) -> Option<Vec<ShardId>> {
            (index == "logs").then(|| vec![ShardId::new(2), ShardId::new(0), ShardId::new(2)])
        }

        async fn node_for(&self, _index: &str, shard: ShardId) -> Option<NodeId> {
            (shard.0 == 0).then(|| NodeId::new("node-a"))
        }
    }

    fn locator() -> ShardLocator {
        ShardLocator::new(Arc::new(FixedTopology))
    }

    #[tokio::test]
    async fn test_resolve_sorts_and_dedups() {
        let shards = locator().resolve("logs").await.unwrap();
        assert_eq!(shards, vec![ShardId::new(0), ShardId::new(2)]);
    }

    #[tokio::test]
    async fn test_resolve_unknown_index() {
        let err = locator().resolve("metrics").await.unwrap_err();
        assert_eq!(err, ScrollError::IndexNotFound("metrics".to_string()));
    }

    #[tokio::test]
    async fn test_locate_all() {
        let located = locator()
            .locate_all("logs", &[ShardId::new(0), ShardId::new(2)])
            .await;
        assert_eq!(
            located[0],
            (ShardId::new(0), ShardLocation::Node(NodeId::new("node-a")))
        );
        assert_eq!(located[1], (ShardId::new(2), ShardLocation::Unavailable));
        assert!(located[1].1.node().is_none());
    }
}
