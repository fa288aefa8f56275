//! In-process cluster.
//!
//! `InProcessCluster` hosts several `LocalShardNode`s in one process and
//! plays both collaborator roles for a coordinator: it is the topology
//! (which node holds which shard, and whether that node is up) and the
//! executor (running shard requests on the owning node). Nodes can be
//! stopped and restarted to exercise failure handling.

use crate::hashing::ShardRouter;
use crate::shard::LocalShardNode;
use crate::types::*;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

struct ClusterNode {
    running: AtomicBool,
    engine: Arc<RwLock<LocalShardNode>>,
}

struct IndexPlacement {
    shards: BTreeMap<ShardId, NodeId>,
    router: ShardRouter,
}

/// Several shard nodes sharing one process.
///
/// Shards are placed round-robin over the nodes in id order, so with at
/// least as many nodes as shards each node holds one shard of an index.
///
/// # Example
///
/// ```rust,ignore
/// let cluster = Arc::new(InProcessCluster::with_nodes(["node-0", "node-1"]));
/// cluster.create_index("logs", 2).await?;
/// cluster.index_document("logs", "doc-1", r#"{"level":"warn"}"#).await?;
///
/// let coordinator = ScrollCoordinator::new(ScrollConfig::default(), cluster.clone(), cluster.clone());
/// cluster.stop_node(&NodeId::new("node-1")).await?;
/// ```
pub struct InProcessCluster {
    nodes: RwLock<BTreeMap<NodeId, ClusterNode>>,
    indices: RwLock<HashMap<String, IndexPlacement>>,
}

impl InProcessCluster {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            indices: RwLock::new(HashMap::new()),
        }
    }

    /// Create a cluster with the given running nodes.
    pub fn with_nodes<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes = ids
            .into_iter()
            .map(|id| {
                let id = NodeId::new(id);
                (id.clone(), Self::node(id))
            })
            .collect();
        Self {
            nodes: RwLock::new(nodes),
            indices: RwLock::new(HashMap::new()),
        }
    }

    fn node(id: NodeId) -> ClusterNode {
        ClusterNode {
            running: AtomicBool::new(true),
            engine: Arc::new(RwLock::new(LocalShardNode::new(id))),
        }
    }

    /// Add a running node. Existing indices are not rebalanced onto it.
    pub async fn add_node(&self, id: impl Into<String>) -> ClusterResult<()> {
        let id = NodeId::new(id);
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&id) {
            return Err(ClusterError::NodeExists(id));
        }
        debug!("Added node {}", id);
        nodes.insert(id.clone(), Self::node(id));
        Ok(())
    }

    pub async fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.read().await.keys().cloned().collect()
    }

    /// Create an index with `num_shards` shards placed round-robin.
    pub async fn create_index(&self, index: &str, num_shards: u32) -> ClusterResult<()> {
        let nodes = self.nodes.read().await;
        if nodes.is_empty() {
            return Err(ClusterError::NoNodes);
        }
        let mut indices = self.indices.write().await;
        if indices.contains_key(index) {
            return Err(ClusterError::IndexExists(index.to_string()));
        }

        let ids: Vec<&NodeId> = nodes.keys().collect();
        let mut shards = BTreeMap::new();
        for shard in (0..num_shards).map(ShardId::new) {
            let id = ids[shard.0 as usize % ids.len()];
            if let Some(node) = nodes.get(id) {
                node.engine.write().await.create_shard(index, shard);
            }
            shards.insert(shard, id.clone());
        }

        info!("Created index [{}] with {} shards", index, num_shards);
        let router = ShardRouter::new(shards.keys().copied());
        indices.insert(index.to_string(), IndexPlacement { shards, router });
        Ok(())
    }

    /// Index a document on the shard its id hashes to.
    ///
    /// Indexing goes straight to the node's storage and works even while the
    /// node is stopped.
    pub async fn index_document(
        &self,
        index: &str,
        doc_id: &str,
        source: &str,
    ) -> ClusterResult<ShardId> {
        let shard = {
            let indices = self.indices.read().await;
            let placement = indices
                .get(index)
                .ok_or_else(|| ClusterError::IndexNotFound(index.to_string()))?;
            placement
                .router
                .route(doc_id)
                .ok_or_else(|| ClusterError::NoShards(index.to_string()))?
        };
        self.index_document_on(index, shard, doc_id, source, 1.0)
            .await?;
        Ok(shard)
    }

    /// Index a scored document on a specific shard.
    pub async fn index_document_on(
        &self,
        index: &str,
        shard: ShardId,
        doc_id: &str,
        source: &str,
        score: f64,
    ) -> ClusterResult<()> {
        let engine = self.engine_for(index, shard).await?;
        let mut engine = engine.write().await;
        engine.index_scored_document(index, shard, doc_id, source, score)
    }

    /// Stop a node. Its search contexts are lost, as on a crash.
    ///
    /// # Returns
    ///
    /// The number of search contexts dropped.
    pub async fn stop_node(&self, id: &NodeId) -> ClusterResult<usize> {
        let nodes = self.nodes.read().await;
        let node = nodes
            .get(id)
            .ok_or_else(|| ClusterError::NodeNotFound(id.clone()))?;
        node.running.store(false, Ordering::SeqCst);
        let dropped = node.engine.write().await.drop_contexts();
        info!("Stopped node {} ({} contexts dropped)", id, dropped);
        Ok(dropped)
    }

    /// Bring a stopped node back. Its documents survive; contexts do not.
    pub async fn restart_node(&self, id: &NodeId) -> ClusterResult<()> {
        let nodes = self.nodes.read().await;
        let node = nodes
            .get(id)
            .ok_or_else(|| ClusterError::NodeNotFound(id.clone()))?;
        node.running.store(true, Ordering::SeqCst);
        info!("Restarted node {}", id);
        Ok(())
    }

    pub async fn is_running(&self, id: &NodeId) -> bool {
        self.nodes
            .read()
            .await
            .get(id)
            .is_some_and(|node| node.running.load(Ordering::SeqCst))
    }

    /// Node assigned to a shard, whether or not it is running.
    pub async fn assigned_node(&self, index: &str, shard: ShardId) -> Option<NodeId> {
        self.indices
            .read()
            .await
            .get(index)
            .and_then(|placement| placement.shards.get(&shard).cloned())
    }

    /// Documents stored for a shard.
    pub async fn shard_document_count(&self, index: &str, shard: ShardId) -> usize {
        match self.engine_for(index, shard).await {
            Ok(engine) => engine.read().await.document_count(index, shard),
            Err(_) => 0,
        }
    }

    /// Documents stored across all shards of an index.
    pub async fn document_count(&self, index: &str) -> usize {
        let shards: Vec<ShardId> = match self.indices.read().await.get(index) {
            Some(placement) => placement.shards.keys().copied().collect(),
            None => return 0,
        };
        let mut total = 0;
        for shard in shards {
            total += self.shard_document_count(index, shard).await;
        }
        total
    }

    /// Search contexts open across all nodes.
    pub async fn open_contexts(&self) -> usize {
        let nodes = self.nodes.read().await;
        let mut total = 0;
        for node in nodes.values() {
            total += node.engine.read().await.open_contexts();
        }
        total
    }

    /// Drop expired search contexts on every node, returning how many went.
    pub async fn reap_expired_contexts(&self) -> usize {
        let nodes = self.nodes.read().await;
        let mut total = 0;
        for node in nodes.values() {
            total += node.engine.write().await.reap_expired_contexts();
        }
        total
    }

    async fn engine_for(
        &self,
        index: &str,
        shard: ShardId,
    ) -> ClusterResult<Arc<RwLock<LocalShardNode>>> {
        let node_id = self
            .assigned_node(index, shard)
            .await
            .ok_or_else(|| ClusterError::ShardNotFound {
                index: index.to_string(),
                shard,
            })?;
        self.nodes
            .read()
            .await
            .get(&node_id)
            .map(|node| Arc::clone(&node.engine))
            .ok_or(ClusterError::NodeNotFound(node_id))
    }

    /// Engine of a running node, or `Unreachable`.
    async fn running_engine(&self, id: &NodeId) -> Result<Arc<RwLock<LocalShardNode>>, ShardFailure> {
        let nodes = self.nodes.read().await;
        match nodes.get(id) {
            Some(node) if node.running.load(Ordering::SeqCst) => Ok(Arc::clone(&node.engine)),
            _ => Err(ShardFailure::Unreachable),
        }
    }
}

impl Default for InProcessCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterTopology for InProcessCluster {
    async fn current_shards(&self, index: &str) -> Option<Vec<ShardId>> {
        self.indices
            .read()
            .await
            .get(index)
            .map(|placement| placement.shards.keys().copied().collect())
    }

    async fn node_for(&self, index: &str, shard: ShardId) -> Option<NodeId> {
        let node = self.assigned_node(index, shard).await?;
        self.is_running(&node).await.then_some(node)
    }
}

#[async_trait]
impl ShardQueryExecutor for InProcessCluster {
    async fn execute_initial(
        &self,
        node: &NodeId,
        request: InitialShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        let engine = self.running_engine(node).await?;
        let mut engine = engine.write().await;
        engine.execute_initial(&request)
    }

    async fn execute_resume(
        &self,
        node: &NodeId,
        request: ResumeShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        let engine = self.running_engine(node).await?;
        let mut engine = engine.write().await;
        engine.execute_resume(&request)
    }

    async fn release(
        &self,
        node: &NodeId,
        request: ReleaseShardRequest,
    ) -> Result<bool, ShardFailure> {
        let engine = self.running_engine(node).await?;
        let mut engine = engine.write().await;
        Ok(engine.release(&request))
    }
}
