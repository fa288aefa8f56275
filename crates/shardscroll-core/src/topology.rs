//! Cluster topology collaborator.

use async_trait::async_trait;

use crate::types::{NodeId, ShardId};

/// Read-only view of where shards live.
///
/// Membership, liveness detection and allocation are owned elsewhere; this
/// trait only reports the current answer.
#[async_trait]
pub trait ClusterTopology: Send + Sync {
    /// Shards of `index`, or `None` if the index does not exist.
    async fn current_shards(&self, index: &str) -> Option<Vec<ShardId>>;

    /// Node currently hosting the shard, or `None` if it is unreachable.
    async fn node_for(&self, index: &str, shard: ShardId) -> Option<NodeId>;
}
