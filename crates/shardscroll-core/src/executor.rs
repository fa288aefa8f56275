//! The shard executor collaborator.
//!
//! A `ShardQueryExecutor` runs one request against one shard on one node.
//! Storage internals stay behind this trait; the coordinator only ever sees
//! hits, handles and `ShardFailure` values.

use async_trait::async_trait;

use crate::error::ShardFailure;
use crate::types::{InitialShardRequest, NodeId, ReleaseShardRequest, ResumeShardRequest, ShardPage};

/// Executes scroll requests against a single shard.
///
/// Implementations must not retry; a failed call is reported once and the
/// coordinator decides what it means for the cursor.
#[async_trait]
pub trait ShardQueryExecutor: Send + Sync {
    /// Run the initial query on `request.shard`, hosted on `node`.
    async fn execute_initial(
        &self,
        node: &NodeId,
        request: InitialShardRequest,
    ) -> Result<ShardPage, ShardFailure>;

    /// Continue from `request.handle`. The handle is consumed; the returned
    /// page carries its replacement.
    async fn execute_resume(
        &self,
        node: &NodeId,
        request: ResumeShardRequest,
    ) -> Result<ShardPage, ShardFailure>;

    /// Free the resource behind a handle. Returns whether anything was freed.
    async fn release(&self, node: &NodeId, request: ReleaseShardRequest)
        -> Result<bool, ShardFailure>;
}
