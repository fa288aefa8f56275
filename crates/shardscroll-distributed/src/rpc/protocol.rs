//! tarpc service trait definitions.
//!
//! Two services: `ShardService`, exposed by every shard node, and
//! `ScrollService`, exposed by the coordinator to scroll clients.

use crate::shard::NodeHealth;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Result type for RPC operations that needs to be serializable.
pub type RpcResult<T> = Result<T, RpcError>;

/// Serializable mirror of `ScrollError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcError {
    IndexNotFound(String),
    CursorNotFound(CursorId),
    CursorBusy(CursorId),
    InvalidRequest(String),
    TooManyScrollContexts(usize),
    /// Internal error.
    Internal(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::IndexNotFound(index) => write!(f, "no such index [{}]", index),
            RpcError::CursorNotFound(id) => {
                write!(f, "no search context found for scroll cursor [{}]", id)
            }
            RpcError::CursorBusy(id) => write!(f, "scroll cursor [{}] is busy", id),
            RpcError::InvalidRequest(msg) => write!(f, "invalid scroll request: {}", msg),
            RpcError::TooManyScrollContexts(limit) => {
                write!(f, "too many scroll contexts, limit is {}", limit)
            }
            RpcError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<ScrollError> for RpcError {
    fn from(err: ScrollError) -> Self {
        match err {
            ScrollError::IndexNotFound(index) => RpcError::IndexNotFound(index),
            ScrollError::CursorNotFound(id) => RpcError::CursorNotFound(id),
            ScrollError::CursorBusy(id) => RpcError::CursorBusy(id),
            ScrollError::InvalidRequest(msg) => RpcError::InvalidRequest(msg),
            ScrollError::TooManyScrollContexts { limit } => RpcError::TooManyScrollContexts(limit),
            ScrollError::Internal(msg) => RpcError::Internal(msg),
        }
    }
}

impl From<RpcError> for ScrollError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::IndexNotFound(index) => ScrollError::IndexNotFound(index),
            RpcError::CursorNotFound(id) => ScrollError::CursorNotFound(id),
            RpcError::CursorBusy(id) => ScrollError::CursorBusy(id),
            RpcError::InvalidRequest(msg) => ScrollError::InvalidRequest(msg),
            RpcError::Internal(msg) => ScrollError::Internal(msg),
            RpcError::TooManyScrollContexts(limit) => ScrollError::TooManyScrollContexts { limit },
        }
    }
}

/// Service provided by each shard node.
///
/// Shard-level failures come back as `ShardFailure` values so the
/// coordinator can record them on the cursor unchanged.
#[tarpc::service]
pub trait ShardService {
    /// Run a query on one shard and open a search context over the matches.
    async fn execute_initial(request: InitialShardRequest) -> Result<ShardPage, ShardFailure>;

    /// Read the next batch from a search context. The handle in the request
    /// is consumed and replaced by the one in the returned page.
    async fn execute_resume(request: ResumeShardRequest) -> Result<ShardPage, ShardFailure>;

    /// Free a search context. Returns whether it existed.
    async fn release_context(request: ReleaseShardRequest) -> bool;

    /// Health check.
    async fn health_check() -> NodeHealth;
}

/// Service provided by the scroll coordinator.
#[tarpc::service]
pub trait ScrollService {
    /// Open a scroll and return its first page.
    async fn open_scroll(request: OpenScrollRequest) -> RpcResult<Page>;

    /// Fetch the next page. A page without a cursor id is the last one.
    async fn continue_scroll(request: ContinueScrollRequest) -> RpcResult<Page>;

    /// Clear one scroll; unknown cursors are acknowledged with nothing freed.
    async fn clear_scroll(cursor_id: CursorId) -> ClearScrollResponse;

    /// Clear every open scroll.
    async fn clear_all_scrolls() -> ClearScrollResponse;
}
