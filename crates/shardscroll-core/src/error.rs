//! Error types for scroll operations.
//!
//! Two tiers: `ScrollError` is returned from coordinator calls and means the
//! call itself failed. `ShardFailure` describes one shard missing from a page
//! and is carried as data, never raised.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CursorId;

/// Result type for scroll operations.
pub type ScrollResult<T> = Result<T, ScrollError>;

/// Call-level scroll errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrollError {
    #[error("no such index [{0}]")]
    IndexNotFound(String),

    #[error("no search context found for scroll cursor [{0}]")]
    CursorNotFound(CursorId),

    #[error("scroll cursor [{0}] is busy with another request")]
    CursorBusy(CursorId),

    #[error("invalid scroll request: {0}")]
    InvalidRequest(String),

    #[error("trying to create too many scroll contexts, limit is {limit}")]
    TooManyScrollContexts { limit: usize },

    /// The serving side failed; nothing was wrong with the request.
    #[error("internal scroll error: {0}")]
    Internal(String),
}

impl ScrollError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrollError::CursorBusy(_))
    }
}

/// Per-shard failure, recorded in a page instead of failing the call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardFailure {
    #[error("node unreachable")]
    Unreachable,

    #[error("shard request timed out")]
    Timeout,

    #[error("shard rejected request: {0}")]
    Rejected(String),
}
