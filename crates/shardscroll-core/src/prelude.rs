//! Shardscroll Core Prelude: convenient imports for common usage.
//!
//! ```rust
//! use shardscroll_core::prelude::*;
//! ```

pub use crate::types::{
    CursorId, Hit, InitialShardRequest, DEFAULT_SHARD_KEEP_ALIVE, NodeId, Page, ReleaseShardRequest, ResumeShardRequest,
    ShardContinuationHandle, ShardFailureInfo, ShardId, ShardPage,
};

pub use crate::query::{FieldValue, Query};

pub use crate::executor::ShardQueryExecutor;
pub use crate::topology::ClusterTopology;

pub use crate::error::{ScrollError, ScrollResult, ShardFailure};
