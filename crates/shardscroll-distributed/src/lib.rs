//! # Shardscroll Distributed
//!
//! Scroll coordination over a sharded index: consistent pages across many
//! calls while shard nodes fail underneath, with the pages degrading
//! instead of the scroll failing.
//!
//! The coordinator is transport-agnostic. `InProcessCluster` runs every
//! node in the current process (tests, demos); `rpc` puts nodes and the
//! coordinator behind tarpc.

pub mod cluster;
pub mod coordinator;
pub mod gather;
pub mod hashing;
pub mod locator;
pub mod merge;
pub mod rpc;
pub mod shard;
pub mod topology;
pub mod types;

pub use cluster::InProcessCluster;
pub use coordinator::{
    CheckoutError, CursorLease, DeleteOutcome, DetachedHandles, ScrollContextStore,
    ScrollCoordinator, ScrollCursor, ShardState, StoreFull,
};
pub use gather::{ScatterGatherRunner, ShardOutcome};
pub use hashing::ShardRouter;
pub use locator::{ShardLocation, ShardLocator};
pub use merge::{compare_hits, ResultMerger};
pub use shard::{ContextRegistry, ContextStats, LocalShardNode, NodeHealth, SearchContext};
pub use topology::{ClusterLayout, IndexLayout, NodeAddress, StaticTopology};
pub use types::*;

/// Common imports for driving scrolls.
pub mod prelude {
    pub use crate::cluster::InProcessCluster;
    pub use crate::coordinator::ScrollCoordinator;
    pub use crate::topology::{ClusterLayout, StaticTopology};
    pub use crate::types::*;
}
