//! # Shardscroll Core
//!
//! Core types and collaborator traits for scroll-based pagination over a
//! sharded index.
//!
//! This crate defines the vocabulary shared by every other crate in the
//! workspace:
//!
//! - **Identifiers**: shards, nodes and scroll cursors
//! - **Hits and pages**: what a scroll returns, including the
//!   successful/failed shard accounting
//! - **Queries**: plain query data handed to shard executors
//! - **Collaborators**: the `ShardQueryExecutor` and `ClusterTopology`
//!   traits through which the coordinator reaches storage and topology
//!
//! ## Quick Start
//!
//! ```rust
//! use shardscroll_core::prelude::*;
//!
//! let query = Query::term("color", FieldValue::text("red"));
//! let shard = ShardId::new(0);
//! assert_eq!(shard.to_string(), "shard-0");
//! assert!(query.matches(&serde_json::json!({ "color": "red" })));
//! ```

pub mod error;
pub mod executor;
pub mod prelude;
pub mod query;
pub mod topology;
pub mod types;
