//! Shared types used across all shardscroll crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ShardFailure;
use crate::query::Query;

/// Identifier of a shard within an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ShardId(pub u32);

impl ShardId {
    /// Create a new shard identifier.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the underlying shard number.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Identifier of a node hosting shards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token identifying one scroll cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorId(pub Uuid);

impl CursorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CursorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for CursorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A single search hit returned by a shard.
///
/// The `source` is the raw JSON document exactly as the shard produced it;
/// nothing between the shard and the caller inspects or rewrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// The shard that produced this hit.
    pub shard_id: ShardId,
    /// Document identifier within the index.
    pub doc_id: String,
    /// Relevance score (higher is better).
    pub score: f64,
    /// Raw JSON source document.
    pub source: String,
    /// Arrival order within the hit's shard, assigned by the coordinator.
    #[serde(default)]
    pub sequence: u64,
}

impl Hit {
    pub fn new(
        shard_id: ShardId,
        doc_id: impl Into<String>,
        score: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            shard_id,
            doc_id: doc_id.into(),
            score,
            source: source.into(),
            sequence: 0,
        }
    }

    /// Parse the source document.
    pub fn source_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.source)
    }
}

/// Why a shard did not take part in a page, and where it was expected to live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardFailureInfo {
    pub shard_id: ShardId,
    /// Node the shard was located on, if the locator knew one.
    pub node: Option<NodeId>,
    pub failure: ShardFailure,
}

/// One page of scroll results.
///
/// `successful_shards + failed_shards == total_shards` holds for every page.
/// An empty `hits` vector is the terminal page; it never carries a cursor id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub hits: Vec<Hit>,
    pub total_shards: u32,
    pub successful_shards: u32,
    pub failed_shards: u32,
    pub shard_failures: Vec<ShardFailureInfo>,
    /// Cursor to continue from, absent once the scroll is exhausted.
    pub cursor_id: Option<CursorId>,
}

impl Page {
    /// Whether this is the terminal page of the scroll.
    pub fn is_exhausted(&self) -> bool {
        self.hits.is_empty()
    }

    /// Whether at least one shard failed to participate.
    pub fn is_degraded(&self) -> bool {
        self.successful_shards < self.total_shards
    }
}

/// Opaque resume position on one shard.
///
/// Only the shard executor that issued a handle knows what it refers to.
/// The coordinator stores it, hands it back on resume, and releases it when
/// the owning cursor goes away.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardContinuationHandle {
    context_id: u64,
}

impl ShardContinuationHandle {
    pub fn from_context(context_id: u64) -> Self {
        Self { context_id }
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }
}

/// Hits returned by one shard for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardPage {
    pub hits: Vec<Hit>,
    pub handle: ShardContinuationHandle,
    pub has_more: bool,
}

/// How long a shard keeps an unused search context alive when the request
/// does not come from a scroll with its own keep-alive.
pub const DEFAULT_SHARD_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// First request sent to a shard when a scroll is opened.
///
/// `keep_alive` bounds how long the shard holds the search context it opens
/// if nobody resumes or releases it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialShardRequest {
    pub index: String,
    pub shard: ShardId,
    pub query: Query,
    pub page_size: usize,
    pub keep_alive: Duration,
}

/// Request to continue from a previously issued handle. The shard context
/// behind the new handle lives for another `keep_alive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeShardRequest {
    pub index: String,
    pub shard: ShardId,
    pub handle: ShardContinuationHandle,
    pub page_size: usize,
    pub keep_alive: Duration,
}

/// Request to free the shard-side resource behind a handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseShardRequest {
    pub index: String,
    pub shard: ShardId,
    pub handle: ShardContinuationHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_id() {
        let shard = ShardId::new(42);
        assert_eq!(shard.as_u32(), 42);
        assert_eq!(format!("{}", shard), "shard-42");
        assert!(ShardId::new(1) < ShardId::new(2));
    }

    #[test]
    fn test_node_id_display() {
        let node = NodeId::new("node-a");
        assert_eq!(node.as_str(), "node-a");
        assert_eq!(node.to_string(), "node-a");
    }

    #[test]
    fn test_cursor_id_parse() {
        let id = CursorId::new();
        let parsed: CursorId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-cursor".parse::<CursorId>().is_err());
    }

    #[test]
    fn test_cursor_ids_unique() {
        assert_ne!(CursorId::new(), CursorId::new());
    }

    #[test]
    fn test_hit_source_json() {
        let hit = Hit::new(ShardId::new(0), "doc-1", 1.0, r#"{"field":7}"#);
        let source = hit.source_json().unwrap();
        assert_eq!(source["field"], 7);
        assert_eq!(hit.sequence, 0);
    }

    #[test]
    fn test_page_flags() {
        let page = Page {
            hits: vec![],
            total_shards: 2,
            successful_shards: 1,
            failed_shards: 1,
            shard_failures: vec![ShardFailureInfo {
                shard_id: ShardId::new(1),
                node: None,
                failure: ShardFailure::Unreachable,
            }],
            cursor_id: None,
        };
        assert!(page.is_exhausted());
        assert!(page.is_degraded());
    }

    #[test]
    fn test_handle_is_opaque_token() {
        let handle = ShardContinuationHandle::from_context(9);
        assert_eq!(handle.context_id(), 9);
        assert_eq!(handle, ShardContinuationHandle::from_context(9));
    }
}
