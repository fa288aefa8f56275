//! Configuration and request types for the scroll coordinator.
//!
//! Shared data types (hits, pages, identifiers) live in `shardscroll-core`
//! and are re-exported from here so most callers need a single import.

pub use shardscroll_core::prelude::*;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration for the scroll coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Deadline for one scatter-gather round, in milliseconds.
    pub shard_request_timeout_ms: u64,
    /// Maximum shard requests in flight per round.
    pub max_concurrent_shard_requests: usize,
    /// Keep-alive applied when a request does not carry one.
    pub default_keep_alive_ms: u64,
    /// Upper bound for any requested keep-alive.
    pub max_keep_alive_ms: u64,
    /// Largest accepted page size.
    pub max_page_size: usize,
    /// Maximum number of live scroll cursors.
    pub max_open_contexts: usize,
    /// Interval between expiry sweeps of the reaper task.
    pub sweep_interval_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            shard_request_timeout_ms: 5000,
            max_concurrent_shard_requests: 8,
            default_keep_alive_ms: 60_000,
            max_keep_alive_ms: 86_400_000,
            max_page_size: 10_000,
            max_open_contexts: 500,
            sweep_interval_ms: 60_000,
        }
    }
}

impl ScrollConfig {
    pub fn shard_request_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_request_timeout_ms)
    }

    pub fn default_keep_alive(&self) -> Duration {
        Duration::from_millis(self.default_keep_alive_ms)
    }

    pub fn max_keep_alive(&self) -> Duration {
        Duration::from_millis(self.max_keep_alive_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Resolve a requested keep-alive against the default and the cap.
    pub fn resolve_keep_alive(&self, requested: Option<Duration>) -> ScrollResult<Duration> {
        let keep_alive = requested.unwrap_or_else(|| self.default_keep_alive());
        if keep_alive.is_zero() {
            return Err(ScrollError::InvalidRequest(
                "keep_alive must be greater than zero".to_string(),
            ));
        }
        if keep_alive > self.max_keep_alive() {
            return Err(ScrollError::InvalidRequest(format!(
                "keep_alive of {}ms is too large, limit is {}ms",
                keep_alive.as_millis(),
                self.max_keep_alive_ms
            )));
        }
        Ok(keep_alive)
    }

    /// Check a requested page size against `max_page_size`.
    pub fn validate_page_size(&self, page_size: usize) -> ScrollResult<()> {
        if page_size == 0 {
            return Err(ScrollError::InvalidRequest(
                "page_size must be at least 1".to_string(),
            ));
        }
        if page_size > self.max_page_size {
            return Err(ScrollError::InvalidRequest(format!(
                "page_size of {} is too large, limit is {}",
                page_size, self.max_page_size
            )));
        }
        Ok(())
    }
}

/// Request to open a new scroll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenScrollRequest {
    pub index: String,
    pub query: Query,
    pub page_size: usize,
    /// Falls back to `ScrollConfig::default_keep_alive_ms` when absent.
    pub keep_alive: Option<Duration>,
}

impl OpenScrollRequest {
    /// Create a `match_all` scroll over `index`.
    pub fn new(index: impl Into<String>, page_size: usize) -> Self {
        Self {
            index: index.into(),
            query: Query::MatchAll,
            page_size,
            keep_alive: None,
        }
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }
}

/// Request to fetch the next page of an open scroll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinueScrollRequest {
    pub cursor_id: CursorId,
    /// When present, replaces the cursor's keep-alive.
    pub keep_alive: Option<Duration>,
}

impl ContinueScrollRequest {
    pub fn new(cursor_id: CursorId) -> Self {
        Self {
            cursor_id,
            keep_alive: None,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }
}

/// Outcome of a clear request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearScrollResponse {
    /// Always true; clearing an unknown cursor is not an error.
    pub acknowledged: bool,
    /// Number of cursors actually freed.
    pub freed: usize,
}

/// Errors raised when administering an in-process cluster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("node {0} already exists")]
    NodeExists(NodeId),

    #[error("index [{0}] already exists")]
    IndexExists(String),

    #[error("index [{0}] not found")]
    IndexNotFound(String),

    #[error("{shard} of index [{index}] not found")]
    ShardNotFound { index: String, shard: ShardId },

    #[error("cluster has no nodes")]
    NoNodes,

    #[error("index [{0}] has no shards")]
    NoShards(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// Result type for cluster administration.
pub type ClusterResult<T> = Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_config_default() {
        let config = ScrollConfig::default();
        assert_eq!(config.shard_request_timeout(), Duration::from_secs(5));
        assert_eq!(config.default_keep_alive(), Duration::from_secs(60));
        assert_eq!(config.max_keep_alive(), Duration::from_secs(86_400));
        assert_eq!(config.max_page_size, 10_000);
        assert_eq!(config.max_open_contexts, 500);
    }

    #[test]
    fn test_scroll_config_partial_json() {
        let config: ScrollConfig =
            serde_json::from_str(r#"{ "max_page_size": 50 }"#).unwrap();
        assert_eq!(config.max_page_size, 50);
        assert_eq!(config.max_concurrent_shard_requests, 8);
    }

    #[test]
    fn test_resolve_keep_alive() {
        let config = ScrollConfig::default();
        assert_eq!(
            config.resolve_keep_alive(None).unwrap(),
            Duration::from_secs(60)
        );
        assert_eq!(
            config
                .resolve_keep_alive(Some(Duration::from_secs(5)))
                .unwrap(),
            Duration::from_secs(5)
        );
        assert!(matches!(
            config.resolve_keep_alive(Some(Duration::from_secs(86_401))),
            Err(ScrollError::InvalidRequest(_))
        ));
        assert!(config.resolve_keep_alive(Some(Duration::ZERO)).is_err());
    }

    #[test]
    fn test_validate_page_size() {
        let config = ScrollConfig::default();
        assert!(config.validate_page_size(1).is_ok());
        assert!(config.validate_page_size(10_000).is_ok());
        assert!(config.validate_page_size(0).is_err());
        assert!(config.validate_page_size(10_001).is_err());
    }

    #[test]
    fn test_open_request_builder() {
        let req = OpenScrollRequest::new("logs", 25)
            .with_query(Query::term("level", FieldValue::text("warn")))
            .with_keep_alive(Duration::from_secs(30));
        assert_eq!(req.index, "logs");
        assert_eq!(req.page_size, 25);
        assert_eq!(req.keep_alive, Some(Duration::from_secs(30)));
        assert!(matches!(req.query, Query::Term { .. }));
    }
}
