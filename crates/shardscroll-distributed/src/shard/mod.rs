//! In-memory shard node.
//!
//! This module provides `LocalShardNode`, a single node hosting shards of
//! one or more indices:
//!
//! - JSON documents stored per `(index, shard)`
//! - Query evaluation with score ordering
//! - Scroll search contexts behind continuation handles
//!
//! # Architecture
//!
//! The node is synchronous and is shared as `Arc<RwLock<LocalShardNode>>`
//! by whatever serves it (the in-process cluster or a `ShardServer`).
//! Every scroll request mutates the context registry, so it takes the write
//! lock.
//!
//! # Example
//!
//! ```ignore
//! use shardscroll_distributed::shard::LocalShardNode;
//!
//! let mut node = LocalShardNode::new(NodeId::new("node-0"));
//! node.create_shard("logs", ShardId::new(0));
//! node.index_document("logs", ShardId::new(0), "doc-1", r#"{"level":"warn"}"#)?;
//!
//! let page = node.execute_initial(&InitialShardRequest {
//!     index: "logs".into(),
//!     shard: ShardId::new(0),
//!     query: Query::MatchAll,
//!     page_size: 10,
//!     keep_alive: Duration::from_secs(60),
//! })?;
//! ```

mod search_context;

pub use search_context::{ContextRegistry, ContextStats, SearchContext};

use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::debug;

/// Default cap on open search contexts per node.
pub const DEFAULT_MAX_CONTEXTS: usize = 500;

/// Default score for documents indexed without one.
const DEFAULT_SCORE: f64 = 1.0;

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    source: String,
    parsed: Value,
    score: f64,
}

#[derive(Debug, Default)]
struct ShardData {
    documents: Vec<StoredDocument>,
    positions: HashMap<String, usize>,
}

impl ShardData {
    fn upsert(&mut self, doc: StoredDocument) {
        match self.positions.get(&doc.id) {
            Some(&pos) => self.documents[pos] = doc,
            None => {
                self.positions.insert(doc.id.clone(), self.documents.len());
                self.documents.push(doc);
            }
        }
    }
}

/// Health of a shard node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node_id: NodeId,
    pub healthy: bool,
    pub shard_count: usize,
    pub document_count: usize,
    pub open_contexts: usize,
}

/// A node hosting shards in memory.
pub struct LocalShardNode {
    node_id: NodeId,
    shards: HashMap<(String, ShardId), ShardData>,
    contexts: ContextRegistry,
}

impl LocalShardNode {
    /// Create an empty node.
    pub fn new(node_id: NodeId) -> Self {
        Self::with_context_limit(node_id, DEFAULT_MAX_CONTEXTS)
    }

    /// Create an empty node with a custom search context cap.
    ///
    /// # Arguments
    ///
    /// * `node_id` - Identifier reported in health checks
    /// * `max_contexts` - Open search contexts allowed before new scrolls
    ///   are rejected
    pub fn with_context_limit(node_id: NodeId, max_contexts: usize) -> Self {
        Self {
            node_id,
            shards: HashMap::new(),
            contexts: ContextRegistry::new(max_contexts),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Host a shard. Creating an existing shard is a no-op.
    pub fn create_shard(&mut self, index: &str, shard: ShardId) {
        self.shards
            .entry((index.to_string(), shard))
            .or_default();
    }

    pub fn has_shard(&self, index: &str, shard: ShardId) -> bool {
        self.shards.contains_key(&(index.to_string(), shard))
    }

    /// Shards hosted here, sorted by index then shard.
    pub fn shards(&self) -> Vec<(String, ShardId)> {
        let mut shards: Vec<_> = self.shards.keys().cloned().collect();
        shards.sort();
        shards
    }

    /// Index a document with the default score.
    pub fn index_document(
        &mut self,
        index: &str,
        shard: ShardId,
        doc_id: &str,
        source: &str,
    ) -> ClusterResult<()> {
        self.index_scored_document(index, shard, doc_id, source, DEFAULT_SCORE)
    }

    /// Index a document with an explicit relevance score.
    ///
    /// Re-indexing an id replaces the document in place.
    ///
    /// # Errors
    ///
    /// `ShardNotFound` if the shard is not hosted here, `InvalidDocument` if
    /// the source is not valid JSON.
    pub fn index_scored_document(
        &mut self,
        index: &str,
        shard: ShardId,
        doc_id: &str,
        source: &str,
        score: f64,
    ) -> ClusterResult<()> {
        let parsed: Value = serde_json::from_str(source)
            .map_err(|e| ClusterError::InvalidDocument(format!("{}: {}", doc_id, e)))?;
        let data = self
            .shards
            .get_mut(&(index.to_string(), shard))
            .ok_or_else(|| ClusterError::ShardNotFound {
                index: index.to_string(),
                shard,
            })?;
        data.upsert(StoredDocument {
            id: doc_id.to_string(),
            source: source.to_string(),
            parsed,
            score,
        });
        Ok(())
    }

    pub fn document_count(&self, index: &str, shard: ShardId) -> usize {
        self.shards
            .get(&(index.to_string(), shard))
            .map_or(0, |data| data.documents.len())
    }

    pub fn total_documents(&self) -> usize {
        self.shards.values().map(|data| data.documents.len()).sum()
    }

    /// Run a query and open a search context over its matches.
    ///
    /// Matches are ordered by score, highest first, then by indexing order.
    pub fn execute_initial(
        &mut self,
        request: &InitialShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        let data = self
            .shards
            .get(&(request.index.clone(), request.shard))
            .ok_or_else(|| no_such_shard(&request.index, request.shard))?;

        let mut matches: Vec<&StoredDocument> = data
            .documents
            .iter()
            .filter(|doc| request.query.matches(&doc.parsed))
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));

        let hits = matches
            .into_iter()
            .map(|doc| Hit::new(request.shard, doc.id.clone(), doc.score, doc.source.clone()))
            .collect();

        let mut context =
            SearchContext::new(request.index.clone(), request.shard, hits, request.keep_alive);
        let batch = context.next_batch(request.page_size);
        let has_more = context.has_more();
        let context_id = self.contexts.open(context)?;

        debug!(
            "{} opened context {} on [{}] {} ({} hits)",
            self.node_id,
            context_id,
            request.index,
            request.shard,
            batch.len()
        );

        Ok(ShardPage {
            hits: batch,
            handle: ShardContinuationHandle::from_context(context_id),
            has_more,
        })
    }

    /// Continue from a handle, consuming it.
    pub fn execute_resume(
        &mut self,
        request: &ResumeShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        let context_id = request.handle.context_id();
        let mut context = self
            .contexts
            .take(context_id)
            .ok_or_else(|| no_such_context(context_id))?;

        if context.index != request.index || context.shard != request.shard {
            let failure = ShardFailure::Rejected(format!(
                "search context [{}] belongs to [{}] {}",
                context_id, context.index, context.shard
            ));
            self.contexts.reinsert(context);
            return Err(failure);
        }

        let batch = context.next_batch(request.page_size);
        let has_more = context.has_more();
        context.touch(request.keep_alive);
        let next_id = self.contexts.reinsert(context);

        Ok(ShardPage {
            hits: batch,
            handle: ShardContinuationHandle::from_context(next_id),
            has_more,
        })
    }

    /// Free the context behind a handle.
    pub fn release(&mut self, request: &ReleaseShardRequest) -> bool {
        let released = self.contexts.release(request.handle.context_id());
        debug!(
            "{} release of context {}: {}",
            self.node_id,
            request.handle.context_id(),
            released
        );
        released
    }

    pub fn open_contexts(&self) -> usize {
        self.contexts.len()
    }

    pub fn context_stats(&self) -> ContextStats {
        self.contexts.stats()
    }

    /// Drop contexts whose keep-alive ran out.
    pub fn reap_expired_contexts(&mut self) -> usize {
        self.contexts.reap_expired(Instant::now())
    }

    /// Drop every open context, as a node restart would.
    pub fn drop_contexts(&mut self) -> usize {
        self.contexts.clear()
    }

    pub fn health(&self) -> NodeHealth {
        NodeHealth {
            node_id: self.node_id.clone(),
            healthy: self.contexts.len() < self.contexts.capacity(),
            shard_count: self.shards.len(),
            document_count: self.total_documents(),
            open_contexts: self.contexts.len(),
        }
    }
}

fn no_such_shard(index: &str, shard: ShardId) -> ShardFailure {
    ShardFailure::Rejected(format!("no such shard [{}] {}", index, shard))
}

fn no_such_context(id: u64) -> ShardFailure {
    ShardFailure::Rejected(format!("no search context found for id [{}]", id))
}
