//! Node-side scroll search contexts.
//!
//! A search context is a point-in-time snapshot of one shard's matching hits
//! plus a read position. Context ids are what continuation handles carry; an
//! id is single use, every resume retires it and issues a fresh one.
//!
//! Contexts expire when nobody touches them for their keep-alive. A handle
//! the coordinator never got back (the reply timed out, say) is therefore
//! freed by the node itself.

use crate::types::*;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A snapshot of matches for one shard and how far it has been read.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub index: String,
    pub shard: ShardId,
    hits: Vec<Hit>,
    position: usize,
    expires_at: Instant,
}

impl SearchContext {
    pub fn new(
        index: impl Into<String>,
        shard: ShardId,
        hits: Vec<Hit>,
        keep_alive: Duration,
    ) -> Self {
        Self {
            index: index.into(),
            shard,
            hits,
            position: 0,
            expires_at: Instant::now() + keep_alive,
        }
    }

    /// Push expiry out to `keep_alive` from now.
    pub fn touch(&mut self, keep_alive: Duration) {
        self.expires_at = Instant::now() + keep_alive;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Read the next `size` hits.
    pub fn next_batch(&mut self, size: usize) -> Vec<Hit> {
        let end = (self.position + size).min(self.hits.len());
        let batch = self.hits[self.position..end].to_vec();
        self.position = end;
        batch
    }

    pub fn has_more(&self) -> bool {
        self.position < self.hits.len()
    }

    pub fn remaining(&self) -> usize {
        self.hits.len() - self.position
    }
}

/// Open search contexts on one node, bounded by a capacity.
///
/// Expired contexts never count against the capacity: they are dropped
/// before a new context is admitted, on lookup, and by `reap_expired`.
///
/// # Example
///
/// ```ignore
/// let mut registry = ContextRegistry::new(100);
/// let id = registry.open(SearchContext::new("logs", ShardId::new(0), hits, keep_alive))?;
/// let mut ctx = registry.take(id).unwrap();
/// let batch = ctx.next_batch(10);
/// let next_id = registry.reinsert(ctx);
/// ```
#[derive(Debug)]
pub struct ContextRegistry {
    contexts: HashMap<u64, SearchContext>,
    next_id: u64,
    max_contexts: usize,
    opened_total: u64,
    released_total: u64,
    expired_total: u64,
}

impl ContextRegistry {
    /// Create a registry holding at most `max_contexts` open contexts.
    pub fn new(max_contexts: usize) -> Self {
        Self {
            contexts: HashMap::new(),
            next_id: 1,
            max_contexts,
            opened_total: 0,
            released_total: 0,
            expired_total: 0,
        }
    }

    /// Register a new context.
    ///
    /// # Errors
    ///
    /// `Rejected` when the registry is at capacity.
    pub fn open(&mut self, context: SearchContext) -> Result<u64, ShardFailure> {
        self.reap_expired(Instant::now());
        if self.contexts.len() >= self.max_contexts {
            return Err(ShardFailure::Rejected(format!(
                "too many search contexts, limit is {}",
                self.max_contexts
            )));
        }
        self.opened_total += 1;
        Ok(self.insert(context))
    }

    /// Remove a context for reading; the id becomes invalid. An expired
    /// context is dropped and reported as missing.
    pub fn take(&mut self, id: u64) -> Option<SearchContext> {
        let context = self.contexts.remove(&id)?;
        if context.is_expired(Instant::now()) {
            self.expired_total += 1;
            debug!("Search context {} expired before it was resumed", id);
            return None;
        }
        Some(context)
    }

    /// Put a context back under a fresh id.
    pub fn reinsert(&mut self, context: SearchContext) -> u64 {
        self.insert(context)
    }

    /// Free a context. Returns whether it existed.
    pub fn release(&mut self, id: u64) -> bool {
        let existed = self.contexts.remove(&id).is_some();
        if existed {
            self.released_total += 1;
        }
        existed
    }

    /// Free every context, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.contexts.len();
        self.contexts.clear();
        self.released_total += count as u64;
        count
    }

    /// Drop every context whose keep-alive ran out before `now`.
    pub fn reap_expired(&mut self, now: Instant) -> usize {
        let before = self.contexts.len();
        self.contexts.retain(|_, context| !context.is_expired(now));
        let reaped = before - self.contexts.len();
        if reaped > 0 {
            self.expired_total += reaped as u64;
            debug!("Reaped {} expired search contexts", reaped);
        }
        reaped
    }

    pub fn contains(&self, id: u64) -> bool {
        self.contexts
            .get(&id)
            .is_some_and(|context| !context.is_expired(Instant::now()))
    }

    /// Contexts still within their keep-alive.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.contexts
            .values()
            .filter(|context| !context.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_contexts
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            open: self.len(),
            capacity: self.max_contexts,
            opened_total: self.opened_total,
            released_total: self.released_total,
            expired_total: self.expired_total,
        }
    }

    fn insert(&mut self, context: SearchContext) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.contexts.insert(id, context);
        id
    }
}

/// Statistics about a node's search contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    pub open: usize,
    pub capacity: usize,
    pub opened_total: u64,
    pub released_total: u64,
    pub expired_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEEP_ALIVE: Duration = Duration::from_secs(60);

    fn context(shard: u32, hits: Vec<Hit>) -> SearchContext {
        SearchContext::new("logs", ShardId::new(shard), hits, KEEP_ALIVE)
    }

    fn hits(n: usize) -> Vec<Hit> {
        (0..n)
            .map(|i| Hit::new(ShardId::new(0), format!("doc-{i}"), 1.0, "{}"))
            .collect()
    }

    #[test]
    fn test_next_batch() {
        let mut ctx = context(0, hits(5));
        assert_eq!(ctx.next_batch(3).len(), 3);
        assert!(ctx.has_more());
        assert_eq!(ctx.remaining(), 2);
        assert_eq!(ctx.next_batch(3).len(), 2);
        assert!(!ctx.has_more());
        assert!(ctx.next_batch(3).is_empty());
    }

    #[test]
    fn test_take_invalidates_id() {
        let mut registry = ContextRegistry::new(10);
        let id = registry
            .open(context(0, hits(1)))
            .unwrap();
        let ctx = registry.take(id).unwrap();
        assert!(!registry.contains(id));

        let next = registry.reinsert(ctx);
        assert_ne!(next, id);
        assert!(registry.contains(next));
    }

    #[test]
    fn test_capacity() {
        let mut registry = ContextRegistry::new(1);
        registry
            .open(context(0, vec![]))
            .unwrap();
        let err = registry
            .open(context(0, vec![]))
            .unwrap_err();
        assert!(matches!(err, ShardFailure::Rejected(_)));
    }

    #[test]
    fn test_release_and_stats() {
        let mut registry = ContextRegistry::new(10);
        let a = registry
            .open(context(0, vec![]))
            .unwrap();
        registry
            .open(context(1, vec![]))
            .unwrap();

        assert!(registry.release(a));
        assert!(!registry.release(a));
        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());

        let stats = registry.stats();
        assert_eq!(stats.opened_total, 2);
        assert_eq!(stats.released_total, 2);
        assert_eq!(stats.capacity, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unused_contexts_expire() {
        let mut registry = ContextRegistry::new(10);
        let id = registry.open(context(0, hits(3))).unwrap();
        registry
            .open(SearchContext::new("logs", ShardId::new(1), vec![], Duration::from_secs(600)))
            .unwrap();
        assert_eq!(registry.len(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(id));
        assert!(registry.take(id).is_none());

        assert_eq!(registry.reap_expired(Instant::now()), 0);
        assert_eq!(registry.stats().expired_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_extends_keep_alive() {
        let mut registry = ContextRegistry::new(10);
        let id = registry.open(context(0, hits(3))).unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        let mut ctx = registry.take(id).unwrap();
        ctx.touch(KEEP_ALIVE);
        let id = registry.reinsert(ctx);

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(registry.take(id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_contexts_free_capacity() {
        let mut registry = ContextRegistry::new(1);
        registry.open(context(0, vec![])).unwrap();
        assert!(registry.open(context(0, vec![])).is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(registry.open(context(0, vec![])).is_ok());
        assert_eq!(registry.stats().expired_total, 1);
    }
}
