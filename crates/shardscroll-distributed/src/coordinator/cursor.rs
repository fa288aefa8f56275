//! Per-scroll cursor state.
//!
//! A cursor owns everything a scroll needs between calls: the query, one
//! continuation handle per shard, hits fetched but not yet returned, and the
//! set of shards that have failed. Failure is sticky; once a shard is in the
//! failed set it is never queried again for this cursor and its buffered hits
//! are discarded.

use crate::merge::ResultMerger;
use crate::types::*;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Cursor-side state of one shard.
#[derive(Debug, Clone, Default)]
pub struct ShardState {
    /// Latest handle issued by the shard, if any.
    pub handle: Option<ShardContinuationHandle>,
    /// Hits fetched but not yet returned, in shard order.
    pub pending: VecDeque<Hit>,
    /// The shard reported it has nothing beyond `pending`.
    pub exhausted: bool,
    next_sequence: u64,
}

/// Handles taken out of a cursor, waiting to be released on their shards.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedHandles {
    pub cursor_id: CursorId,
    pub index: String,
    pub handles: Vec<(ShardId, ShardContinuationHandle)>,
}

impl DetachedHandles {
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

/// Server-side state of one open scroll.
#[derive(Debug, Clone)]
pub struct ScrollCursor {
    id: CursorId,
    index: String,
    query: Query,
    page_size: usize,
    created_at: Instant,
    keep_alive: Duration,
    expires_at: Instant,
    shards: BTreeMap<ShardId, ShardState>,
    failed: BTreeMap<ShardId, ShardFailureInfo>,
}

impl ScrollCursor {
    /// Create a cursor over `shards`, none of which has answered yet.
    pub fn new(
        id: CursorId,
        index: impl Into<String>,
        query: Query,
        page_size: usize,
        shards: &[ShardId],
        keep_alive: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            index: index.into(),
            query,
            page_size,
            created_at: now,
            keep_alive,
            expires_at: now + keep_alive,
            shards: shards.iter().map(|&s| (s, ShardState::default())).collect(),
            failed: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn total_shards(&self) -> u32 {
        self.shards.len() as u32
    }

    pub fn failed_shards(&self) -> u32 {
        self.failed.len() as u32
    }

    pub fn successful_shards(&self) -> u32 {
        self.total_shards() - self.failed_shards()
    }

    pub fn is_failed(&self, shard: ShardId) -> bool {
        self.failed.contains_key(&shard)
    }

    pub fn shard(&self, shard: ShardId) -> Option<&ShardState> {
        self.shards.get(&shard)
    }

    /// Push expiry out by the keep-alive, replacing it first when given.
    pub fn touch(&mut self, keep_alive: Option<Duration>) {
        if let Some(keep_alive) = keep_alive {
            self.keep_alive = keep_alive;
        }
        self.expires_at = Instant::now() + self.keep_alive;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Shards that must be asked for more hits before the next page can be
    /// merged, with the handle to resume from.
    pub fn shards_to_fetch(&self) -> Vec<(ShardId, ShardContinuationHandle)> {
        self.shards
            .iter()
            .filter(|(id, state)| {
                !self.failed.contains_key(*id)
                    && !state.exhausted
                    && state.pending.len() < self.page_size
            })
            .filter_map(|(&id, state)| state.handle.clone().map(|h| (id, h)))
            .collect()
    }

    /// Record a successful shard response.
    ///
    /// The new handle replaces the previous one, which the shard consumed.
    pub fn record_page(&mut self, shard: ShardId, page: ShardPage) {
        if self.failed.contains_key(&shard) {
            return;
        }
        let Some(state) = self.shards.get_mut(&shard) else {
            return;
        };
        for mut hit in page.hits {
            hit.shard_id = shard;
            hit.sequence = state.next_sequence;
            state.next_sequence += 1;
            state.pending.push_back(hit);
        }
        state.handle = Some(page.handle);
        state.exhausted = !page.has_more;
    }

    /// Mark a shard failed for the rest of this cursor's life.
    ///
    /// Returns false if the shard had already failed; the first failure is
    /// the one reported. The handle is kept so it can still be released.
    pub fn record_failure(
        &mut self,
        shard: ShardId,
        node: Option<NodeId>,
        failure: ShardFailure,
    ) -> bool {
        if self.failed.contains_key(&shard) || !self.shards.contains_key(&shard) {
            return false;
        }
        if let Some(state) = self.shards.get_mut(&shard) {
            state.pending.clear();
        }
        self.failed.insert(
            shard,
            ShardFailureInfo {
                shard_id: shard,
                node,
                failure,
            },
        );
        true
    }

    /// Merge the next page out of the buffered hits of healthy shards.
    pub fn next_hits(&mut self, merger: &ResultMerger) -> Vec<Hit> {
        let failed = &self.failed;
        let buffers = self
            .shards
            .iter_mut()
            .filter(|(id, _)| !failed.contains_key(*id))
            .map(|(_, state)| &mut state.pending);
        merger.merge_page(buffers, self.page_size)
    }

    /// Wrap merged hits into a page carrying this cursor's shard accounting.
    pub fn page(&self, hits: Vec<Hit>, cursor_id: Option<CursorId>) -> Page {
        Page {
            hits,
            total_shards: self.total_shards(),
            successful_shards: self.successful_shards(),
            failed_shards: self.failed_shards(),
            shard_failures: self.failed.values().cloned().collect(),
            cursor_id,
        }
    }

    /// Take every handle out of the cursor for release.
    pub fn detach_handles(&mut self) -> DetachedHandles {
        let handles = self
            .shards
            .iter_mut()
            .filter_map(|(&id, state)| state.handle.take().map(|h| (id, h)))
            .collect();
        DetachedHandles {
            cursor_id: self.id,
            index: self.index.clone(),
            handles,
        }
    }
}
