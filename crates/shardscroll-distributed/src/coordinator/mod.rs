//! Scroll coordination.
//!
//! The coordinator serves the three scroll calls (open, continue, clear).
//! Every call is one scatter-gather round over the index's shards followed by
//! a merge; shards that fail are recorded on the cursor and never asked
//! again, so a degraded scroll keeps returning smaller but consistent pages.
//!
//! # Lifecycle
//!
//! 1. `open` queries every shard, merges the first page and registers a
//!    cursor (unless the first page is already empty).
//! 2. `continue_scroll` tops up shards whose buffers run low and merges the
//!    next page. The empty page is terminal: the cursor is removed and every
//!    shard handle released.
//! 3. `clear` removes a cursor at any point; expired cursors are removed on
//!    access or by the reaper task.

pub mod context_store;
pub mod cursor;

pub use context_store::{CheckoutError, CursorLease, DeleteOutcome, ScrollContextStore, StoreFull};
pub use cursor::{DetachedHandles, ScrollCursor, ShardState};

use crate::gather::{ScatterGatherRunner, ShardOutcome};
use crate::locator::{ShardLocation, ShardLocator};
use crate::merge::ResultMerger;
use crate::types::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Coordinates scrolls across the shards of an index.
///
/// # Example
///
/// ```rust,ignore
/// use shardscroll_distributed::prelude::*;
///
/// let coordinator = ScrollCoordinator::new(ScrollConfig::default(), topology, executor);
/// let mut page = coordinator.open(OpenScrollRequest::new("logs", 100)).await?;
/// while let Some(cursor_id) = page.cursor_id {
///     page = coordinator.continue_scroll(ContinueScrollRequest::new(cursor_id)).await?;
/// }
/// ```
pub struct ScrollCoordinator {
    store: ScrollContextStore,
    locator: ShardLocator,
    runner: ScatterGatherRunner,
    merger: ResultMerger,
    executor: Arc<dyn ShardQueryExecutor>,
    config: ScrollConfig,
}

impl ScrollCoordinator {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `config` - Limits, timeouts and keep-alive defaults
    /// * `topology` - Source of shard sets and shard placement
    /// * `executor` - Transport used to reach shards
    pub fn new(
        config: ScrollConfig,
        topology: Arc<dyn ClusterTopology>,
        executor: Arc<dyn ShardQueryExecutor>,
    ) -> Self {
        Self {
            store: ScrollContextStore::new(config.max_open_contexts),
            locator: ShardLocator::new(topology),
            runner: ScatterGatherRunner::from_config(&config),
            merger: ResultMerger::new(),
            executor,
            config,
        }
    }

    pub fn config(&self) -> &ScrollConfig {
        &self.config
    }

    pub fn store(&self) -> &ScrollContextStore {
        &self.store
    }

    /// Number of live cursors.
    pub async fn open_cursors(&self) -> usize {
        self.store.len().await
    }

    /// Open a scroll and return its first page.
    ///
    /// Shards that fail here are recorded as failed for the cursor's whole
    /// life. If the first page is empty no cursor is registered.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a bad page size or keep-alive
    /// - `IndexNotFound` if the index is unknown
    /// - `TooManyScrollContexts` if the store is full
    #[instrument(skip(self, request), fields(index = %request.index, page_size = request.page_size))]
    pub async fn open(&self, request: OpenScrollRequest) -> ScrollResult<Page> {
        self.config.validate_page_size(request.page_size)?;
        let keep_alive = self.config.resolve_keep_alive(request.keep_alive)?;
        let shards = self.locator.resolve(&request.index).await?;
        self.release_orphans().await;

        if self.store.is_full().await {
            return Err(ScrollError::TooManyScrollContexts {
                limit: self.store.max_open_contexts(),
            });
        }

        let targets = self
            .locator
            .locate_all(&request.index, &shards)
            .await;
        let nodes = nodes_of(&targets);

        let executor = &self.executor;
        let outcomes = self
            .runner
            .dispatch(
                targets,
                |shard, node| {
                    let executor = Arc::clone(executor);
                    let shard_request = InitialShardRequest {
                        index: request.index.clone(),
                        shard,
                        query: request.query.clone(),
                        page_size: request.page_size,
                        keep_alive,
                    };
                    async move { executor.execute_initial(&node, shard_request).await }
                },
                self.runner.deadline(),
            )
            .await;

        let mut cursor = ScrollCursor::new(
            CursorId::new(),
            request.index.clone(),
            request.query,
            request.page_size,
            &shards,
            keep_alive,
        );
        record_outcomes(&mut cursor, outcomes, &nodes);

        let hits = cursor.next_hits(&self.merger);
        if hits.is_empty() {
            let page = cursor.page(hits, None);
            self.release_handles(cursor.detach_handles()).await;
            debug!("Scroll on [{}] matched nothing", request.index);
            return Ok(page);
        }

        let page = cursor.page(hits, Some(cursor.id()));
        match self.store.create(cursor).await {
            Ok(id) => {
                info!(
                    "Opened scroll {} on [{}] ({}/{} shards)",
                    id, request.index, page.successful_shards, page.total_shards
                );
                Ok(page)
            }
            Err(StoreFull { limit, mut cursor }) => {
                self.release_handles(cursor.detach_handles()).await;
                Err(ScrollError::TooManyScrollContexts { limit })
            }
        }
    }

    /// Return the next page of a scroll.
    ///
    /// Only shards that are healthy, not exhausted and short on buffered hits
    /// are queried. A page without a cursor id is the last one.
    ///
    /// # Errors
    ///
    /// - `CursorNotFound` if the cursor is unknown, expired, cleared or exhausted
    /// - `CursorBusy` if another request on the same cursor is in flight
    /// - `InvalidRequest` for a keep-alive above the limit
    #[instrument(skip(self, request), fields(cursor_id = %request.cursor_id))]
    pub async fn continue_scroll(&self, request: ContinueScrollRequest) -> ScrollResult<Page> {
        let keep_alive = match request.keep_alive {
            Some(requested) => Some(self.config.resolve_keep_alive(Some(requested))?),
            None => None,
        };
        let id = request.cursor_id;

        let mut lease = match self.store.checkout(id).await {
            Ok(lease) => lease,
            Err(CheckoutError::Expired(handles)) => {
                info!("Scroll {} expired", id);
                self.release_handles(handles).await;
                return Err(ScrollError::CursorNotFound(id));
            }
            Err(err) => return Err(err.into_scroll_error(id)),
        };
        lease.touch(keep_alive);

        let to_fetch = lease.shards_to_fetch();
        if !to_fetch.is_empty() {
            let index = lease.index().to_string();
            let page_size = lease.page_size();
            let keep_alive = lease.keep_alive();
            let shard_ids: Vec<ShardId> = to_fetch.iter().map(|(shard, _)| *shard).collect();
            let targets = self.locator.locate_all(&index, &shard_ids).await;
            let nodes = nodes_of(&targets);
            let handles: HashMap<ShardId, ShardContinuationHandle> = to_fetch.into_iter().collect();

            let executor = &self.executor;
            let outcomes = self
                .runner
                .dispatch(
                    targets,
                    |shard, node| {
                        let executor = Arc::clone(executor);
                        let index = index.clone();
                        let handle = handles.get(&shard).cloned();
                        async move {
                            let handle = handle.ok_or_else(|| {
                                ShardFailure::Rejected("no continuation handle".to_string())
                            })?;
                            let shard_request = ResumeShardRequest {
                                index,
                                shard,
                                handle,
                                page_size,
                                keep_alive,
                            };
                            executor.execute_resume(&node, shard_request).await
                        }
                    },
                    self.runner.deadline(),
                )
                .await;
            record_outcomes(&mut lease, outcomes, &nodes);
        }

        let hits = lease.next_hits(&self.merger);

        if hits.is_empty() {
            let page = lease.page(hits, None);
            let handles = lease.detach_handles();
            self.store.retire(&lease).await;
            let _ = lease.finish();
            info!("Scroll {} exhausted", id);
            self.release_handles(handles).await;
            return Ok(page);
        }

        let mut page = lease.page(hits, Some(id));
        // A clear that landed during the round leaves the handles to us.
        if let Some(handles) = lease.finish() {
            debug!("Scroll {} was cleared during the request", id);
            page.cursor_id = None;
            self.release_handles(handles).await;
        }
        Ok(page)
    }

    /// Clear one scroll. Clearing an unknown cursor is acknowledged with
    /// nothing freed.
    #[instrument(skip(self))]
    pub async fn clear(&self, cursor_id: CursorId) -> ClearScrollResponse {
        self.release_orphans().await;
        let outcome = self.store.delete(cursor_id).await;
        let freed = usize::from(outcome.freed());
        if freed > 0 {
            info!("Cleared scroll {}", cursor_id);
        }
        self.finish_delete(outcome).await;
        ClearScrollResponse {
            acknowledged: true,
            freed,
        }
    }

    /// Clear every open scroll.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> ClearScrollResponse {
        self.release_orphans().await;
        let outcomes = self.store.drain().await;
        let freed = outcomes.iter().filter(|o| o.freed()).count();
        for outcome in outcomes {
            self.finish_delete(outcome).await;
        }
        info!("Cleared all scrolls ({} freed)", freed);
        ClearScrollResponse {
            acknowledged: true,
            freed,
        }
    }

    /// Remove expired, idle cursors and release their handles.
    ///
    /// # Returns
    ///
    /// The number of cursors removed.
    pub async fn sweep_expired(&self) -> usize {
        self.release_orphans().await;
        let expired = self.store.sweep(Instant::now()).await;
        let count = expired.len();
        for handles in expired {
            info!("Scroll {} expired", handles.cursor_id);
            self.release_handles(handles).await;
        }
        count
    }

    /// Spawn a task that sweeps expired cursors every `sweep_interval_ms`.
    ///
    /// The task holds a weak reference and stops once the coordinator is
    /// dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    debug!("Coordinator dropped, reaper stopping");
                    break;
                };
                let swept = coordinator.sweep_expired().await;
                if swept > 0 {
                    debug!("Reaper removed {} expired scrolls", swept);
                }
            }
        })
    }

    /// Release handles left behind by requests that were cancelled after
    /// their cursor was cleared.
    async fn release_orphans(&self) {
        for handles in self.store.take_orphans() {
            debug!("Releasing orphaned handles of scroll {}", handles.cursor_id);
            self.release_handles(handles).await;
        }
    }

    async fn finish_delete(&self, outcome: DeleteOutcome) {
        if let DeleteOutcome::Idle(handles) = outcome {
            self.release_handles(handles).await;
        }
    }

    /// Release handles on their shards. Best effort: failures are logged and
    /// otherwise ignored.
    async fn release_handles(&self, detached: DetachedHandles) -> usize {
        if detached.is_empty() {
            return 0;
        }
        let DetachedHandles {
            cursor_id,
            index,
            handles,
        } = detached;

        let shard_ids: Vec<ShardId> = handles.iter().map(|(shard, _)| *shard).collect();
        let targets = self.locator.locate_all(&index, &shard_ids).await;
        let handles: HashMap<ShardId, ShardContinuationHandle> = handles.into_iter().collect();

        let executor = &self.executor;
        let outcomes = self
            .runner
            .dispatch(
                targets,
                |shard, node| {
                    let executor = Arc::clone(executor);
                    let index = index.clone();
                    let handle = handles.get(&shard).cloned();
                    async move {
                        let Some(handle) = handle else {
                            return Ok(false);
                        };
                        executor
                            .release(&node, ReleaseShardRequest { index, shard, handle })
                            .await
                    }
                },
                self.runner.deadline(),
            )
            .await;

        let mut released = 0;
        for (shard, outcome) in outcomes {
            match outcome {
                ShardOutcome::Response(true) => released += 1,
                ShardOutcome::Response(false) => {
                    debug!("{} had no context to release for scroll {}", shard, cursor_id)
                }
                other => debug!(
                    "Failed to release {} for scroll {}: {:?}",
                    shard,
                    cursor_id,
                    other.into_result().err()
                ),
            }
        }
        released
    }
}

fn nodes_of(targets: &[(ShardId, ShardLocation)]) -> BTreeMap<ShardId, Option<NodeId>> {
    targets
        .iter()
        .map(|(shard, location)| (*shard, location.node().cloned()))
        .collect()
}

fn record_outcomes(
    cursor: &mut ScrollCursor,
    outcomes: BTreeMap<ShardId, ShardOutcome<ShardPage>>,
    nodes: &BTreeMap<ShardId, Option<NodeId>>,
) {
    for (shard, outcome) in outcomes {
        match outcome.into_result() {
            Ok(page) => {
                debug!("{} returned {} hits", shard, page.hits.len());
                cursor.record_page(shard, page);
            }
            Err(failure) => {
                let node = nodes.get(&shard).cloned().flatten();
                warn!(
                    "{} failed for scroll {}: {}",
                    shard,
                    cursor.id(),
                    failure
                );
                cursor.record_failure(shard, node, failure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Two shards on two nodes; each shard serves `docs` hits in pages.
    struct FakeCluster {
        docs: usize,
        released: AtomicUsize,
    }

    #[async_trait]
    impl ClusterTopology for FakeCluster {
        async fn current_shards(&self, index: &str) -> Option<Vec<ShardId>> {
            (index == "logs").then(|| vec![ShardId::new(0), ShardId::new(1)])
        }

        async fn node_for(&self, _index: &str, shard: ShardId) -> Option<NodeId> {
            Some(NodeId::new(format!("node-{}", shard.0)))
        }
    }

    impl FakeCluster {
        fn page(&self, shard: ShardId, from: usize, size: usize) -> ShardPage {
            let to = (from + size).min(self.docs);
            ShardPage {
                hits: (from..to)
                    .map(|i| Hit::new(shard, format!("{}-{}", shard.0, i), 1.0, "{}"))
                    .collect(),
                handle: ShardContinuationHandle::from_context(to as u64),
                has_more: to < self.docs,
            }
        }
    }

    #[async_trait]
    impl ShardQueryExecutor for FakeCluster {
        async fn execute_initial(
            &self,
            _node: &NodeId,
            request: InitialShardRequest,
        ) -> Result<ShardPage, ShardFailure> {
            Ok(self.page(request.shard, 0, request.page_size))
        }

        async fn execute_resume(
            &self,
            _node: &NodeId,
            request: ResumeShardRequest,
        ) -> Result<ShardPage, ShardFailure> {
            let from = request.handle.context_id() as usize;
            Ok(self.page(request.shard, from, request.page_size))
        }

        async fn release(
            &self,
            _node: &NodeId,
            _request: ReleaseShardRequest,
        ) -> Result<bool, ShardFailure> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn setup(docs: usize, config: ScrollConfig) -> (Arc<FakeCluster>, ScrollCoordinator) {
        let cluster = Arc::new(FakeCluster {
            docs,
            released: AtomicUsize::new(0),
        });
        let coordinator = ScrollCoordinator::new(config, cluster.clone(), cluster.clone());
        (cluster, coordinator)
    }

    #[tokio::test]
    async fn test_full_scroll() {
        let (cluster, coordinator) = setup(15, ScrollConfig::default());
        let mut page = coordinator
            .open(OpenScrollRequest::new("logs", 10))
            .await
            .unwrap();
        let mut total = page.hits.len();
        let mut pages = 1;

        while let Some(id) = page.cursor_id {
            page = coordinator
                .continue_scroll(ContinueScrollRequest::new(id))
                .await
                .unwrap();
            total += page.hits.len();
            pages += 1;
        }

        assert_eq!(total, 30);
        assert_eq!(pages, 4);
        assert!(page.is_exhausted());
        assert_eq!(coordinator.open_cursors().await, 0);
        assert_eq!(cluster.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_validates_request() {
        let (_, coordinator) = setup(5, ScrollConfig::default());
        let err = coordinator
            .open(OpenScrollRequest::new("logs", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrollError::InvalidRequest(_)));

        let err = coordinator
            .open(OpenScrollRequest::new("missing", 10))
            .await
            .unwrap_err();
        assert_eq!(err, ScrollError::IndexNotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_empty_first_page_registers_nothing() {
        let (cluster, coordinator) = setup(0, ScrollConfig::default());
        let page = coordinator
            .open(OpenScrollRequest::new("logs", 10))
            .await
            .unwrap();
        assert!(page.is_exhausted());
        assert!(page.cursor_id.is_none());
        assert_eq!(coordinator.open_cursors().await, 0);
        assert_eq!(cluster.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_too_many_scroll_contexts() {
        let config = ScrollConfig {
            max_open_contexts: 1,
            ..ScrollConfig::default()
        };
        let (_, coordinator) = setup(50, config);
        coordinator
            .open(OpenScrollRequest::new("logs", 10))
            .await
            .unwrap();
        let err = coordinator
            .open(OpenScrollRequest::new("logs", 10))
            .await
            .unwrap_err();
        assert_eq!(err, ScrollError::TooManyScrollContexts { limit: 1 });
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (cluster, coordinator) = setup(50, ScrollConfig::default());
        let page = coordinator
            .open(OpenScrollRequest::new("logs", 10))
            .await
            .unwrap();
        let id = page.cursor_id.unwrap();

        let first = coordinator.clear(id).await;
        assert_eq!(first.freed, 1);
        assert_eq!(cluster.released.load(Ordering::SeqCst), 2);

        let second = coordinator.clear(id).await;
        assert!(second.acknowledged);
        assert_eq!(second.freed, 0);

        let err = coordinator
            .continue_scroll(ContinueScrollRequest::new(id))
            .await
            .unwrap_err();
        assert_eq!(err, ScrollError::CursorNotFound(id));
    }

    #[tokio::test]
    async fn test_clear_all_counts_freed() {
        let (_, coordinator) = setup(50, ScrollConfig::default());
        for _ in 0..3 {
            coordinator
                .open(OpenScrollRequest::new("logs", 10))
                .await
                .unwrap();
        }
        let response = coordinator.clear_all().await;
        assert_eq!(response.freed, 3);
        assert_eq!(coordinator.open_cursors().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let (cluster, coordinator) = setup(50, ScrollConfig::default());
        coordinator
            .open(OpenScrollRequest::new("logs", 10).with_keep_alive(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(coordinator.sweep_expired().await, 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(coordinator.sweep_expired().await, 1);
        assert_eq!(cluster.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_refreshes_keep_alive() {
        let (_, coordinator) = setup(100, ScrollConfig::default());
        let page = coordinator
            .open(OpenScrollRequest::new("logs", 10).with_keep_alive(Duration::from_secs(2)))
            .await
            .unwrap();
        let id = page.cursor_id.unwrap();

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(1500)).await;
            coordinator
                .continue_scroll(ContinueScrollRequest::new(id))
                .await
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(3)).await;
        let err = coordinator
            .continue_scroll(ContinueScrollRequest::new(id))
            .await
            .unwrap_err();
        assert_eq!(err, ScrollError::CursorNotFound(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_sweeps_in_background() {
        let config = ScrollConfig {
            sweep_interval_ms: 1000,
            ..ScrollConfig::default()
        };
        let (_, coordinator) = setup(50, config);
        let coordinator = Arc::new(coordinator);
        let reaper = coordinator.spawn_reaper();

        coordinator
            .open(OpenScrollRequest::new("logs", 10).with_keep_alive(Duration::from_millis(500)))
            .await
            .unwrap();
        assert_eq!(coordinator.open_cursors().await, 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(coordinator.open_cursors().await, 0);

        drop(coordinator);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(reaper.is_finished());
    }
}
