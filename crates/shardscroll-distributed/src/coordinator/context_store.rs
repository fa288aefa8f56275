//! Registry of live scroll cursors.
//!
//! The store is the single authority on whether a cursor exists. Each cursor
//! sits behind its own mutex so requests on different cursors never contend
//! beyond the map lookup; a second request on a busy cursor fails fast
//! instead of queueing.
//!
//! A cursor deleted while leased is handed to the lease: whichever of the two
//! (the delete or the end of the lease) comes second under the slot's state
//! lock finds the other's mark and takes the handles. A lease dropped without
//! `finish` (a cancelled request) parks its handles as orphans for the
//! coordinator to release.

use super::cursor::{DetachedHandles, ScrollCursor};
use crate::types::*;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct LeaseState {
    leased: bool,
    cleared: bool,
}

type SharedState = Arc<StdMutex<LeaseState>>;

fn lock_state(state: &StdMutex<LeaseState>) -> MutexGuard<'_, LeaseState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct CursorSlot {
    cursor: Arc<Mutex<ScrollCursor>>,
    state: SharedState,
}

impl CursorSlot {
    fn new(cursor: ScrollCursor) -> Self {
        Self {
            cursor: Arc::new(Mutex::new(cursor)),
            state: SharedState::default(),
        }
    }

    /// Flag the slot cleared and take its handles, unless a lease is out, in
    /// which case the lease takes them when it ends.
    async fn detach(self) -> DeleteOutcome {
        let leased = {
            let mut state = lock_state(&self.state);
            state.cleared = true;
            state.leased
        };
        if leased {
            return DeleteOutcome::Leased;
        }
        // No lease, or one that has ended and is dropping its guard.
        let mut cursor = self.cursor.lock().await;
        DeleteOutcome::Idle(cursor.detach_handles())
    }
}

/// Exclusive access to one cursor for the length of a request.
///
/// While a lease is held every other `checkout` of the same cursor fails
/// with `Busy`, and the sweeper leaves the cursor alone. End it with
/// `finish`; dropping it has the same effect except that handles owed by a
/// cleared cursor go to the store's orphans instead of the caller.
pub struct CursorLease {
    guard: OwnedMutexGuard<ScrollCursor>,
    state: SharedState,
    orphans: UnboundedSender<DetachedHandles>,
    ended: bool,
}

impl CursorLease {
    /// Whether the cursor was cleared while this lease was out.
    pub fn is_cleared(&self) -> bool {
        lock_state(&self.state).cleared
    }

    /// End the lease. Returns `Some` when the cursor was cleared while
    /// leased, holding whatever handles it still owned; the caller must
    /// release them.
    pub fn finish(mut self) -> Option<DetachedHandles> {
        self.end()
    }

    fn end(&mut self) -> Option<DetachedHandles> {
        if self.ended {
            return None;
        }
        self.ended = true;

        let mut state = lock_state(&self.state);
        state.leased = false;
        if !state.cleared {
            return None;
        }
        Some(self.guard.detach_handles())
    }
}

impl Drop for CursorLease {
    fn drop(&mut self) {
        if let Some(handles) = self.end().filter(|h| !h.is_empty()) {
            debug!(
                "Lease on cleared scroll {} dropped, parking {} handles",
                handles.cursor_id,
                handles.len()
            );
            // The receiver lives as long as the store.
            let _ = self.orphans.send(handles);
        }
    }
}

impl Deref for CursorLease {
    type Target = ScrollCursor;

    fn deref(&self) -> &ScrollCursor {
        &self.guard
    }
}

impl DerefMut for CursorLease {
    fn deref_mut(&mut self) -> &mut ScrollCursor {
        &mut self.guard
    }
}

/// Why a cursor could not be checked out.
#[derive(Debug)]
pub enum CheckoutError {
    Missing,
    Busy,
    /// The cursor had expired and was removed; its handles still need
    /// releasing.
    Expired(DetachedHandles),
}

impl CheckoutError {
    /// Caller-facing error for `id`.
    pub fn into_scroll_error(self, id: CursorId) -> ScrollError {
        match self {
            CheckoutError::Busy => ScrollError::CursorBusy(id),
            CheckoutError::Missing | CheckoutError::Expired(_) => ScrollError::CursorNotFound(id),
        }
    }
}

/// A cursor that could not be registered because the store is full.
#[derive(Debug)]
pub struct StoreFull {
    pub limit: usize,
    pub cursor: ScrollCursor,
}

/// Result of deleting a cursor.
#[derive(Debug)]
pub enum DeleteOutcome {
    /// Removed while idle; the handles are returned for release.
    Idle(DetachedHandles),
    /// Removed while a request held it; that request releases the handles.
    Leased,
    Missing,
}

impl DeleteOutcome {
    pub fn freed(&self) -> bool {
        !matches!(self, DeleteOutcome::Missing)
    }
}

/// Keyed store of scroll cursors.
///
/// Requests go through `checkout`, whose lease can be held across `.await`.
/// `get` and `update` are for synchronous inspection and edits of an idle
/// cursor and fail with `CursorBusy` while a lease is out.
pub struct ScrollContextStore {
    slots: RwLock<HashMap<CursorId, CursorSlot>>,
    max_open_contexts: usize,
    orphans_tx: UnboundedSender<DetachedHandles>,
    orphans_rx: StdMutex<UnboundedReceiver<DetachedHandles>>,
}

impl ScrollContextStore {
    pub fn new(max_open_contexts: usize) -> Self {
        let (orphans_tx, orphans_rx) = unbounded_channel();
        Self {
            slots: RwLock::new(HashMap::new()),
            max_open_contexts,
            orphans_tx,
            orphans_rx: StdMutex::new(orphans_rx),
        }
    }

    pub fn max_open_contexts(&self) -> usize {
        self.max_open_contexts
    }

    /// Number of registered cursors, expired ones included until swept.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    pub async fn is_full(&self) -> bool {
        self.len().await >= self.max_open_contexts
    }

    /// Register a cursor under its own id.
    ///
    /// # Errors
    ///
    /// Hands the cursor back when `max_open_contexts` is reached, so its
    /// handles can still be released.
    pub async fn create(&self, cursor: ScrollCursor) -> Result<CursorId, StoreFull> {
        let mut slots = self.slots.write().await;
        if slots.len() >= self.max_open_contexts {
            return Err(StoreFull {
                limit: self.max_open_contexts,
                cursor,
            });
        }
        let id = cursor.id();
        slots.insert(id, CursorSlot::new(cursor));
        debug!("Registered scroll cursor {} ({} open)", id, slots.len());
        Ok(id)
    }

    /// Take exclusive access to a cursor.
    ///
    /// An expired cursor is removed here rather than waiting for the sweep.
    pub async fn checkout(&self, id: CursorId) -> Result<CursorLease, CheckoutError> {
        let mut lease = {
            let slots = self.slots.read().await;
            let slot = slots.get(&id).ok_or(CheckoutError::Missing)?;
            let mut state = lock_state(&slot.state);
            if state.leased {
                return Err(CheckoutError::Busy);
            }
            let guard = slot
                .cursor
                .clone()
                .try_lock_owned()
                .map_err(|_| CheckoutError::Busy)?;
            state.leased = true;
            CursorLease {
                guard,
                state: slot.state.clone(),
                orphans: self.orphans_tx.clone(),
                ended: false,
            }
        };

        if lease.is_expired(Instant::now()) {
            self.remove_slot(id, &lease.state).await;
            debug!("Scroll cursor {} expired on access", id);
            return Err(CheckoutError::Expired(lease.detach_handles()));
        }

        Ok(lease)
    }

    /// Copy of an idle cursor's current state.
    pub async fn get(&self, id: CursorId) -> ScrollResult<ScrollCursor> {
        self.update(id, |cursor| cursor.clone()).await
    }

    /// Apply a synchronous change to an idle cursor.
    ///
    /// # Errors
    ///
    /// `CursorNotFound` if missing or expired, `CursorBusy` if leased.
    pub async fn update<R>(
        &self,
        id: CursorId,
        mutate: impl FnOnce(&mut ScrollCursor) -> R,
    ) -> ScrollResult<R> {
        let slots = self.slots.read().await;
        let slot = slots.get(&id).ok_or(ScrollError::CursorNotFound(id))?;
        let mut cursor = {
            let state = lock_state(&slot.state);
            if state.leased {
                return Err(ScrollError::CursorBusy(id));
            }
            slot.cursor
                .try_lock()
                .map_err(|_| ScrollError::CursorBusy(id))?
        };
        if cursor.is_expired(Instant::now()) {
            return Err(ScrollError::CursorNotFound(id));
        }
        Ok(mutate(&mut cursor))
    }

    /// Unregister a cursor and flag it cleared.
    pub async fn delete(&self, id: CursorId) -> DeleteOutcome {
        let slot = self.slots.write().await.remove(&id);
        match slot {
            Some(slot) => slot.detach().await,
            None => DeleteOutcome::Missing,
        }
    }

    /// Remove the cursor held by `lease` once it is exhausted. A no-op if a
    /// concurrent clear already removed it.
    pub async fn retire(&self, lease: &CursorLease) {
        self.remove_slot(lease.id(), &lease.state).await;
    }

    /// Unregister every cursor.
    pub async fn drain(&self) -> Vec<DeleteOutcome> {
        let slots: Vec<CursorSlot> = self.slots.write().await.drain().map(|(_, s)| s).collect();
        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            outcomes.push(slot.detach().await);
        }
        outcomes
    }

    /// Remove expired cursors that no request is holding.
    pub async fn sweep(&self, now: Instant) -> Vec<DetachedHandles> {
        let mut slots = self.slots.write().await;
        let mut expired = Vec::new();

        slots.retain(|_, slot| {
            let mut state = lock_state(&slot.state);
            if state.leased {
                return true;
            }
            let Ok(mut cursor) = slot.cursor.try_lock() else {
                return true;
            };
            if !cursor.is_expired(now) {
                return true;
            }
            state.cleared = true;
            expired.push(cursor.detach_handles());
            false
        });

        expired
    }

    /// Handles of cleared cursors whose lease was dropped without `finish`.
    pub fn take_orphans(&self) -> Vec<DetachedHandles> {
        let mut rx = self
            .orphans_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut orphans = Vec::new();
        while let Ok(handles) = rx.try_recv() {
            orphans.push(handles);
        }
        orphans
    }

    async fn remove_slot(&self, id: CursorId, state: &SharedState) {
        let mut slots = self.slots.write().await;
        let same = slots
            .get(&id)
            .is_some_and(|slot| Arc::ptr_eq(&slot.state, state));
        if same {
            slots.remove(&id);
        }
        lock_state(state).cleared = true;
    }
}
