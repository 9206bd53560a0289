//! Query cache store.
//!
//! The store owns exactly one [`CacheEntry`] per distinct [`CacheKey`] together
//! with its subscribers and fetch bookkeeping. It is a cheap, cloneable handle
//! around a `std::sync::Mutex`; the lock is never held across an `.await` and
//! listeners are always invoked after it has been released, so a listener may
//! call back into the store.
//!
//! # Fetch ordering
//!
//! Every fetch gets a sequence number when it starts, drawn from one counter
//! for the whole store that is never reset, not even by [`QueryStore::clear`].
//! A new slot starts at the counter's current value, so a fetch begun before
//! the slot existed can neither be joined nor applied to it. A completion is
//! applied only if no fetch that started later (and no direct [`QueryStore::write`])
//! has been applied already, so a slow old response can never clobber newer
//! data. Invalidation records the newest sequence issued at that moment: only
//! a fetch started after the invalidation clears the invalidated flag.

use budget_core::{CacheKey, FetchError, KeyPattern, Payload};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;

use crate::entry::{CacheEntry, QueryStatus};
use crate::stats::CacheStats;

/// Callback invoked with the new entry snapshot whenever it changes.
pub type Listener = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

// ============================================================================
// SLOTS
// ============================================================================

struct Slot {
    entry: CacheEntry,
    listeners: Vec<(u64, Listener)>,
    /// Set while nobody observes the entry and no fetch is in flight.
    idle_since: Option<Instant>,
    in_flight: usize,
    issued_seq: u64,
    applied_seq: u64,
    /// Fetches with a sequence at or below this predate the last invalidation.
    invalidated_through: u64,
    /// Fetches with a sequence at or below this predate the slot itself.
    floor: u64,
}

impl Slot {
    fn new(key: CacheKey, now: Instant, floor: u64) -> Self {
        Self {
            entry: CacheEntry::idle(key),
            listeners: Vec::new(),
            idle_since: Some(now),
            in_flight: 0,
            issued_seq: floor,
            applied_seq: floor,
            invalidated_through: floor,
            floor,
        }
    }

    fn mark_idle_if_unobserved(&mut self, now: Instant) {
        if self.listeners.is_empty() && self.in_flight == 0 {
            self.idle_since = Some(now);
        }
    }

    fn is_collectable(&self, now: Instant, grace: Duration) -> bool {
        self.listeners.is_empty()
            && self.in_flight == 0
            && self
                .idle_since
                .is_some_and(|since| now.saturating_duration_since(since) >= grace)
    }
}

#[derive(Default)]
struct StoreState {
    slots: HashMap<CacheKey, Slot>,
    next_listener_id: u64,
    /// Last fetch sequence issued for any key.
    last_seq: u64,
}

impl StoreState {
    fn slot_mut(&mut self, key: &CacheKey, now: Instant) -> &mut Slot {
        let floor = self.last_seq;
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone(), now, floor))
    }

    /// Issue the next fetch sequence to `key`, creating its slot first so the
    /// new fetch stays above the slot's floor.
    fn issue_seq(&mut self, key: &CacheKey, now: Instant) -> &mut Slot {
        let floor = self.last_seq;
        self.last_seq += 1;
        let seq = self.last_seq;
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone(), now, floor));
        slot.issued_seq = seq;
        slot
    }
}

fn lock_state(state: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    // A panicking listener runs outside the lock, so poisoning only ever
    // comes from a panicking patch transform; the map itself is still sound.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// Listener calls collected under the lock and delivered after it is released.
#[must_use = "listeners are only called once the notifications are sent"]
#[derive(Default)]
pub(crate) struct Notifications {
    pending: Vec<(Vec<Listener>, CacheEntry)>,
}

impl Notifications {
    fn of(slot: &Slot) -> Self {
        let mut notifications = Self::default();
        notifications.push(slot);
        notifications
    }

    fn push(&mut self, slot: &Slot) {
        if slot.listeners.is_empty() {
            return;
        }
        let listeners = slot.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        self.pending.push((listeners, slot.entry.clone()));
    }

    pub(crate) fn extend(&mut self, other: Notifications) {
        self.pending.extend(other.pending);
    }

    pub(crate) fn send(self) {
        for (listeners, entry) in self.pending {
            for listener in listeners {
                listener(&entry);
            }
        }
    }
}

/// What happened to a fetch completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Applied,
    /// A later-started fetch or a direct write was already applied.
    Superseded,
    /// The entry no longer exists (the store was cleared).
    Evicted,
}

/// Freshness of an entry as seen by the scheduler.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchCheck {
    pub due: bool,
    pub invalidated_through: u64,
}

// ============================================================================
// STORE
// ============================================================================

/// Keyed store of fetched server data.
#[derive(Clone)]
pub struct QueryStore {
    state: Arc<Mutex<StoreState>>,
    stats: Arc<CacheStats>,
    gc_grace: Duration,
}

impl QueryStore {
    /// Create an empty store evicting entries idle for at least `gc_grace`.
    pub fn new(gc_grace: Duration) -> Self {
        Self::with_stats(gc_grace, Arc::new(CacheStats::new()))
    }

    pub fn with_stats(gc_grace: Duration, stats: Arc<CacheStats>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            stats,
            gc_grace,
        }
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    pub fn gc_grace(&self) -> Duration {
        self.gc_grace
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        lock_state(&self.state)
    }

    /// Snapshot of the entry for `key`, creating an idle one if absent.
    pub fn get(&self, key: &CacheKey) -> CacheEntry {
        let mut state = self.lock();
        state.slot_mut(key, Instant::now()).entry.clone()
    }

    /// Snapshot of the entry for `key` without creating it.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().slots.get(key).map(|slot| slot.entry.clone())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key currently held, in canonical order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.keys_matching(&KeyPattern::All)
    }

    /// Keys currently held that match `pattern`, in canonical order.
    pub fn keys_matching(&self, pattern: &KeyPattern) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .lock()
            .slots
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Observe `key`. The listener runs on every change until the returned
    /// subscription is dropped.
    pub fn subscribe<F>(&self, key: &CacheKey, listener: F) -> Subscription
    where
        F: Fn(&CacheEntry) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let id = state.next_listener_id;
        state.next_listener_id += 1;

        let slot = state.slot_mut(key, Instant::now());
        slot.listeners.push((id, Arc::new(listener)));
        slot.idle_since = None;

        Subscription {
            store: Arc::downgrade(&self.state),
            key: key.clone(),
            id,
        }
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.lock()
            .slots
            .get(key)
            .map_or(0, |slot| slot.listeners.len())
    }

    /// Replace the data for `key` (e.g. with a mutation response).
    ///
    /// The entry becomes fresh and any fetch already in flight for it is
    /// superseded.
    pub fn write(&self, key: &CacheKey, data: Payload) {
        let notifications = {
            let mut state = self.lock();
            let now = Instant::now();
            let slot = state.slot_mut(key, now);
            slot.applied_seq = slot.issued_seq;
            slot.entry.data = Some(data);
            slot.entry.status = QueryStatus::Success;
            slot.entry.error = None;
            slot.entry.fetched_at = Some(now);
            slot.entry.invalidated = false;
            Notifications::of(slot)
        };
        notifications.send();
    }

    /// Apply `transform` to the data of an existing entry and return the
    /// previous data for rollback.
    ///
    /// Status and `fetched_at` are left alone. Absent keys are not created.
    /// The transform runs under the store lock and must not use the store.
    pub fn patch<F>(&self, key: &CacheKey, transform: F) -> Option<Payload>
    where
        F: FnOnce(Option<&Payload>) -> Option<Payload>,
    {
        self.apply_patch(key, transform).flatten()
    }

    /// Like [`QueryStore::patch`], but distinguishes "no entry" (`None`) from
    /// "entry without data" (`Some(None)`).
    pub(crate) fn apply_patch<F>(&self, key: &CacheKey, transform: F) -> Option<Option<Payload>>
    where
        F: FnOnce(Option<&Payload>) -> Option<Payload>,
    {
        let (previous, notifications) = self.patch_deferred(key, transform)?;
        notifications.send();
        Some(previous)
    }

    /// [`QueryStore::apply_patch`] without notifying; the caller sends the
    /// returned notifications once it holds no locks of its own.
    pub(crate) fn patch_deferred<F>(
        &self,
        key: &CacheKey,
        transform: F,
    ) -> Option<(Option<Payload>, Notifications)>
    where
        F: FnOnce(Option<&Payload>) -> Option<Payload>,
    {
        let mut state = self.lock();
        let slot = state.slots.get_mut(key)?;
        let next = transform(slot.entry.data.as_ref());
        let previous = std::mem::replace(&mut slot.entry.data, next);
        Some((previous, Notifications::of(slot)))
    }

    /// Put back data captured by [`QueryStore::patch`].
    ///
    /// Returns `false` if the entry has been removed in the meantime.
    pub fn restore(&self, key: &CacheKey, previous: Option<Payload>) -> bool {
        match self.restore_deferred(key, previous) {
            Some(notifications) => {
                notifications.send();
                true
            }
            None => false,
        }
    }

    /// [`QueryStore::restore`] without notifying. `None` if the entry is gone.
    pub(crate) fn restore_deferred(
        &self,
        key: &CacheKey,
        previous: Option<Payload>,
    ) -> Option<Notifications> {
        let mut state = self.lock();
        let slot = state.slots.get_mut(key)?;
        slot.entry.data = previous;
        Some(Notifications::of(slot))
    }

    /// Mark every entry matching `pattern` stale without clearing its data.
    ///
    /// Returns the matched keys in canonical order.
    pub fn invalidate(&self, pattern: &KeyPattern) -> Vec<CacheKey> {
        let (mut keys, notifications) = {
            let mut state = self.lock();
            let mut keys = Vec::new();
            let mut notifications = Notifications::default();
            for (key, slot) in state.slots.iter_mut() {
                if pattern.matches(key) {
                    slot.entry.invalidated = true;
                    slot.invalidated_through = slot.issued_seq;
                    notifications.push(slot);
                    keys.push(key.clone());
                }
            }
            (keys, notifications)
        };
        notifications.send();
        keys.sort();
        tracing::debug!(pattern = %pattern, matched = keys.len(), "Invalidated cache entries");
        keys
    }

    /// Evict entries with no subscribers and no fetch in flight that have been
    /// idle for at least the grace period. Returns how many were removed.
    pub fn collect_garbage(&self, now: Instant) -> usize {
        let grace = self.gc_grace;
        let evicted = {
            let mut state = self.lock();
            let before = state.slots.len();
            state.slots.retain(|_, slot| !slot.is_collectable(now, grace));
            before - state.slots.len()
        };
        if evicted > 0 {
            self.stats
                .evictions
                .fetch_add(evicted as u64, std::sync::atomic::Ordering::Relaxed);
            tracing::debug!(evicted, "Evicted idle cache entries");
        }
        evicted
    }

    /// Drop every entry. Outstanding subscriptions become inert.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let removed = state.slots.len();
        state.slots.clear();
        removed
    }

    // ------------------------------------------------------------------------
    // Fetch bookkeeping (scheduler only)
    // ------------------------------------------------------------------------

    pub(crate) fn fetch_check(&self, key: &CacheKey, now: Instant) -> FetchCheck {
        let mut state = self.lock();
        let slot = state.slot_mut(key, now);
        let entry = &slot.entry;
        let due = entry.status == QueryStatus::Idle
            || entry.invalidated
            || (entry.is_stale(now) && !slot.listeners.is_empty());
        FetchCheck {
            due,
            invalidated_through: slot.invalidated_through,
        }
    }

    /// Register a new fetch for `key` and mark it loading.
    pub(crate) fn begin_fetch(&self, key: &CacheKey) -> (u64, Notifications) {
        let mut state = self.lock();
        let slot = state.issue_seq(key, Instant::now());
        slot.in_flight += 1;
        slot.idle_since = None;
        slot.entry.status = QueryStatus::Loading;
        (slot.issued_seq, Notifications::of(slot))
    }

    /// Apply the outcome of fetch `seq` unless it has been superseded.
    pub(crate) fn settle_fetch(
        &self,
        key: &CacheKey,
        seq: u64,
        result: &Result<Payload, FetchError>,
    ) -> Settlement {
        let (settlement, notifications) = {
            let mut state = self.lock();
            let now = Instant::now();
            let Some(slot) = state.slots.get_mut(key) else {
                return Settlement::Evicted;
            };
            if seq <= slot.floor {
                // Started for an entry that has since been cleared.
                return Settlement::Evicted;
            }
            slot.in_flight = slot.in_flight.saturating_sub(1);
            slot.mark_idle_if_unobserved(now);

            if seq <= slot.applied_seq {
                (Settlement::Superseded, Notifications::default())
            } else {
                slot.applied_seq = seq;
                match result {
                    Ok(data) => {
                        slot.entry.data = Some(data.clone());
                        slot.entry.status = QueryStatus::Success;
                        slot.entry.error = None;
                        slot.entry.fetched_at = Some(now);
                        if seq > slot.invalidated_through {
                            slot.entry.invalidated = false;
                        }
                    }
                    Err(err) => {
                        slot.entry.status = QueryStatus::Error;
                        slot.entry.error = Some(err.clone());
                    }
                }
                (Settlement::Applied, Notifications::of(slot))
            }
        };
        notifications.send();
        settlement
    }
}

impl fmt::Debug for QueryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStore")
            .field("entries", &self.len())
            .field("gc_grace", &self.gc_grace)
            .finish()
    }
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Handle keeping a listener registered. Unsubscribes when dropped.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<Mutex<StoreState>>,
    key: CacheKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Stop observing the entry.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(shared) = self.store.upgrade() else {
            return;
        };
        // Listener captures are dropped after the lock is released.
        let removed = {
            let mut state = lock_state(&shared);
            let Some(slot) = state.slots.get_mut(&self.key) else {
                return;
            };
            let (removed, kept): (Vec<(u64, Listener)>, Vec<(u64, Listener)>) =
                std::mem::take(&mut slot.listeners)
                    .into_iter()
                    .partition(|(id, _)| *id == self.id);
            slot.listeners = kept;
            slot.mark_idle_if_unobserved(Instant::now());
            removed
        };
        drop(removed);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
