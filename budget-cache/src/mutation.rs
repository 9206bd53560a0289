//! Mutation controller: optimistic patch, write, then commit or roll back.
//!
//! A mutation patches the cached views it affects before the request is
//! sent, so the UI reflects the change at once. On success the captured
//! values are dropped and the kind's row of the invalidation graph is marked
//! stale; on failure every patched key is put back. Writes are never retried.

use budget_core::{
    new_mutation_id, CacheKey, FetchError, KeyPart, KeyPattern, MutationError, MutationId,
    MutationKind, Payload,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::invalidation::InvalidationGraph;
use crate::store::{Notifications, QueryStore};

/// Pure transform from the current cached data to the optimistic data.
pub type PatchFn = Arc<dyn Fn(Option<&Payload>) -> Option<Payload> + Send + Sync>;

// ============================================================================
// DESCRIPTORS
// ============================================================================

/// An optimistic change applied to every cached key matching `pattern`.
#[derive(Clone)]
pub struct OptimisticPatch {
    pattern: KeyPattern,
    transform: PatchFn,
}

impl OptimisticPatch {
    pub fn new<F>(pattern: KeyPattern, transform: F) -> Self
    where
        F: Fn(Option<&Payload>) -> Option<Payload> + Send + Sync + 'static,
    {
        Self {
            pattern,
            transform: Arc::new(transform),
        }
    }

    pub fn pattern(&self) -> &KeyPattern {
        &self.pattern
    }

    /// Run the transform against `current`.
    pub fn apply(&self, current: Option<&Payload>) -> Option<Payload> {
        (self.transform)(current)
    }
}

impl fmt::Debug for OptimisticPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticPatch")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Everything the controller needs to know about one write.
#[derive(Debug, Clone)]
pub struct MutationDescriptor {
    pub kind: MutationKind,
    /// Parameters identifying the written entity, for `Target` dependents.
    pub target: Vec<KeyPart>,
    pub optimistic: Vec<OptimisticPatch>,
}

impl MutationDescriptor {
    pub fn new(kind: MutationKind) -> Self {
        Self {
            kind,
            target: Vec::new(),
            optimistic: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: Vec<KeyPart>) -> Self {
        self.target = target;
        self
    }

    pub fn with_patch(mut self, patch: OptimisticPatch) -> Self {
        self.optimistic.push(patch);
        self
    }

    /// Patterns marked stale once this mutation settles.
    pub fn invalidates(&self) -> Vec<KeyPattern> {
        InvalidationGraph::patterns(self.kind, &self.target)
    }
}

// ============================================================================
// ROLLBACK
// ============================================================================

/// How overlapping optimistic patches on the same key are undone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackMode {
    /// Restore the value this mutation captured. With overlapping mutations a
    /// failure can put back another mutation's intermediate state.
    #[default]
    Lifo,
    /// Track patches per key as layers over the original value and rebuild
    /// from the surviving layers when one mutation fails.
    Layered,
}

impl fmt::Display for RollbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackMode::Lifo => f.write_str("lifo"),
            RollbackMode::Layered => f.write_str("layered"),
        }
    }
}

struct Captured {
    key: CacheKey,
    previous: Option<Payload>,
    /// Index of the patch that produced this capture.
    patch: usize,
}

struct Layer {
    mutation: MutationId,
    transform: PatchFn,
    committed: bool,
}

struct KeyLayers {
    base: Option<Payload>,
    layers: Vec<Layer>,
}

impl KeyLayers {
    fn rebuild(&self) -> Option<Payload> {
        self.layers
            .iter()
            .fold(self.base.clone(), |data, layer| (layer.transform)(data.as_ref()))
    }

    fn all_committed(&self) -> bool {
        self.layers.iter().all(|layer| layer.committed)
    }
}

type LayerLedger = HashMap<CacheKey, KeyLayers>;

// ============================================================================
// CONTROLLER
// ============================================================================

/// Runs writes with optimistic patches and reconciles the cache afterwards.
#[derive(Clone)]
pub struct MutationController {
    store: QueryStore,
    mode: RollbackMode,
    ledger: Arc<Mutex<LayerLedger>>,
}

impl MutationController {
    pub fn new(store: QueryStore, mode: RollbackMode) -> Self {
        Self {
            store,
            mode,
            ledger: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn mode(&self) -> RollbackMode {
        self.mode
    }

    pub fn store(&self) -> &QueryStore {
        &self.store
    }

    /// Keys with layered patches still awaiting their mutation.
    pub fn pending_layers(&self) -> usize {
        self.lock_ledger().len()
    }

    fn lock_ledger(&self) -> MutexGuard<'_, LayerLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Patch, await `request`, then commit or roll back.
    ///
    /// If the returned future is dropped before `request` finishes, the
    /// optimistic patches are rolled back and nothing is invalidated.
    pub async fn perform<T, Fut>(
        &self,
        descriptor: &MutationDescriptor,
        request: Fut,
    ) -> Result<T, MutationError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let pending = self.begin(descriptor);
        tracing::debug!(
            mutation_id = %pending.id,
            kind = %descriptor.kind,
            patched = pending.captured.len(),
            "Mutation started"
        );

        match request.await {
            Ok(value) => {
                let id = pending.id;
                pending.commit();
                let invalidated = self.invalidate(descriptor);
                tracing::info!(
                    mutation_id = %id,
                    kind = %descriptor.kind,
                    invalidated,
                    "Mutation committed"
                );
                Ok(value)
            }
            Err(err) => {
                let id = pending.id;
                pending.roll_back();
                if err.is_not_found() {
                    self.invalidate(descriptor);
                }
                tracing::warn!(
                    mutation_id = %id,
                    kind = %descriptor.kind,
                    error = %err,
                    "Mutation failed, optimistic changes rolled back"
                );
                Err(MutationError::Request {
                    kind: descriptor.kind,
                    source: err,
                })
            }
        }
    }

    fn invalidate(&self, descriptor: &MutationDescriptor) -> usize {
        descriptor
            .invalidates()
            .iter()
            .map(|pattern| self.store.invalidate(pattern).len())
            .sum()
    }

    fn begin(&self, descriptor: &MutationDescriptor) -> PendingMutation<'_> {
        let id = new_mutation_id();
        let (captured, notifications) = match self.mode {
            RollbackMode::Lifo => self.apply_captured(&descriptor.optimistic),
            RollbackMode::Layered => {
                let mut ledger = self.lock_ledger();
                let (captured, notifications) = self.apply_captured(&descriptor.optimistic);
                for item in &captured {
                    // The first pending mutation on a key records its base.
                    let layers = ledger.entry(item.key.clone()).or_insert_with(|| KeyLayers {
                        base: item.previous.clone(),
                        layers: Vec::new(),
                    });
                    layers.layers.push(Layer {
                        mutation: id,
                        transform: Arc::clone(&descriptor.optimistic[item.patch].transform),
                        committed: false,
                    });
                }
                (captured, notifications)
            }
        };
        // Listeners may call back into the controller; the ledger is unlocked.
        notifications.send();
        PendingMutation {
            controller: self,
            id,
            captured,
            settled: false,
        }
    }

    /// Apply every patch to every matching key, capturing previous values in
    /// application order. Listeners are notified only when the caller sends
    /// the returned notifications.
    fn apply_captured(&self, patches: &[OptimisticPatch]) -> (Vec<Captured>, Notifications) {
        let mut captured = Vec::new();
        let mut notifications = Notifications::default();
        for (index, patch) in patches.iter().enumerate() {
            for key in self.store.keys_matching(&patch.pattern) {
                if let Some((previous, notify)) =
                    self.store.patch_deferred(&key, |data| patch.apply(data))
                {
                    notifications.extend(notify);
                    captured.push(Captured {
                        key,
                        previous,
                        patch: index,
                    });
                }
            }
        }
        (captured, notifications)
    }

    fn commit(&self, id: MutationId, captured: &[Captured]) {
        if self.mode == RollbackMode::Lifo {
            return;
        }
        let mut ledger = self.lock_ledger();
        for item in captured {
            let Some(layers) = ledger.get_mut(&item.key) else {
                continue;
            };
            for layer in layers.layers.iter_mut().filter(|l| l.mutation == id) {
                layer.committed = true;
            }
            if layers.all_committed() {
                ledger.remove(&item.key);
            }
        }
    }

    fn roll_back(&self, id: MutationId, captured: Vec<Captured>) {
        match self.mode {
            RollbackMode::Lifo => {
                for item in captured.into_iter().rev() {
                    self.store.restore(&item.key, item.previous);
                }
            }
            RollbackMode::Layered => {
                let mut notifications = Notifications::default();
                let mut ledger = self.lock_ledger();
                let mut keys: Vec<CacheKey> = captured.into_iter().map(|c| c.key).collect();
                keys.sort();
                keys.dedup();
                for key in keys {
                    let Some(layers) = ledger.get_mut(&key) else {
                        continue;
                    };
                    layers.layers.retain(|layer| layer.mutation != id);
                    if let Some(notify) = self.store.restore_deferred(&key, layers.rebuild()) {
                        notifications.extend(notify);
                    }
                    if layers.all_committed() {
                        ledger.remove(&key);
                    }
                }
                drop(ledger);
                notifications.send();
            }
        }
    }
}

impl fmt::Debug for MutationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationController")
            .field("mode", &self.mode)
            .field("pending_layers", &self.pending_layers())
            .finish()
    }
}

/// Optimistic state of one mutation that has not settled yet.
///
/// Dropping it unsettled (the caller abandoned the mutation) rolls back.
struct PendingMutation<'a> {
    controller: &'a MutationController,
    id: MutationId,
    captured: Vec<Captured>,
    settled: bool,
}

impl PendingMutation<'_> {
    fn commit(mut self) {
        self.settled = true;
        self.controller.commit(self.id, &self.captured);
    }

    fn roll_back(mut self) {
        self.settled = true;
        let captured = std::mem::take(&mut self.captured);
        self.controller.roll_back(self.id, captured);
    }
}

impl Drop for PendingMutation<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!(mutation_id = %self.id, "Mutation abandoned, rolling back");
        let captured = std::mem::take(&mut self.captured);
        self.controller.roll_back(self.id, captured);
    }
}

// ============================================================================
// TESTS
// ============================================================================
