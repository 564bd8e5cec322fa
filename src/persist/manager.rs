//! State persistence manager: write-behind batching over the durable
//! store.
//!
//! Every mutation marks the key dirty *before* the durable write is
//! attempted, so an update can never race the sweep into oblivion. Writes
//! run on the worker pool under a bounded retry policy; a failed write
//! stays dirty and is re-flushed by the periodic sweep, which bounds
//! unsaved-work loss on ungraceful shutdown to one sweep interval. Nothing
//! here ever raises a storage failure to the caller, and nothing here runs
//! on the control loop for longer than a map insert.

use crate::actor::{Promise, WorkerPool};
use crate::panel::{PanelId, ViewerId};
use crate::persist::{DurableStore, PersistentState, RetryPolicy};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default lifetime of a read-cache entry.
pub const DEFAULT_READ_TTL: Duration = Duration::from_secs(60);
/// Default interval between dirty-state sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

type Key = (ViewerId, PanelId);

/// Persistence tuning knobs.
#[derive(Debug, Clone)]
pub struct PersistOptions {
    /// Read-cache entry lifetime.
    pub read_ttl: Duration,
    /// Retry policy for durable operations.
    pub retry: RetryPolicy,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            read_ttl: DEFAULT_READ_TTL,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one sweep, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows flushed durably.
    pub flushed: usize,
    /// Rows that stayed dirty because the batch failed.
    pub retained: usize,
}

struct CachedRead {
    state: PersistentState,
    cached_at: Instant,
}

/// Maps shared between the control loop and worker completions.
#[derive(Default)]
struct Tracking {
    read_cache: Mutex<HashMap<Key, CachedRead>>,
    dirty: Mutex<HashMap<Key, PersistentState>>,
    /// Keys with a write job already running. One job per key at a time
    /// keeps store writes ordered; rapid saves coalesce into it.
    in_flight: Mutex<std::collections::HashSet<Key>>,
}

impl Tracking {
    fn reads(&self) -> MutexGuard<'_, HashMap<Key, CachedRead>> {
        self.read_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn dirty(&self) -> MutexGuard<'_, HashMap<Key, PersistentState>> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, std::collections::HashSet<Key>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_read(&self, state: PersistentState) {
        self.reads().insert(
            (state.viewer, state.panel.clone()),
            CachedRead {
                state,
                cached_at: Instant::now(),
            },
        );
    }

    /// Clear a dirty entry unless a newer write re-dirtied the key.
    fn settle(&self, key: &Key, written: &PersistentState) {
        let mut dirty = self.dirty();
        if let Some(pending) = dirty.get(key) {
            if pending.updated_at <= written.updated_at {
                dirty.remove(key);
            }
        }
    }
}

/// Owns the durable representation of panel-instance state.
pub struct StateManager {
    store: Option<Arc<dyn DurableStore>>,
    tracking: Arc<Tracking>,
    pool: Arc<WorkerPool>,
    options: PersistOptions,
}

impl StateManager {
    /// Create a manager over `store`. Pass `None` to disable storage: every
    /// operation then degrades to the in-memory fallback and panels still
    /// open.
    pub fn new(
        store: Option<Arc<dyn DurableStore>>,
        pool: Arc<WorkerPool>,
        options: PersistOptions,
    ) -> Self {
        Self {
            store,
            tracking: Arc::new(Tracking::default()),
            pool,
            options,
        }
    }

    /// Whether durable storage is available at all.
    pub fn is_durable(&self) -> bool {
        self.store.is_some()
    }

    /// Number of keys awaiting a durable write.
    pub fn dirty_len(&self) -> usize {
        self.tracking.dirty().len()
    }

    /// Save a state row.
    ///
    /// The key is marked dirty immediately; the upsert runs async with
    /// retry. The promise resolves when the attempt settles either way:
    /// failures are logged and left for the sweep, never raised.
    pub fn save(&self, state: PersistentState) -> Promise<()> {
        let Some(store) = self.store.clone() else {
            return Promise::ready(());
        };

        let key = (state.viewer, state.panel.clone());
        // Dirty before write: the sweep must never miss an in-flight update.
        self.tracking.dirty().insert(key.clone(), state);

        // A write job for this key is already running; it re-reads the
        // dirty map after each upsert, so this save rides along.
        if !self.tracking.in_flight().insert(key.clone()) {
            return Promise::ready(());
        }

        let tracking = Arc::clone(&self.tracking);
        let retry = self.options.retry.clone();
        self.pool.submit(move || loop {
            // Always write the newest pending version.
            let Some(state) = tracking.dirty().get(&key).cloned() else {
                // Release the claim while holding it against the dirty
                // map: a save that re-dirtied the key after the check
                // above is either visible here, or blocks on the claim
                // and spawns its own job once it is gone.
                let mut in_flight = tracking.in_flight();
                if tracking.dirty().contains_key(&key) {
                    drop(in_flight);
                    continue;
                }
                in_flight.remove(&key);
                return;
            };
            match retry.run(|| store.upsert(&state)) {
                Ok(()) => {
                    tracking.settle(&key, &state);
                    tracking.cache_read(state);
                    // Re-dirtied mid-write goes around again.
                }
                Err(err) => {
                    // Still dirty; the next sweep picks it up.
                    warn!(viewer = %key.0, panel = %key.1, %err, "state save failed, deferred to sweep");
                    tracking.in_flight().remove(&key);
                    return;
                }
            }
        })
    }

    /// Load the state row for (viewer, panel).
    ///
    /// Dirty entries win (they are the newest version), then the read
    /// cache, then the store. A missing row, a store failure, or disabled
    /// storage all resolve to a freshly-initialized empty state; this
    /// never refuses to open a panel.
    pub fn load(&self, viewer: ViewerId, panel: &PanelId) -> Promise<PersistentState> {
        let key = (viewer, panel.clone());
        if let Some(pending) = self.tracking.dirty().get(&key) {
            return Promise::ready(pending.clone());
        }
        {
            let reads = self.tracking.reads();
            if let Some(cached) = reads.get(&key) {
                if cached.cached_at.elapsed() < self.options.read_ttl {
                    return Promise::ready(cached.state.clone());
                }
            }
        }
        let Some(store) = self.store.clone() else {
            return Promise::ready(PersistentState::empty(viewer, panel.clone()));
        };

        let tracking = Arc::clone(&self.tracking);
        let retry = self.options.retry.clone();
        let panel = panel.clone();
        self.pool.submit(move || {
            match retry.run(|| store.select(viewer, &panel)) {
                Ok(Some(state)) => {
                    tracking.cache_read(state.clone());
                    state
                }
                Ok(None) => PersistentState::empty(viewer, panel),
                Err(err) => {
                    warn!(%viewer, %panel, %err, "state load failed, serving fresh state");
                    PersistentState::empty(viewer, panel)
                }
            }
        })
    }

    /// Delete the state row for (viewer, panel).
    pub fn delete(&self, viewer: ViewerId, panel: &PanelId) -> Promise<()> {
        let key = (viewer, panel.clone());
        self.tracking.dirty().remove(&key);
        self.tracking.reads().remove(&key);
        let Some(store) = self.store.clone() else {
            return Promise::ready(());
        };
        let retry = self.options.retry.clone();
        let panel = panel.clone();
        let tracking = Arc::clone(&self.tracking);
        self.pool.submit(move || {
            if let Err(err) = retry.run(|| store.delete(viewer, &panel)) {
                warn!(%viewer, %panel, %err, "state delete failed");
            }
            // Clear again: an in-flight save may have re-cached the row
            // between the caller's removal and this delete landing.
            let key = (viewer, panel);
            tracking.dirty().remove(&key);
            tracking.reads().remove(&key);
        })
    }

    /// Flush every dirty row as one transactional batch.
    ///
    /// Called by the engine on its sweep cadence. Rows re-dirtied while the
    /// batch is in flight stay dirty for the next sweep.
    pub fn sweep(&self) -> Promise<SweepReport> {
        let Some(store) = self.store.clone() else {
            return Promise::ready(SweepReport::default());
        };
        let batch: Vec<PersistentState> = self.tracking.dirty().values().cloned().collect();
        if batch.is_empty() {
            return Promise::ready(SweepReport::default());
        }

        let tracking = Arc::clone(&self.tracking);
        let retry = self.options.retry.clone();
        self.pool.submit(move || {
            match retry.run(|| store.upsert_batch(&batch)) {
                Ok(()) => {
                    let flushed = batch.len();
                    for state in batch {
                        let key = (state.viewer, state.panel.clone());
                        tracking.settle(&key, &state);
                        tracking.cache_read(state);
                    }
                    debug!(flushed, "dirty-state sweep flushed");
                    SweepReport {
                        flushed,
                        retained: 0,
                    }
                }
                Err(err) => {
                    warn!(%err, retained = batch.len(), "dirty-state sweep failed, retrying next interval");
                    SweepReport {
                        flushed: 0,
                        retained: batch.len(),
                    }
                }
            }
        })
    }
}
