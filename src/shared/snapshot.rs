//! Copy-on-write shared panel state.
//!
//! A [`SharedSnapshot`] is immutable. Writers build the next snapshot from
//! the prior one plus their delta and swap it in atomically under a short
//! write lock; readers clone the `Arc` and never observe a half-applied
//! mutation.

use crate::panel::{RenderedCell, Slot};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// One complete, immutable version of a shared panel's state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedSnapshot {
    cells: HashMap<Slot, RenderedCell>,
    values: HashMap<String, String>,
    version: u64,
}

impl SharedSnapshot {
    /// An empty version-zero snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Monotonic version counter, bumped on every swap.
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// The shared cell at a slot, if any.
    pub fn cell(&self, slot: Slot) -> Option<&RenderedCell> {
        self.cells.get(&slot)
    }

    /// Iterate shared cells.
    pub fn cells(&self) -> impl Iterator<Item = (Slot, &RenderedCell)> {
        self.cells.iter().map(|(slot, cell)| (*slot, cell))
    }

    /// A shared value, if set.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Next snapshot with one cell replaced.
    #[must_use]
    pub fn with_cell(&self, slot: Slot, cell: RenderedCell) -> Self {
        let mut next = self.clone();
        next.cells.insert(slot, cell);
        next.version += 1;
        next
    }

    /// Next snapshot with one value replaced.
    #[must_use]
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.values.insert(key.into(), value.into());
        next.version += 1;
        next
    }
}

/// The swap point for one shared panel's snapshot.
pub struct SharedContext {
    snapshot: RwLock<Arc<SharedSnapshot>>,
}

impl SharedContext {
    /// Wrap an initial snapshot.
    pub fn new(initial: SharedSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(initial)),
        }
    }

    /// The current complete snapshot.
    pub fn load(&self) -> Arc<SharedSnapshot> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Read-modify-write the whole snapshot under the write lock.
    ///
    /// `f` receives the prior snapshot and returns the replacement; the
    /// swap is atomic from any reader's point of view.
    pub fn update(&self, f: impl FnOnce(&SharedSnapshot) -> SharedSnapshot) -> Arc<SharedSnapshot> {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(f(guard.as_ref()));
        *guard = Arc::clone(&next);
        next
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new(SharedSnapshot::empty())
    }
}
