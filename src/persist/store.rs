//! Durable store driver: the trait the engine consumes, plus the two
//! bundled implementations.
//!
//! Row shape: viewer id, panel id, three free-form JSON maps, timestamp,
//! schema version, with uniqueness on (viewer, panel). The engine only ever
//! talks to [`DurableStore`]; swapping in a database-backed driver is a
//! host concern.

use crate::error::StoreError;
use crate::panel::{PanelId, ViewerId};
use crate::persist::PersistentState;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Storage driver for persistent panel state.
pub trait DurableStore: Send + Sync {
    /// Insert or replace the row for `(state.viewer, state.panel)`.
    fn upsert(&self, state: &PersistentState) -> Result<(), StoreError>;

    /// Fetch the row for (viewer, panel), if one exists.
    fn select(&self, viewer: ViewerId, panel: &PanelId)
        -> Result<Option<PersistentState>, StoreError>;

    /// Remove the row for (viewer, panel). Removing a missing row is not an
    /// error.
    fn delete(&self, viewer: ViewerId, panel: &PanelId) -> Result<(), StoreError>;

    /// Upsert many rows as one transaction: either all land or none do.
    fn upsert_batch(&self, states: &[PersistentState]) -> Result<(), StoreError>;
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<(ViewerId, PanelId), PersistentState>>,
    failing: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated unavailability (every operation errors while set).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(ViewerId, PanelId), PersistentState>> {
        self.rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl DurableStore for MemoryStore {
    fn upsert(&self, state: &PersistentState) -> Result<(), StoreError> {
        self.check()?;
        self.lock()
            .insert((state.viewer, state.panel.clone()), state.clone());
        Ok(())
    }

    fn select(
        &self,
        viewer: ViewerId,
        panel: &PanelId,
    ) -> Result<Option<PersistentState>, StoreError> {
        self.check()?;
        Ok(self.lock().get(&(viewer, panel.clone())).cloned())
    }

    fn delete(&self, viewer: ViewerId, panel: &PanelId) -> Result<(), StoreError> {
        self.check()?;
        self.lock().remove(&(viewer, panel.clone()));
        Ok(())
    }

    fn upsert_batch(&self, states: &[PersistentState]) -> Result<(), StoreError> {
        self.check()?;
        let mut rows = self.lock();
        for state in states {
            rows.insert((state.viewer, state.panel.clone()), state.clone());
        }
        Ok(())
    }
}

/// File-backed store: one JSON document per (viewer, panel) row.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Uniqueness on (viewer, panel) holds through the file name.
    fn row_path(&self, viewer: ViewerId, panel: &PanelId) -> PathBuf {
        let panel: String = panel
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        self.root.join(format!("{}_{panel}.json", viewer.0))
    }

    fn write_row(path: &Path, state: &PersistentState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state).map_err(|source| {
            StoreError::Serialization {
                viewer: state.viewer,
                panel: state.panel.clone(),
                source,
            }
        })?;
        // Write-then-rename keeps a crash from leaving a torn row.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl DurableStore for JsonFileStore {
    fn upsert(&self, state: &PersistentState) -> Result<(), StoreError> {
        Self::write_row(&self.row_path(state.viewer, &state.panel), state)
    }

    fn select(
        &self,
        viewer: ViewerId,
        panel: &PanelId,
    ) -> Result<Option<PersistentState>, StoreError> {
        let path = self.row_path(viewer, panel);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let state = serde_json::from_slice(&bytes).map_err(|source| {
            StoreError::Serialization {
                viewer,
                panel: panel.clone(),
                source,
            }
        })?;
        Ok(Some(state))
    }

    fn delete(&self, viewer: ViewerId, panel: &PanelId) -> Result<(), StoreError> {
        let path = self.row_path(viewer, panel);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn upsert_batch(&self, states: &[PersistentState]) -> Result<(), StoreError> {
        // Stage every row first so a failure publishes nothing.
        let mut staged = Vec::with_capacity(states.len());
        for state in states {
            let path = self.row_path(state.viewer, &state.panel);
            let tmp = path.with_extension("json.batch");
            let json = serde_json::to_vec_pretty(state).map_err(|source| {
                StoreError::Serialization {
                    viewer: state.viewer,
                    panel: state.panel.clone(),
                    source,
                }
            })?;
            if let Err(source) = fs::write(&tmp, json) {
                for (tmp, _) in &staged {
                    let _ = fs::remove_file(tmp);
                }
                return Err(StoreError::Io { path: tmp, source });
            }
            staged.push((tmp, path));
        }
        for (tmp, path) in &staged {
            if let Err(source) = fs::rename(tmp, path) {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(viewer: u64, panel: &str) -> PersistentState {
        let mut state = PersistentState::empty(ViewerId(viewer), PanelId::new(panel));
        state.set_state("page", serde_json::json!(2));
        state
    }

    #[test]
    fn test_memory_store_upsert_select_delete() {
        let store = MemoryStore::new();
        let state = row(1, "shop");
        store.upsert(&state).unwrap();
        let loaded = store.select(ViewerId(1), &PanelId::new("shop")).unwrap();
        assert_eq!(loaded, Some(state));
        store.delete(ViewerId(1), &PanelId::new("shop")).unwrap();
        assert!(store.select(ViewerId(1), &PanelId::new("shop")).unwrap().is_none());
    }

    #[test]
    fn test_memory_store_simulated_outage() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.upsert(&row(1, "shop")).is_err());
        store.set_failing(false);
        assert!(store.upsert(&row(1, "shop")).is_ok());
    }

    #[test]
    fn test_memory_store_last_writer_wins() {
        let store = MemoryStore::new();
        store.upsert(&row(1, "shop")).unwrap();
        let mut newer = row(1, "shop");
        newer.set_state("page", serde_json::json!(9));
        store.upsert(&newer).unwrap();
        assert_eq!(store.len(), 1);
        let loaded = store
            .select(ViewerId(1), &PanelId::new("shop"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.state["page"], serde_json::json!(9));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let state = row(7, "bank");
        store.upsert(&state).unwrap();
        let loaded = store.select(ViewerId(7), &PanelId::new("bank")).unwrap();
        assert_eq!(loaded, Some(state));
    }

    #[test]
    fn test_file_store_select_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.select(ViewerId(1), &PanelId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn test_file_store_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.delete(ViewerId(1), &PanelId::new("nope")).is_ok());
    }

    #[test]
    fn test_file_store_batch_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store
            .upsert_batch(&[row(1, "shop"), row(2, "bank")])
            .unwrap();
        assert!(store.select(ViewerId(1), &PanelId::new("shop")).unwrap().is_some());
        assert!(store.select(ViewerId(2), &PanelId::new("bank")).unwrap().is_some());
    }

    #[test]
    fn test_file_store_sanitizes_panel_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let state = row(1, "../weird/panel");
        store.upsert(&state).unwrap();
        let loaded = store
            .select(ViewerId(1), &PanelId::new("../weird/panel"))
            .unwrap();
        assert_eq!(loaded, Some(state));
    }
}
