//! The durable state row for one (viewer, panel) pair.

use crate::panel::{PanelId, ViewerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Schema version written into new rows.
pub const CURRENT_SCHEMA: u32 = 1;

/// Durable record of a panel instance's mutable state.
///
/// At most one row exists per (viewer, panel); the last writer wins. The
/// three maps are free-form: the engine stores and restores them without
/// interpreting their contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Owning viewer.
    pub viewer: ViewerId,
    /// Owning panel.
    pub panel: PanelId,
    /// General per-panel state.
    pub state: BTreeMap<String, Value>,
    /// Saved tab cursors, keyed by tab name.
    pub tab_cursors: BTreeMap<String, Value>,
    /// Caller-defined extras.
    pub custom: BTreeMap<String, Value>,
    /// Last update, set on every mutation.
    pub updated_at: DateTime<Utc>,
    /// Row schema version.
    pub schema_version: u32,
}

impl PersistentState {
    /// A freshly-initialized empty state, used whenever nothing is stored
    /// or storage is unavailable.
    pub fn empty(viewer: ViewerId, panel: PanelId) -> Self {
        Self {
            viewer,
            panel,
            state: BTreeMap::new(),
            tab_cursors: BTreeMap::new(),
            custom: BTreeMap::new(),
            updated_at: Utc::now(),
            schema_version: CURRENT_SCHEMA,
        }
    }

    /// Whether the row carries no data beyond its identity.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty() && self.tab_cursors.is_empty() && self.custom.is_empty()
    }

    /// Set a state entry and bump the timestamp.
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
        self.touch();
    }

    /// Set a tab cursor and bump the timestamp.
    pub fn set_tab_cursor(&mut self, tab: impl Into<String>, value: Value) {
        self.tab_cursors.insert(tab.into(), value);
        self.touch();
    }

    /// Set a custom entry and bump the timestamp.
    pub fn set_custom(&mut self, key: impl Into<String>, value: Value) {
        self.custom.insert(key.into(), value);
        self.touch();
    }

    /// Bump the last-update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state_has_current_schema() {
        let state = PersistentState::empty(ViewerId(1), PanelId::new("shop"));
        assert!(state.is_empty());
        assert_eq!(state.schema_version, CURRENT_SCHEMA);
    }

    #[test]
    fn test_mutation_bumps_timestamp() {
        let mut state = PersistentState::empty(ViewerId(1), PanelId::new("shop"));
        let before = state.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        state.set_state("cursor", serde_json::json!(4));
        assert!(state.updated_at > before);
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut state = PersistentState::empty(ViewerId(9), PanelId::new("bank"));
        state.set_tab_cursor("loans", serde_json::json!(2));
        let json = serde_json::to_string(&state).unwrap();
        let back: PersistentState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
