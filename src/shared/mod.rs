//! Shared panels: one surface viewed and mutated by several viewers.

mod coordinator;
mod snapshot;

pub use coordinator::{SessionUpdate, SharedPanelCoordinator, DEFAULT_DEBOUNCE_TICKS};
pub use snapshot::{SharedContext, SharedSnapshot};
