//! Persistence: durable panel state with write-behind batching.

mod manager;
mod retry;
mod state;
mod store;

pub use manager::{
    PersistOptions, StateManager, SweepReport, DEFAULT_READ_TTL, DEFAULT_SWEEP_INTERVAL,
};
pub use retry::RetryPolicy;
pub use state::{PersistentState, CURRENT_SCHEMA};
pub use store::{DurableStore, JsonFileStore, MemoryStore};
