//! Actor layer: the control loop, its timing signal, and the worker pool.

mod engine;
mod messages;
mod ticker;
mod workers;

pub use engine::{
    Engine, EngineConfig, EngineHandle, NAV_NEXT_TEMPLATE, NAV_PAGE_TEMPLATE, NAV_PREV_TEMPLATE,
};
pub use messages::{
    ActionDispatcher, ClickKind, DefinitionLoader, FrameSink, Interaction, LoopMessage, PostedFn,
};
pub use ticker::{Tick, Ticker, DEFAULT_TICK_INTERVAL};
pub use workers::{Completer, Promise, WorkerPool};
