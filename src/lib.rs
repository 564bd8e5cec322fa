//! # Panelforge
//!
//! An interactive panel rendering and state engine.
//!
//! Panelforge turns declarative panel definitions into rendered frames for
//! many concurrent viewers: a grid of compiled cells per panel, paginated
//! dynamic content, scheduled animations, durable per-viewer state, and
//! shared panels several viewers mutate together.
//!
//! ## Core Concepts
//!
//! - **Single control loop**: one thread exclusively owns every open panel
//!   instance; workers handle I/O and re-enter the loop as posted closures
//! - **Rendered-cell cache**: identical template + context compiles are
//!   shared across viewers, with TTL and LRU eviction
//! - **Write-behind persistence**: state is dirty-before-write, retried
//!   with backoff, and swept in transactional batches
//! - **Copy-on-write shared panels**: immutable snapshots swapped under a
//!   version counter, broadcasts debounced and coalesced per slot
//!
//! ## Example
//!
//! ```rust,ignore
//! use panelforge::actor::{Engine, EngineConfig};
//!
//! let mut engine = Engine::with_config(config, loader, sink, dispatcher);
//! let handle = engine.handle();
//! handle.open(viewer, panel_id)?;
//! engine.run();
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod actor;
pub mod anim;
pub mod context;
pub mod error;
pub mod layout;
pub mod panel;
pub mod persist;
pub mod render;
pub mod shared;

// Re-exports for convenience
pub use actor::{ActionDispatcher, DefinitionLoader, Engine, EngineConfig, FrameSink};
pub use context::RenderContext;
pub use error::{EngineError, StoreError};
pub use panel::{
    PanelDefinition, PanelId, RenderedCell, RenderedFrame, Slot, TemplateId, ViewerId,
};
pub use persist::{DurableStore, PersistentState, StateManager};
