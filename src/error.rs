//! Error taxonomy for the panel engine.
//!
//! Failures are classified by how the engine reacts to them, not by where
//! they originate. Degraded dependencies fall back, transient storage
//! retries and defers, bad definitions become placeholder cells, and
//! off-loop mutation is refused. No variant here may prevent a panel from
//! opening or closing.

use crate::panel::{PanelId, TemplateId, ViewerId};
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the durable store driver.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is reachable but the operation failed transiently.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Underlying file I/O failed.
    #[error("store I/O failed at {path:?}")]
    Io {
        /// Path the operation touched.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A state row could not be encoded or decoded.
    #[error("state serialization failed for viewer {viewer} panel {panel}")]
    Serialization {
        /// Owning viewer.
        viewer: ViewerId,
        /// Owning panel.
        panel: PanelId,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced by the engine to its callers.
///
/// Most failures never reach this type: compile failures become placeholder
/// cells and storage failures stay inside the persistence manager. What
/// remains is the small set a caller can actually act on.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No definition exists for the requested panel.
    #[error("unknown panel definition: {0}")]
    UnknownDefinition(PanelId),

    /// A definition is structurally unusable (bad size, bad layout rows).
    #[error("invalid definition for panel {panel}: {reason}")]
    InvalidDefinition {
        /// The offending panel.
        panel: PanelId,
        /// Human-readable cause.
        reason: String,
    },

    /// A cell template failed to compile. Internal use only; the compiler
    /// converts this into a placeholder cell before it can propagate.
    #[error("failed to compile template {template}: {reason}")]
    CompileFailure {
        /// The offending template.
        template: TemplateId,
        /// Human-readable cause.
        reason: String,
    },

    /// Mutation was attempted from a thread other than the control loop.
    #[error("panel state mutated off the control loop")]
    OffLoopMutation,

    /// The control loop has shut down and no longer accepts messages.
    #[error("engine loop is not running")]
    LoopClosed,

    /// Durable storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
