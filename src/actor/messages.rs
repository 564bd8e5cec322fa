//! Loop messages and the traits the engine's host implements.
//!
//! All engine mutation funnels through [`LoopMessage`]: host threads and
//! worker completions post messages, the control loop drains them. The
//! three consumer traits ([`DefinitionLoader`], [`FrameSink`],
//! [`ActionDispatcher`]) are the engine's only view of the outside world;
//! it never builds wire messages or interprets actions itself.

use crate::actor::Engine;
use crate::error::EngineError;
use crate::panel::{PanelDefinition, PanelId, RenderedCell, RenderedFrame, Slot, ViewerId};
use std::sync::Arc;

/// Mouse button (or equivalent) of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClickKind {
    /// Primary click.
    Left,
    /// Secondary click.
    Right,
    /// Primary click with the shift modifier.
    ShiftLeft,
    /// Secondary click with the shift modifier.
    ShiftRight,
    /// Middle click.
    Middle,
}

/// One viewer interaction with a panel cell, fully resolved.
///
/// Handed to the [`ActionDispatcher`] verbatim; the engine attaches the
/// template's action specs but never interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    /// The interacting viewer.
    pub viewer: ViewerId,
    /// The panel interacted with.
    pub panel: PanelId,
    /// The clicked slot.
    pub slot: Slot,
    /// Click button and modifiers.
    pub click: ClickKind,
    /// Content the viewer is holding or dragging, if any.
    pub held: Option<String>,
    /// Action specs from the clicked cell's template.
    pub actions: Vec<String>,
}

/// A closure posted back onto the control loop.
pub type PostedFn = Box<dyn FnOnce(&mut Engine) + Send + 'static>;

/// Commands drained by the control loop.
pub enum LoopMessage {
    /// Open a panel for a viewer.
    Open {
        /// The viewer opening the panel.
        viewer: ViewerId,
        /// The panel to open.
        panel: PanelId,
    },
    /// Close one viewer's panel.
    Close {
        /// The viewer closing the panel.
        viewer: ViewerId,
        /// The panel to close.
        panel: PanelId,
    },
    /// A viewer clicked a cell.
    Interact {
        /// The interacting viewer.
        viewer: ViewerId,
        /// The panel interacted with.
        panel: PanelId,
        /// The clicked slot.
        slot: Slot,
        /// Click button and modifiers.
        click: ClickKind,
        /// Content the viewer is holding, if any.
        held: Option<String>,
    },
    /// A viewer disconnected; close everything they had open.
    Disconnect {
        /// The departing viewer.
        viewer: ViewerId,
    },
    /// Write a cell into a shared panel on behalf of a viewer.
    SharedWrite {
        /// The originating viewer.
        viewer: ViewerId,
        /// The shared panel.
        panel: PanelId,
        /// Target slot.
        slot: Slot,
        /// The cell to publish.
        cell: RenderedCell,
    },
    /// Run a closure on the loop thread. Worker completions that need to
    /// touch panel state re-enter this way.
    Invoke(PostedFn),
    /// Stop the control loop.
    Shutdown,
}

impl std::fmt::Debug for LoopMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { viewer, panel } => {
                f.debug_struct("Open").field("viewer", viewer).field("panel", panel).finish()
            }
            Self::Close { viewer, panel } => {
                f.debug_struct("Close").field("viewer", viewer).field("panel", panel).finish()
            }
            Self::Interact { viewer, panel, slot, .. } => f
                .debug_struct("Interact")
                .field("viewer", viewer)
                .field("panel", panel)
                .field("slot", slot)
                .finish_non_exhaustive(),
            Self::Disconnect { viewer } => {
                f.debug_struct("Disconnect").field("viewer", viewer).finish()
            }
            Self::SharedWrite { viewer, panel, slot, .. } => f
                .debug_struct("SharedWrite")
                .field("viewer", viewer)
                .field("panel", panel)
                .field("slot", slot)
                .finish_non_exhaustive(),
            Self::Invoke(_) => f.write_str("Invoke(..)"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Resolves panel definitions by id.
pub trait DefinitionLoader: Send {
    /// Load (or fetch from an internal registry) the definition for `panel`.
    fn load_definition(&self, panel: &PanelId) -> Result<Arc<PanelDefinition>, EngineError>;
}

/// Receives rendered frames for delivery to viewers.
///
/// The engine calls this once per dirty instance per tick, with the full
/// frame. Transport, encoding, and partial-update diffing are the sink's
/// business.
pub trait FrameSink: Send {
    /// Deliver one frame to one viewer.
    fn deliver(&self, viewer: ViewerId, panel: &PanelId, frame: RenderedFrame);
}

/// Receives resolved interactions.
pub trait ActionDispatcher: Send {
    /// Handle one interaction. Called on the loop thread; heavy work
    /// belongs on the worker pool.
    fn dispatch(&self, interaction: Interaction);
}
