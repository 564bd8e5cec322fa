//! Animations: time-based and state-reactive cell sequences.

mod scheduler;

pub use scheduler::{AnimationScheduler, InstanceMap, TickReport, DEFAULT_MAX_ADVANCES_PER_TICK};

use crate::panel::{CellTemplate, Slot};

/// What drives an animation forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnimationKind {
    /// A fixed sequence of visual ids, advanced on a timer.
    FrameSequence {
        /// Visual ids shown in order.
        frames: Vec<String>,
        /// Restart from the first frame after the last, instead of
        /// finishing.
        looping: bool,
    },
    /// Re-renders whenever due, reading a watched context value.
    StateReactive {
        /// Context key (substitution value or keyed data) to watch.
        watch_key: String,
    },
}

/// Declarative animation attached to a panel definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationConfig {
    /// Name, unique within the definition.
    pub name: String,
    /// Target position.
    pub slot: Slot,
    /// Template compiled for every frame.
    pub template: CellTemplate,
    /// Drive mode.
    pub kind: AnimationKind,
    /// Ticks between advances. Zero is corrected to one.
    pub interval_ticks: u32,
}

impl AnimationConfig {
    /// Frame-sequence animation.
    pub fn frames(
        name: impl Into<String>,
        slot: Slot,
        template: CellTemplate,
        frames: Vec<String>,
        looping: bool,
        interval_ticks: u32,
    ) -> Self {
        Self {
            name: name.into(),
            slot,
            template,
            kind: AnimationKind::FrameSequence { frames, looping },
            interval_ticks,
        }
    }

    /// State-reactive animation.
    pub fn reactive(
        name: impl Into<String>,
        slot: Slot,
        template: CellTemplate,
        watch_key: impl Into<String>,
        interval_ticks: u32,
    ) -> Self {
        Self {
            name: name.into(),
            slot,
            template,
            kind: AnimationKind::StateReactive {
                watch_key: watch_key.into(),
            },
            interval_ticks,
        }
    }
}
