//! Animation scheduler: advances active animations inside the tick budget.
//!
//! Owned by the control loop, never shared. Each tick the scheduler drops
//! animations whose instance is gone, advances the due ones up to a
//! per-tick cap, and writes results into the live panel instances. Capped
//! out advances are deferred to the next tick, never dropped; a rotating
//! cursor keeps the tail from starving.

use crate::anim::{AnimationConfig, AnimationKind};
use crate::panel::{AnimationId, CellTemplate, PanelId, PanelInstance, Slot, ViewerId};
use crate::render::CellCompiler;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Default cap on advances applied within one tick.
pub const DEFAULT_MAX_ADVANCES_PER_TICK: usize = 16;

/// Instances keyed the way the engine owns them.
pub type InstanceMap = HashMap<(ViewerId, PanelId), PanelInstance>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnimState {
    Scheduled,
    Running,
}

#[derive(Debug)]
struct ActiveAnimation {
    id: AnimationId,
    viewer: ViewerId,
    panel: PanelId,
    slot: Slot,
    template: CellTemplate,
    kind: AnimationKind,
    interval_ticks: u64,
    state: AnimState,
    frame_index: usize,
    last_advance_tick: u64,
    /// Already logged a failure; keep the log at one line per animation.
    failure_logged: bool,
}

impl ActiveAnimation {
    fn due(&self, now: u64) -> bool {
        now.saturating_sub(self.last_advance_tick) >= self.interval_ticks
    }
}

/// Per-tick outcome, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Advances applied this tick.
    pub advanced: usize,
    /// Due advances deferred to the next tick by the rate cap.
    pub deferred: usize,
    /// Animations removed (finished or orphaned).
    pub removed: usize,
}

/// Advances animations and writes their frames into live panels.
pub struct AnimationScheduler {
    animations: Vec<ActiveAnimation>,
    next_id: u64,
    /// Rotating start offset for fair rate limiting.
    cursor: usize,
    max_advances_per_tick: usize,
}

impl AnimationScheduler {
    /// Create a scheduler with the given per-tick advance cap.
    pub fn new(max_advances_per_tick: usize) -> Self {
        Self {
            animations: Vec::new(),
            next_id: 0,
            cursor: 0,
            max_advances_per_tick: max_advances_per_tick.max(1),
        }
    }

    /// Start an animation for one instance. Returns its handle.
    pub fn start(
        &mut self,
        viewer: ViewerId,
        panel: PanelId,
        config: &AnimationConfig,
        now_tick: u64,
    ) -> AnimationId {
        self.next_id += 1;
        let id = AnimationId(self.next_id);
        self.animations.push(ActiveAnimation {
            id,
            viewer,
            panel,
            slot: config.slot,
            template: config.template.clone(),
            kind: config.kind.clone(),
            interval_ticks: u64::from(config.interval_ticks.max(1)),
            state: AnimState::Scheduled,
            frame_index: 0,
            last_advance_tick: now_tick,
            failure_logged: false,
        });
        debug!(%id, name = %config.name, "animation started");
        id
    }

    /// Tear down one animation.
    pub fn stop(&mut self, id: AnimationId) {
        self.animations.retain(|anim| anim.id != id);
    }

    /// Tear down every animation owned by one instance (close path).
    pub fn stop_instance(&mut self, viewer: ViewerId, panel: &PanelId) {
        self.animations
            .retain(|anim| !(anim.viewer == viewer && anim.panel == *panel));
    }

    /// Tear down every animation owned by one viewer (disconnect path).
    pub fn stop_viewer(&mut self, viewer: ViewerId) {
        self.animations.retain(|anim| anim.viewer != viewer);
    }

    /// Number of active animations.
    pub fn len(&self) -> usize {
        self.animations.len()
    }

    /// Whether no animations are active.
    pub fn is_empty(&self) -> bool {
        self.animations.is_empty()
    }

    /// Run one scheduler pass.
    ///
    /// Writes land as instance overrides and dirty flags; the engine turns
    /// each dirty instance into exactly one frame dispatch at the end of
    /// the tick, so a viewer never sees two renders of one panel mid-tick.
    pub fn tick(
        &mut self,
        now: u64,
        instances: &mut InstanceMap,
        compiler: &CellCompiler,
    ) -> TickReport {
        let mut report = TickReport::default();

        // Drop animations whose viewer disconnected or panel closed.
        let before = self.animations.len();
        self.animations
            .retain(|anim| instances.contains_key(&(anim.viewer, anim.panel.clone())));
        report.removed += before - self.animations.len();

        if self.animations.is_empty() {
            return report;
        }

        let len = self.animations.len();
        let start = self.cursor % len;
        let mut finished = Vec::new();
        let mut budget = self.max_advances_per_tick;

        for offset in 0..len {
            let index = (start + offset) % len;
            let anim = &mut self.animations[index];
            if !anim.due(now) {
                continue;
            }
            if budget == 0 {
                report.deferred += 1;
                continue;
            }
            budget -= 1;

            let key = (anim.viewer, anim.panel.clone());
            let Some(instance) = instances.get_mut(&key) else {
                continue;
            };
            match advance(anim, instance, compiler) {
                Advance::Applied => {
                    anim.state = AnimState::Running;
                    anim.last_advance_tick = now;
                    report.advanced += 1;
                }
                Advance::Finished => {
                    anim.last_advance_tick = now;
                    report.advanced += 1;
                    finished.push(anim.id);
                }
                Advance::Failed(reason) => {
                    // One bad animation never aborts the batch.
                    if !anim.failure_logged {
                        anim.failure_logged = true;
                        warn!(id = %anim.id, %reason, "animation advance failed");
                    }
                    anim.last_advance_tick = now;
                }
            }
        }

        for id in finished {
            if let Some(anim) = self.animations.iter().find(|a| a.id == id) {
                let key = (anim.viewer, anim.panel.clone());
                if let Some(instance) = instances.get_mut(&key) {
                    instance.detach_animation(id);
                }
            }
            self.stop(id);
            report.removed += 1;
        }

        // Rotate so a capped-out tail goes first next tick.
        self.cursor = self.cursor.wrapping_add(1);
        report
    }
}

impl Default for AnimationScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ADVANCES_PER_TICK)
    }
}

enum Advance {
    Applied,
    /// Applied, and the sequence is exhausted.
    Finished,
    Failed(String),
}

/// Apply one advance. Frames are transient, so compilation bypasses the
/// cache.
fn advance(
    anim: &mut ActiveAnimation,
    instance: &mut PanelInstance,
    compiler: &CellCompiler,
) -> Advance {
    if !instance.definition().size.contains(anim.slot.index()) {
        return Advance::Failed(format!("{} is outside the panel grid", anim.slot));
    }

    match &anim.kind {
        AnimationKind::FrameSequence { frames, looping } => {
            if frames.is_empty() {
                return Advance::Failed("frame sequence is empty".to_string());
            }
            let visual = frames[anim.frame_index % frames.len()].clone();
            let mut template = anim.template.clone();
            template.visual = visual;
            let cell = compiler.compile_uncached(&template, instance.viewer(), instance.context());
            instance.set_override(anim.slot, cell);

            anim.frame_index += 1;
            if anim.frame_index >= frames.len() {
                if *looping {
                    anim.frame_index = 0;
                    Advance::Applied
                } else {
                    Advance::Finished
                }
            } else {
                Advance::Applied
            }
        }
        AnimationKind::StateReactive { watch_key } => {
            let watched = instance
                .context()
                .value(watch_key)
                .map(ToString::to_string)
                .or_else(|| instance.context().data(watch_key).map(render_value));
            let Some(watched) = watched else {
                return Advance::Failed(format!("watched key {watch_key:?} is unset"));
            };
            let mut ctx = instance.context().clone();
            ctx.set_value(watch_key.clone(), watched);
            let cell = compiler.compile_uncached(&anim.template, instance.viewer(), &ctx);
            instance.set_override(anim.slot, cell);
            anim.frame_index += 1;
            Advance::Applied
        }
    }
}

/// Stringify a watched JSON value for substitution.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
