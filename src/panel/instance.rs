//! Panel instances: one open panel for one viewer.
//!
//! Instances are exclusively owned by the control loop. Off-loop code never
//! holds one; completions that need to touch an instance re-enter the loop
//! as posted closures.

use crate::context::RenderContext;
use crate::layout::{self, PageLayout};
use crate::panel::{
    AnimationId, CellTemplate, PanelDefinition, RenderedCell, SessionId, Slot, ViewerId,
};
use std::collections::HashMap;
use std::sync::Arc;

/// One open, mutable occurrence of a panel for one viewer.
#[derive(Debug)]
pub struct PanelInstance {
    definition: Arc<PanelDefinition>,
    viewer: ViewerId,
    context: RenderContext,
    /// Dynamic content items fed to the pagination engine.
    items: Vec<CellTemplate>,
    current_page: u32,
    current_tab: Option<String>,
    /// Live cell content written after open (animations, shared updates).
    overrides: HashMap<Slot, RenderedCell>,
    animations: Vec<AnimationId>,
    shared_session: Option<SessionId>,
    /// Needs a frame delivered at the end of the current tick.
    dirty: bool,
}

impl PanelInstance {
    /// Create an instance of `definition` for `viewer`.
    pub fn new(definition: Arc<PanelDefinition>, viewer: ViewerId) -> Self {
        Self {
            definition,
            viewer,
            context: RenderContext::new(),
            items: Vec::new(),
            current_page: 1,
            current_tab: None,
            overrides: HashMap::new(),
            animations: Vec::new(),
            shared_session: None,
            dirty: true,
        }
    }

    /// The shared definition.
    pub fn definition(&self) -> &Arc<PanelDefinition> {
        &self.definition
    }

    /// The owning viewer.
    pub const fn viewer(&self) -> ViewerId {
        self.viewer
    }

    /// The runtime context.
    pub const fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Mutable access to the runtime context. Marks the instance dirty
    /// since substitution output may change.
    pub fn context_mut(&mut self) -> &mut RenderContext {
        self.dirty = true;
        &mut self.context
    }

    /// Replace the dynamic content items.
    pub fn set_items(&mut self, items: Vec<CellTemplate>) {
        self.items = items;
        self.dirty = true;
    }

    /// The dynamic content items.
    pub fn items(&self) -> &[CellTemplate] {
        &self.items
    }

    /// Current page, 1-based.
    pub const fn current_page(&self) -> u32 {
        self.current_page
    }

    /// Move to a page. The value is clamped at layout time.
    pub fn set_page(&mut self, page: u32) {
        self.current_page = page.max(1);
        self.dirty = true;
    }

    /// Current tab, if the panel uses tabs.
    pub fn current_tab(&self) -> Option<&str> {
        self.current_tab.as_deref()
    }

    /// Switch tabs.
    pub fn set_tab(&mut self, tab: Option<String>) {
        self.current_tab = tab;
        self.dirty = true;
    }

    /// Compute the page layout for the current page, if paginated.
    pub fn page_layout(&self) -> Option<PageLayout> {
        self.definition.pagination.as_ref().map(|config| {
            layout::layout(
                config,
                self.definition.size,
                self.current_page,
                self.items.len(),
            )
        })
    }

    /// Write a live cell, shadowing whatever the template path renders.
    pub fn set_override(&mut self, slot: Slot, cell: RenderedCell) {
        self.overrides.insert(slot, cell);
        self.dirty = true;
    }

    /// The live override at a slot, if any.
    pub fn override_at(&self, slot: Slot) -> Option<&RenderedCell> {
        self.overrides.get(&slot)
    }

    /// Iterate live overrides.
    pub fn overrides(&self) -> impl Iterator<Item = (Slot, &RenderedCell)> {
        self.overrides.iter().map(|(slot, cell)| (*slot, cell))
    }

    /// Drop all live overrides (page turns invalidate them).
    pub fn clear_overrides(&mut self) {
        if !self.overrides.is_empty() {
            self.overrides.clear();
            self.dirty = true;
        }
    }

    /// Attach a running animation handle.
    pub fn attach_animation(&mut self, id: AnimationId) {
        self.animations.push(id);
    }

    /// Detach a finished animation handle.
    pub fn detach_animation(&mut self, id: AnimationId) {
        self.animations.retain(|a| *a != id);
    }

    /// Handles of this instance's running animations.
    pub fn animations(&self) -> &[AnimationId] {
        &self.animations
    }

    /// The shared session this instance participates in, if any.
    pub const fn shared_session(&self) -> Option<SessionId> {
        self.shared_session
    }

    /// Register (or clear) shared-session membership.
    pub fn set_shared_session(&mut self, session: Option<SessionId>) {
        self.shared_session = session;
    }

    /// Mark the instance as needing a frame this tick.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Consume the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::GridSize;
    use crate::panel::PanelDefinition;

    fn instance() -> PanelInstance {
        let def = Arc::new(PanelDefinition::new("shop", GridSize::new(3, 9)));
        PanelInstance::new(def, ViewerId(1))
    }

    #[test]
    fn test_new_instance_starts_dirty_on_page_one() {
        let mut inst = instance();
        assert_eq!(inst.current_page(), 1);
        assert!(inst.take_dirty());
        assert!(!inst.take_dirty());
    }

    #[test]
    fn test_override_shadows_and_clears() {
        let mut inst = instance();
        inst.set_override(Slot(4), RenderedCell::new("flame"));
        assert_eq!(inst.override_at(Slot(4)).unwrap().visual(), "flame");
        inst.clear_overrides();
        assert!(inst.override_at(Slot(4)).is_none());
    }

    #[test]
    fn test_set_page_floor_is_one() {
        let mut inst = instance();
        inst.set_page(0);
        assert_eq!(inst.current_page(), 1);
    }

    #[test]
    fn test_animation_handles_attach_detach() {
        let mut inst = instance();
        inst.attach_animation(AnimationId(7));
        inst.attach_animation(AnimationId(8));
        inst.detach_animation(AnimationId(7));
        assert_eq!(inst.animations(), &[AnimationId(8)]);
    }
}
