//! The control loop: single-threaded owner of every panel instance.
//!
//! The engine runs one cooperative loop draining a message channel and a
//! ticker channel. All instance mutation happens here; worker completions
//! re-enter through [`LoopMessage::Invoke`] rather than locking engine
//! state. A thread-affinity guard refuses off-loop mutation: panic under
//! `debug_assertions`, logged no-op in release.

use crate::actor::messages::{
    ActionDispatcher, ClickKind, DefinitionLoader, FrameSink, Interaction, LoopMessage,
};
use crate::actor::{Ticker, WorkerPool, DEFAULT_TICK_INTERVAL};
use crate::anim::{AnimationScheduler, InstanceMap, DEFAULT_MAX_ADVANCES_PER_TICK};
use crate::error::EngineError;
use crate::layout::NavCell;
use crate::panel::{
    CellAccents, PanelId, PanelInstance, RenderedCell, RenderedFrame, Slot, TemplateId, ViewerId,
};
use crate::persist::{DurableStore, PersistOptions, PersistentState, RetryPolicy, StateManager};
use crate::render::{CellCache, CellCompiler, TextSubstituter};
use crate::shared::{SharedPanelCoordinator, SharedSnapshot, DEFAULT_DEBOUNCE_TICKS};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Named template id for the previous-page navigation cell.
pub const NAV_PREV_TEMPLATE: &str = "nav:prev";
/// Named template id for the next-page navigation cell.
pub const NAV_NEXT_TEMPLATE: &str = "nav:next";
/// Named template id for the page-indicator cell.
pub const NAV_PAGE_TEMPLATE: &str = "nav:page";

/// Engine tuning knobs. Every field has a default, so hosts deserialize
/// partial configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Milliseconds between ticks.
    pub tick_interval_ms: u64,
    /// Worker pool size.
    pub worker_threads: usize,
    /// Rendered-cell cache capacity.
    pub cache_capacity: usize,
    /// Rendered-cell cache entry TTL, seconds.
    pub cache_ttl_secs: u64,
    /// Ticks between dirty-state sweeps. Zero disables the sweep.
    pub sweep_interval_ticks: u64,
    /// Animation advances applied per tick before deferring.
    pub max_advances_per_tick: usize,
    /// Shared-panel debounce window, in ticks.
    pub debounce_ticks: u64,
    /// Persistence read-cache TTL, seconds.
    pub read_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            worker_threads: 4,
            cache_capacity: 4096,
            cache_ttl_secs: 300,
            sweep_interval_ticks: 6000,
            max_advances_per_tick: DEFAULT_MAX_ADVANCES_PER_TICK,
            debounce_ticks: DEFAULT_DEBOUNCE_TICKS,
            read_ttl_secs: 60,
        }
    }
}

impl EngineConfig {
    /// The tick interval as a duration.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Cloneable handle for posting messages onto the control loop.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<LoopMessage>,
}

impl EngineHandle {
    /// Post a message. Fails only when the loop has shut down.
    pub fn post(&self, message: LoopMessage) -> Result<(), EngineError> {
        self.tx.send(message).map_err(|_| EngineError::LoopClosed)
    }

    /// Post a closure to run on the loop thread.
    pub fn invoke(
        &self,
        f: impl FnOnce(&mut Engine) + Send + 'static,
    ) -> Result<(), EngineError> {
        self.post(LoopMessage::Invoke(Box::new(f)))
    }

    /// Post an open-panel command.
    pub fn open(&self, viewer: ViewerId, panel: PanelId) -> Result<(), EngineError> {
        self.post(LoopMessage::Open { viewer, panel })
    }

    /// Post a close-panel command.
    pub fn close(&self, viewer: ViewerId, panel: PanelId) -> Result<(), EngineError> {
        self.post(LoopMessage::Close { viewer, panel })
    }

    /// Post a disconnect command.
    pub fn disconnect(&self, viewer: ViewerId) -> Result<(), EngineError> {
        self.post(LoopMessage::Disconnect { viewer })
    }

    /// Post a shutdown command.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.post(LoopMessage::Shutdown)
    }
}

/// The panel engine and its control loop.
pub struct Engine {
    config: EngineConfig,
    loader: Box<dyn DefinitionLoader>,
    sink: Box<dyn FrameSink>,
    dispatcher: Box<dyn ActionDispatcher>,
    cache: Arc<CellCache>,
    compiler: CellCompiler,
    instances: InstanceMap,
    scheduler: AnimationScheduler,
    persistence: StateManager,
    coordinator: SharedPanelCoordinator,
    pool: Arc<WorkerPool>,
    msg_tx: Sender<LoopMessage>,
    msg_rx: Receiver<LoopMessage>,
    tick: u64,
    next_sweep: u64,
    loop_thread: ThreadId,
    running: bool,
}

impl Engine {
    /// Create an engine with default configuration and no durable store.
    pub fn new(
        loader: Box<dyn DefinitionLoader>,
        sink: Box<dyn FrameSink>,
        dispatcher: Box<dyn ActionDispatcher>,
    ) -> Self {
        Self::with_config(EngineConfig::default(), loader, sink, dispatcher)
    }

    /// Create an engine with custom configuration.
    ///
    /// The constructing thread becomes the loop thread.
    pub fn with_config(
        config: EngineConfig,
        loader: Box<dyn DefinitionLoader>,
        sink: Box<dyn FrameSink>,
        dispatcher: Box<dyn ActionDispatcher>,
    ) -> Self {
        let cache = Arc::new(CellCache::new(
            config.cache_capacity,
            Duration::from_secs(config.cache_ttl_secs),
        ));
        let pool = Arc::new(WorkerPool::new(config.worker_threads));
        let persistence = StateManager::new(
            None,
            Arc::clone(&pool),
            PersistOptions {
                read_ttl: Duration::from_secs(config.read_ttl_secs),
                retry: RetryPolicy::default(),
            },
        );
        let (msg_tx, msg_rx) = unbounded();

        Self {
            compiler: CellCompiler::new(Arc::clone(&cache)),
            cache,
            loader,
            sink,
            dispatcher,
            instances: InstanceMap::new(),
            scheduler: AnimationScheduler::new(config.max_advances_per_tick),
            persistence,
            coordinator: SharedPanelCoordinator::with_debounce(config.debounce_ticks),
            pool,
            msg_tx,
            msg_rx,
            tick: 0,
            next_sweep: config.sweep_interval_ticks,
            loop_thread: thread::current().id(),
            running: false,
            config,
        }
    }

    /// Attach a durable store. Without one every persistence operation
    /// degrades to the in-memory fallback and panels still open.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.persistence = StateManager::new(
            Some(store),
            Arc::clone(&self.pool),
            PersistOptions {
                read_ttl: Duration::from_secs(self.config.read_ttl_secs),
                retry: RetryPolicy::default(),
            },
        );
        self
    }

    /// Attach the external text-substitution service.
    #[must_use]
    pub fn with_substituter(mut self, substituter: Box<dyn TextSubstituter>) -> Self {
        self.compiler =
            CellCompiler::new(Arc::clone(&self.cache)).with_substituter(substituter);
        self
    }

    /// A handle for posting messages from other threads.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.msg_tx.clone(),
        }
    }

    /// The shared rendered-cell cache.
    pub fn cache(&self) -> &Arc<CellCache> {
        &self.cache
    }

    /// The persistence manager.
    pub fn persistence(&self) -> &StateManager {
        &self.persistence
    }

    /// Current tick number.
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Number of open panel instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Whether a viewer has a given panel open.
    pub fn is_open(&self, viewer: ViewerId, panel: &PanelId) -> bool {
        self.instances.contains_key(&(viewer, panel.clone()))
    }

    /// Run the control loop until shutdown.
    ///
    /// Spawns the ticker and blocks the calling thread (which must be the
    /// constructing thread).
    pub fn run(&mut self) {
        if self.affinity("run").is_err() {
            return;
        }
        let ticker = Ticker::spawn(self.config.tick_interval());
        let msg_rx = self.msg_rx.clone();
        let tick_rx = ticker.receiver().clone();
        self.running = true;

        while self.running {
            crossbeam_channel::select! {
                recv(msg_rx) -> msg => match msg {
                    Ok(msg) => self.handle_message(msg),
                    Err(_) => break,
                },
                recv(tick_rx) -> tick => {
                    if tick.is_ok() {
                        self.advance_tick();
                    }
                }
            }
        }
        ticker.join();
    }

    /// Drain and handle every pending message without blocking.
    ///
    /// Test seam: lets a test drive the loop deterministically without the
    /// ticker thread.
    pub fn pump(&mut self) {
        if self.affinity("pump").is_err() {
            return;
        }
        let msg_rx = self.msg_rx.clone();
        while let Ok(msg) = msg_rx.try_recv() {
            self.handle_message(msg);
        }
    }

    fn handle_message(&mut self, message: LoopMessage) {
        match message {
            LoopMessage::Open { viewer, panel } => {
                if let Err(err) = self.open_panel(viewer, &panel) {
                    warn!(%viewer, %panel, %err, "open failed");
                }
            }
            LoopMessage::Close { viewer, panel } => self.close_panel(viewer, &panel),
            LoopMessage::Interact {
                viewer,
                panel,
                slot,
                click,
                held,
            } => self.handle_interaction(viewer, &panel, slot, click, held),
            LoopMessage::Disconnect { viewer } => self.disconnect(viewer),
            LoopMessage::SharedWrite {
                viewer,
                panel,
                slot,
                cell,
            } => self.write_shared_cell(viewer, &panel, slot, cell),
            LoopMessage::Invoke(f) => f(self),
            LoopMessage::Shutdown => self.running = false,
        }
    }

    /// Open `panel` for `viewer` and deliver its first full frame.
    ///
    /// Persisted state is applied immediately when the read cache has it;
    /// otherwise the panel opens with defaults and a posted completion
    /// restores cursors when the async load lands.
    pub fn open_panel(&mut self, viewer: ViewerId, panel: &PanelId) -> Result<(), EngineError> {
        self.affinity("open_panel")?;
        let key = (viewer, panel.clone());
        if self.instances.contains_key(&key) {
            // Re-open refreshes the frame, it does not reset state.
            self.render_now(viewer, panel);
            return Ok(());
        }

        let definition = self.loader.load_definition(panel)?;
        definition.validate()?;
        let mut instance = PanelInstance::new(Arc::clone(&definition), viewer);

        if definition.persistence.enabled && self.persistence.is_durable() {
            let promise = self.persistence.load(viewer, panel);
            if let Some(state) = promise.try_take() {
                apply_persisted(&mut instance, &state);
            } else {
                let tx = self.msg_tx.clone();
                let panel_key = panel.clone();
                self.pool.execute(move || {
                    if let Some(state) = promise.wait() {
                        let _ = tx.send(LoopMessage::Invoke(Box::new(move |engine| {
                            engine.restore_persisted(viewer, &panel_key, &state);
                        })));
                    }
                });
            }
        }

        for config in &definition.animations {
            let id = self.scheduler.start(viewer, panel.clone(), config, self.tick);
            instance.attach_animation(id);
        }

        if definition.shared {
            let session = self.coordinator.open(panel, viewer, SharedSnapshot::empty());
            instance.set_shared_session(Some(session));
            // Late joiners see the session's current cells immediately.
            reseed_shared(&self.coordinator, &mut instance);
        }

        let frame = compile_frame(&self.compiler, &instance);
        let _ = instance.take_dirty();
        self.instances.insert(key, instance);
        debug!(%viewer, %panel, "panel opened");
        self.sink.deliver(viewer, panel, frame);
        Ok(())
    }

    /// Close one viewer's panel, saving its state.
    pub fn close_panel(&mut self, viewer: ViewerId, panel: &PanelId) {
        if self.affinity("close_panel").is_err() {
            return;
        }
        let key = (viewer, panel.clone());
        let Some(instance) = self.instances.remove(&key) else {
            return;
        };
        self.scheduler.stop_instance(viewer, panel);
        if let Some(session) = instance.shared_session() {
            self.coordinator.leave(session, viewer);
        }
        if instance.definition().persistence.enabled && self.persistence.is_durable() {
            // Fire and forget: a failed save stays dirty for the sweep.
            drop(self.persistence.save(snapshot_state(&instance)));
        }
        debug!(%viewer, %panel, "panel closed");
    }

    /// Close everything a departing viewer had open.
    pub fn disconnect(&mut self, viewer: ViewerId) {
        if self.affinity("disconnect").is_err() {
            return;
        }
        let panels: Vec<PanelId> = self
            .instances
            .keys()
            .filter(|(owner, _)| *owner == viewer)
            .map(|(_, panel)| panel.clone())
            .collect();
        for panel in panels {
            self.close_panel(viewer, &panel);
        }
        self.scheduler.stop_viewer(viewer);
        self.cache.invalidate_viewer(viewer);
        debug!(%viewer, "viewer disconnected");
    }

    /// Handle a click on a cell.
    ///
    /// Navigation cells turn pages inside the engine; every other cell
    /// resolves its template's action list and goes to the dispatcher
    /// verbatim.
    pub fn handle_interaction(
        &mut self,
        viewer: ViewerId,
        panel: &PanelId,
        slot: Slot,
        click: ClickKind,
        held: Option<String>,
    ) {
        if self.affinity("handle_interaction").is_err() {
            return;
        }
        let key = (viewer, panel.clone());
        let actions = {
            let Some(instance) = self.instances.get_mut(&key) else {
                return;
            };
            match resolve_click(instance, slot) {
                ClickTarget::PageTurn(page) => {
                    // Live overrides belong to the page they were written
                    // on; shared cells must survive the clear.
                    instance.clear_overrides();
                    instance.set_page(page);
                    reseed_shared(&self.coordinator, instance);
                    trace!(%viewer, %panel, page, "page turned");
                    return;
                }
                ClickTarget::Inert => return,
                ClickTarget::Actions(actions) => actions,
            }
        };
        self.dispatcher.dispatch(Interaction {
            viewer,
            panel: panel.clone(),
            slot,
            click,
            held,
            actions,
        });
    }

    /// Publish a cell into a shared panel on behalf of `viewer`.
    ///
    /// The origin sees the write on its next frame; other participants
    /// receive it after the debounce window.
    pub fn write_shared_cell(
        &mut self,
        viewer: ViewerId,
        panel: &PanelId,
        slot: Slot,
        cell: RenderedCell,
    ) {
        if self.affinity("write_shared_cell").is_err() {
            return;
        }
        let key = (viewer, panel.clone());
        let Some(session) = self.instances.get(&key).and_then(PanelInstance::shared_session)
        else {
            return;
        };
        if let Some(instance) = self.instances.get_mut(&key) {
            instance.set_override(slot, cell.clone());
        }
        self.coordinator.write_cell(session, viewer, slot, cell, self.tick);
    }

    /// Replace a panel's dynamic content items. The next tick renders the
    /// new page.
    pub fn set_items(
        &mut self,
        viewer: ViewerId,
        panel: &PanelId,
        items: Vec<crate::panel::CellTemplate>,
    ) {
        if self.affinity("set_items").is_err() {
            return;
        }
        if let Some(instance) = self.instances.get_mut(&(viewer, panel.clone())) {
            instance.set_items(items);
        }
    }

    /// Move a panel to a page. Out-of-range values clamp at layout time.
    pub fn set_page(&mut self, viewer: ViewerId, panel: &PanelId, page: u32) {
        if self.affinity("set_page").is_err() {
            return;
        }
        if let Some(instance) = self.instances.get_mut(&(viewer, panel.clone())) {
            instance.clear_overrides();
            instance.set_page(page);
            reseed_shared(&self.coordinator, instance);
        }
    }

    /// Mutate a panel's render context. Marks the instance for re-render.
    pub fn update_context(
        &mut self,
        viewer: ViewerId,
        panel: &PanelId,
        f: impl FnOnce(&mut crate::context::RenderContext),
    ) {
        if self.affinity("update_context").is_err() {
            return;
        }
        if let Some(instance) = self.instances.get_mut(&(viewer, panel.clone())) {
            f(instance.context_mut());
        }
    }

    /// The clamped page layout a panel currently shows, if paginated.
    pub fn page_layout(&self, viewer: ViewerId, panel: &PanelId) -> Option<crate::layout::PageLayout> {
        self.instances
            .get(&(viewer, panel.clone()))
            .and_then(PanelInstance::page_layout)
    }

    /// Run one tick: animations, shared flushes, the sweep countdown, and
    /// frame delivery for everything dirtied along the way.
    pub fn advance_tick(&mut self) {
        if self.affinity("advance_tick").is_err() {
            return;
        }
        self.tick += 1;

        let report = self.scheduler.tick(self.tick, &mut self.instances, &self.compiler);
        if report.deferred > 0 {
            trace!(deferred = report.deferred, "animation advances deferred");
        }

        for update in self.coordinator.flush(self.tick) {
            let key = (update.viewer, update.panel.clone());
            if let Some(instance) = self.instances.get_mut(&key) {
                for (slot, cell) in update.cells {
                    instance.set_override(slot, cell);
                }
            }
        }

        if self.config.sweep_interval_ticks > 0 && self.tick >= self.next_sweep {
            drop(self.persistence.sweep());
            self.next_sweep = self.tick + self.config.sweep_interval_ticks;
        }

        self.flush_frames();
    }

    /// Re-apply persisted cursors once an async load lands. No-op when the
    /// panel closed in the meantime.
    fn restore_persisted(&mut self, viewer: ViewerId, panel: &PanelId, state: &PersistentState) {
        let key = (viewer, panel.clone());
        if let Some(instance) = self.instances.get_mut(&key) {
            if !state.is_empty() {
                apply_persisted(instance, state);
            }
        }
    }

    /// Deliver one frame per instance dirtied this tick.
    fn flush_frames(&mut self) {
        let mut outgoing = Vec::new();
        for ((viewer, panel), instance) in &mut self.instances {
            if instance.take_dirty() {
                outgoing.push((*viewer, panel.clone(), compile_frame(&self.compiler, instance)));
            }
        }
        for (viewer, panel, frame) in outgoing {
            self.sink.deliver(viewer, &panel, frame);
        }
    }

    /// Compile and deliver one frame immediately, clearing the dirty flag.
    fn render_now(&mut self, viewer: ViewerId, panel: &PanelId) {
        let key = (viewer, panel.clone());
        let Some(instance) = self.instances.get_mut(&key) else {
            return;
        };
        let _ = instance.take_dirty();
        let frame = compile_frame(&self.compiler, instance);
        self.sink.deliver(viewer, panel, frame);
    }

    /// Mutation is loop-thread-only. Off-loop calls panic in development
    /// and are logged no-ops in release.
    fn affinity(&self, op: &'static str) -> Result<(), EngineError> {
        if thread::current().id() == self.loop_thread {
            return Ok(());
        }
        debug_assert!(false, "engine mutated off the loop thread: {op}");
        warn!(op, "off-loop engine mutation refused");
        Err(EngineError::OffLoopMutation)
    }
}

enum ClickTarget {
    /// Turn to this page.
    PageTurn(u32),
    /// Nothing to do (page indicator, unavailable nav).
    Inert,
    /// Dispatch with these action specs.
    Actions(Vec<String>),
}

/// Map a clicked slot to what the engine should do with it.
fn resolve_click(instance: &PanelInstance, slot: Slot) -> ClickTarget {
    if let Some(layout) = instance.page_layout() {
        match layout.nav_cells.get(&slot) {
            Some(NavCell::PrevPage) => {
                return if layout.has_prev() {
                    ClickTarget::PageTurn(layout.current_page - 1)
                } else {
                    ClickTarget::Inert
                };
            }
            Some(NavCell::NextPage) => {
                return if layout.has_next() {
                    ClickTarget::PageTurn(layout.current_page + 1)
                } else {
                    ClickTarget::Inert
                };
            }
            Some(NavCell::PageIndicator) => return ClickTarget::Inert,
            None => {}
        }
        if let Some(&item) = layout.slot_items.get(&slot) {
            let actions = instance
                .items()
                .get(item)
                .map(|template| template.actions.clone())
                .unwrap_or_default();
            return ClickTarget::Actions(actions);
        }
    }
    let actions = instance
        .definition()
        .template_at(slot)
        .map(|template| template.actions.clone())
        .unwrap_or_default();
    ClickTarget::Actions(actions)
}

/// Compile the full visible frame for one instance.
///
/// Assembly order: decorations, navigation, paged content, fixed cells,
/// then live overrides shadowing everything underneath.
fn compile_frame(compiler: &CellCompiler, instance: &PanelInstance) -> RenderedFrame {
    let definition = instance.definition();
    let viewer = instance.viewer();
    let mut frame = RenderedFrame::new();

    if let Some(layout) = instance.page_layout() {
        for (&slot, template_id) in &layout.decorations {
            // Validation guarantees the template exists; a placeholder
            // covers definitions mutated after validation.
            let cell = definition.template(template_id).map_or_else(
                RenderedCell::placeholder,
                |template| compiler.compile(&definition.id, template, viewer, instance.context()),
            );
            frame.set(slot, cell);
        }
        for (&slot, &nav) in &layout.nav_cells {
            frame.set(
                slot,
                nav_cell(compiler, instance, nav, layout.current_page, layout.total_pages),
            );
        }
        for (&slot, &item) in &layout.slot_items {
            if let Some(template) = instance.items().get(item) {
                frame.set(
                    slot,
                    compiler.compile(&definition.id, template, viewer, instance.context()),
                );
            }
        }
    }

    for (&slot, template) in &definition.cells {
        frame.set(
            slot,
            compiler.compile(&definition.id, template, viewer, instance.context()),
        );
    }

    for (slot, cell) in instance.overrides() {
        frame.set(slot, cell.clone());
    }

    frame
}

/// Re-apply a session's shared cells as live overrides.
///
/// Page turns clear the override map; shared cells live there too and must
/// come back from the session snapshot, or participants' views diverge.
fn reseed_shared(coordinator: &SharedPanelCoordinator, instance: &mut PanelInstance) {
    let Some(session) = instance.shared_session() else {
        return;
    };
    if let Some(snapshot) = coordinator.snapshot(session) {
        for (slot, cell) in snapshot.cells() {
            instance.set_override(slot, cell.clone());
        }
    }
}

/// Compile a navigation cell, preferring the definition's named template.
fn nav_cell(
    compiler: &CellCompiler,
    instance: &PanelInstance,
    nav: NavCell,
    page: u32,
    pages: u32,
) -> RenderedCell {
    let definition = instance.definition();
    let (template_id, fallback_visual, title, available) = match nav {
        NavCell::PrevPage => (
            NAV_PREV_TEMPLATE,
            "builtin:arrow-left",
            "Previous page".to_string(),
            page > 1,
        ),
        NavCell::NextPage => (
            NAV_NEXT_TEMPLATE,
            "builtin:arrow-right",
            "Next page".to_string(),
            page < pages,
        ),
        NavCell::PageIndicator => (
            NAV_PAGE_TEMPLATE,
            "builtin:page",
            format!("Page {page} of {pages}"),
            true,
        ),
    };

    let mut cell = match definition.template(&TemplateId::new(template_id)) {
        Some(template) => {
            let mut context = instance.context().clone();
            context.set_value("page", page.to_string());
            context.set_value("pages", pages.to_string());
            compiler.compile(&definition.id, template, instance.viewer(), &context)
        }
        None => RenderedCell::new(fallback_visual).with_title(title),
    };
    if !available {
        let accents = cell.accents() | CellAccents::DISABLED;
        cell = cell.with_accents(accents);
    }
    cell
}

/// Restore persisted cursors into a freshly opened instance.
fn apply_persisted(instance: &mut PanelInstance, state: &PersistentState) {
    if let Some(page) = state.state.get("page").and_then(Value::as_u64) {
        instance.set_page(page as u32);
    }
    if let Some(tab) = state.state.get("tab").and_then(Value::as_str) {
        instance.set_tab(Some(tab.to_string()));
        if let Some(cursor) = state.tab_cursors.get(tab).and_then(Value::as_u64) {
            instance.set_page(cursor as u32);
        }
    }
}

/// Capture an instance's durable state for saving.
fn snapshot_state(instance: &PanelInstance) -> PersistentState {
    let mut state =
        PersistentState::empty(instance.viewer(), instance.definition().id.clone());
    state.set_state("page", json!(instance.current_page()));
    if let Some(tab) = instance.current_tab() {
        state.set_state("tab", json!(tab));
        state.set_tab_cursor(tab, json!(instance.current_page()));
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{GridSize, PaginationConfig};
    use crate::panel::{CellTemplate, PanelDefinition};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapLoader {
        definitions: HashMap<PanelId, Arc<PanelDefinition>>,
    }

    impl MapLoader {
        fn new(definitions: Vec<PanelDefinition>) -> Box<Self> {
            Box::new(Self {
                definitions: definitions
                    .into_iter()
                    .map(|def| (def.id.clone(), Arc::new(def)))
                    .collect(),
            })
        }
    }

    impl DefinitionLoader for MapLoader {
        fn load_definition(&self, panel: &PanelId) -> Result<Arc<PanelDefinition>, EngineError> {
            self.definitions
                .get(panel)
                .cloned()
                .ok_or_else(|| EngineError::UnknownDefinition(panel.clone()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<(ViewerId, PanelId, RenderedFrame)>>>,
    }

    impl FrameSink for RecordingSink {
        fn deliver(&self, viewer: ViewerId, panel: &PanelId, frame: RenderedFrame) {
            self.frames
                .lock()
                .unwrap()
                .push((viewer, panel.clone(), frame));
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        interactions: Arc<Mutex<Vec<Interaction>>>,
    }

    impl ActionDispatcher for RecordingDispatcher {
        fn dispatch(&self, interaction: Interaction) {
            self.interactions.lock().unwrap().push(interaction);
        }
    }

    type Frames = Arc<Mutex<Vec<(ViewerId, PanelId, RenderedFrame)>>>;
    type Interactions = Arc<Mutex<Vec<Interaction>>>;

    fn engine_with(definitions: Vec<PanelDefinition>) -> (Engine, Frames, Interactions) {
        let sink = RecordingSink::default();
        let frames = Arc::clone(&sink.frames);
        let dispatcher = RecordingDispatcher::default();
        let interactions = Arc::clone(&dispatcher.interactions);
        let engine = Engine::new(MapLoader::new(definitions), Box::new(sink), Box::new(dispatcher));
        (engine, frames, interactions)
    }

    fn shop() -> PanelDefinition {
        PanelDefinition::new("shop", GridSize::new(3, 9)).with_cell(
            Slot(0),
            CellTemplate::new("gem", "gem")
                .with_title("Gem")
                .with_actions(vec!["buy:gem".to_string()]),
        )
    }

    fn paged_shop() -> PanelDefinition {
        shop().with_pagination(
            PaginationConfig::hybrid(
                vec![String::new(), String::new(), "<=======>".to_string()],
                0,
            ),
        )
    }

    fn items(n: usize) -> Vec<CellTemplate> {
        (0..n)
            .map(|i| CellTemplate::new(format!("item{i}"), "crate").with_title(format!("Item {i}")))
            .collect()
    }

    #[test]
    fn test_open_delivers_full_frame() {
        let (mut engine, frames, _) = engine_with(vec![shop()]);
        engine.open_panel(ViewerId(1), &PanelId::new("shop")).unwrap();
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].2.get(Slot(0)).unwrap().title(), "Gem");
    }

    #[test]
    fn test_open_unknown_panel_errors() {
        let (mut engine, _, _) = engine_with(vec![]);
        let err = engine.open_panel(ViewerId(1), &PanelId::new("nope"));
        assert!(matches!(err, Err(EngineError::UnknownDefinition(_))));
    }

    #[test]
    fn test_interaction_routes_actions_to_dispatcher() {
        let (mut engine, _, interactions) = engine_with(vec![shop()]);
        let panel = PanelId::new("shop");
        engine.open_panel(ViewerId(1), &panel).unwrap();
        engine.handle_interaction(ViewerId(1), &panel, Slot(0), ClickKind::Left, None);
        let interactions = interactions.lock().unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].actions, vec!["buy:gem".to_string()]);
        assert_eq!(interactions[0].click, ClickKind::Left);
    }

    #[test]
    fn test_nav_click_turns_page_without_dispatch() {
        let (mut engine, _, interactions) = engine_with(vec![paged_shop()]);
        let panel = PanelId::new("shop");
        let viewer = ViewerId(1);
        engine.open_panel(viewer, &panel).unwrap();
        engine.set_items(viewer, &panel, items(40));

        // 18 content slots, 40 items: three pages. Bottom-right is next.
        let next = Slot::at(2, 8, 9);
        engine.handle_interaction(viewer, &panel, next, ClickKind::Left, None);
        let instance = &engine.instances[&(viewer, panel.clone())];
        assert_eq!(instance.current_page(), 2);
        assert!(interactions.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tick_delivers_one_frame_per_dirty_instance() {
        let (mut engine, frames, _) = engine_with(vec![shop()]);
        let panel = PanelId::new("shop");
        engine.open_panel(ViewerId(1), &panel).unwrap();
        frames.lock().unwrap().clear();

        // Clean instance: a tick delivers nothing.
        engine.advance_tick();
        assert!(frames.lock().unwrap().is_empty());

        engine
            .instances
            .get_mut(&(ViewerId(1), panel))
            .unwrap()
            .mark_dirty();
        engine.advance_tick();
        engine.advance_tick();
        // Dirtied once, rendered once.
        assert_eq!(frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_animation_writes_render_on_tick() {
        let def = shop().with_animation(crate::anim::AnimationConfig::frames(
            "pulse",
            Slot(4),
            CellTemplate::new("pulse", "spark"),
            vec!["a".to_string(), "b".to_string()],
            true,
            1,
        ));
        let (mut engine, frames, _) = engine_with(vec![def]);
        let panel = PanelId::new("shop");
        engine.open_panel(ViewerId(1), &panel).unwrap();
        frames.lock().unwrap().clear();

        engine.advance_tick();
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].2.get(Slot(4)).unwrap().visual(), "a");
    }

    #[test]
    fn test_close_stops_animations_and_drops_instance() {
        let def = shop().with_animation(crate::anim::AnimationConfig::frames(
            "pulse",
            Slot(4),
            CellTemplate::new("pulse", "spark"),
            vec!["a".to_string()],
            true,
            1,
        ));
        let (mut engine, _, _) = engine_with(vec![def]);
        let panel = PanelId::new("shop");
        engine.open_panel(ViewerId(1), &panel).unwrap();
        assert_eq!(engine.scheduler.len(), 1);
        engine.close_panel(ViewerId(1), &panel);
        assert_eq!(engine.instance_count(), 0);
        assert!(engine.scheduler.is_empty());
    }

    #[test]
    fn test_disconnect_closes_everything_for_viewer() {
        let mut bank = shop();
        bank.id = PanelId::new("bank");
        let (mut engine, _, _) = engine_with(vec![shop(), bank]);
        engine.open_panel(ViewerId(1), &PanelId::new("shop")).unwrap();
        engine.open_panel(ViewerId(1), &PanelId::new("bank")).unwrap();
        engine.open_panel(ViewerId(2), &PanelId::new("shop")).unwrap();
        engine.disconnect(ViewerId(1));
        assert_eq!(engine.instance_count(), 1);
        assert!(engine.is_open(ViewerId(2), &PanelId::new("shop")));
    }

    #[test]
    fn test_shared_write_reaches_other_participant_after_debounce() {
        let mut def = shop();
        def.shared = true;
        let (mut engine, frames, _) = engine_with(vec![def]);
        let panel = PanelId::new("shop");
        engine.open_panel(ViewerId(1), &panel).unwrap();
        engine.open_panel(ViewerId(2), &panel).unwrap();
        frames.lock().unwrap().clear();

        engine.write_shared_cell(ViewerId(1), &panel, Slot(8), RenderedCell::new("flag"));
        // Default debounce is two ticks: first tick renders only the origin.
        engine.advance_tick();
        {
            let frames = frames.lock().unwrap();
            assert!(frames.iter().all(|(viewer, ..)| *viewer == ViewerId(1)));
        }
        engine.advance_tick();
        engine.advance_tick();
        let frames = frames.lock().unwrap();
        let to_other: Vec<_> = frames
            .iter()
            .filter(|(viewer, ..)| *viewer == ViewerId(2))
            .collect();
        assert_eq!(to_other.len(), 1);
        assert_eq!(to_other[0].2.get(Slot(8)).unwrap().visual(), "flag");
    }

    #[test]
    fn test_page_turn_keeps_shared_cells() {
        let def = paged_shop().shared();
        let (mut engine, frames, _) = engine_with(vec![def]);
        let panel = PanelId::new("shop");
        let (a, b) = (ViewerId(1), ViewerId(2));
        engine.open_panel(a, &panel).unwrap();
        engine.open_panel(b, &panel).unwrap();
        engine.set_items(b, &panel, items(40));
        engine.write_shared_cell(a, &panel, Slot(4), RenderedCell::new("claimed"));
        for _ in 0..3 {
            engine.advance_tick();
        }
        frames.lock().unwrap().clear();

        // B turns the page; the shared cell must survive the override clear.
        engine.handle_interaction(b, &panel, Slot::at(2, 8, 9), ClickKind::Left, None);
        engine.advance_tick();
        {
            let frames = frames.lock().unwrap();
            let frame = &frames
                .iter()
                .find(|(viewer, ..)| *viewer == b)
                .expect("page turn renders a frame")
                .2;
            assert_eq!(frame.get(Slot(4)).unwrap().visual(), "claimed");
        }

        // Direct page moves take the same path.
        frames.lock().unwrap().clear();
        engine.set_page(b, &panel, 1);
        engine.advance_tick();
        let frames = frames.lock().unwrap();
        let frame = &frames
            .iter()
            .find(|(viewer, ..)| *viewer == b)
            .expect("page move renders a frame")
            .2;
        assert_eq!(frame.get(Slot(4)).unwrap().visual(), "claimed");
    }

    #[test]
    fn test_late_joiner_sees_shared_cells() {
        let mut def = shop();
        def.shared = true;
        let (mut engine, frames, _) = engine_with(vec![def]);
        let panel = PanelId::new("shop");
        engine.open_panel(ViewerId(1), &panel).unwrap();
        engine.write_shared_cell(ViewerId(1), &panel, Slot(8), RenderedCell::new("flag"));

        frames.lock().unwrap().clear();
        engine.open_panel(ViewerId(2), &panel).unwrap();
        let frames = frames.lock().unwrap();
        assert_eq!(frames[0].2.get(Slot(8)).unwrap().visual(), "flag");
    }

    #[test]
    fn test_persisted_page_restored_on_open() {
        use crate::persist::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        let mut saved = PersistentState::empty(ViewerId(1), PanelId::new("shop"));
        saved.set_state("page", json!(3));
        store.upsert(&saved).unwrap();

        let sink = RecordingSink::default();
        let dispatcher = RecordingDispatcher::default();
        let mut engine = Engine::new(
            MapLoader::new(vec![paged_shop()]),
            Box::new(sink),
            Box::new(dispatcher),
        )
        .with_store(store);

        let panel = PanelId::new("shop");
        engine.open_panel(ViewerId(1), &panel).unwrap();
        // The load runs on a worker; wait for its posted completion.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            engine.pump();
            let page = engine.instances[&(ViewerId(1), panel.clone())].current_page();
            if page == 3 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "restore never landed");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"tick_interval_ms": 20}"#).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
        assert_eq!(config.cache_capacity, 4096);
        assert_eq!(config.debounce_ticks, DEFAULT_DEBOUNCE_TICKS);
    }

    #[test]
    fn test_handle_messages_drive_loop() {
        let (mut engine, frames, _) = engine_with(vec![shop()]);
        let handle = engine.handle();
        handle.open(ViewerId(1), PanelId::new("shop")).unwrap();
        handle.close(ViewerId(1), PanelId::new("shop")).unwrap();
        engine.pump();
        assert_eq!(engine.instance_count(), 0);
        assert_eq!(frames.lock().unwrap().len(), 1);
    }
}
