//! Shared-panel sessions: many viewers looking at one live surface.
//!
//! The coordinator owns session membership and the debounce/coalesce queue.
//! Cell writes land in the session's [`SharedContext`] immediately (so a
//! late joiner sees current state) and are queued for broadcast; the engine
//! flushes queues on its tick, at most once per debounce window, delivering
//! one update per participant per flush. A slot's writer never receives its
//! own update back.

use crate::panel::{PanelId, RenderedCell, SessionId, Slot, ViewerId};
use crate::shared::{SharedContext, SharedSnapshot};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Ticks a session's queue sits before flushing.
pub const DEFAULT_DEBOUNCE_TICKS: u64 = 2;

/// One coalesced slot write awaiting broadcast. Later writes to the same
/// slot replace earlier ones.
#[derive(Debug, Clone)]
struct PendingWrite {
    origin: ViewerId,
    cell: RenderedCell,
}

struct Session {
    panel: PanelId,
    participants: HashSet<ViewerId>,
    context: Arc<SharedContext>,
    pending: BTreeMap<Slot, PendingWrite>,
    queued_since: Option<u64>,
}

/// One participant's share of a flush: every coalesced slot write they did
/// not originate.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    /// The session the update belongs to.
    pub session: SessionId,
    /// The shared panel.
    pub panel: PanelId,
    /// The participant to deliver to.
    pub viewer: ViewerId,
    /// Slot writes, in slot order.
    pub cells: Vec<(Slot, RenderedCell)>,
}

/// Registry of shared-panel sessions.
#[derive(Default)]
pub struct SharedPanelCoordinator {
    sessions: HashMap<SessionId, Session>,
    by_panel: HashMap<PanelId, SessionId>,
    next_id: u64,
    debounce_ticks: u64,
}

impl SharedPanelCoordinator {
    /// Create a coordinator with the default debounce window.
    pub fn new() -> Self {
        Self::with_debounce(DEFAULT_DEBOUNCE_TICKS)
    }

    /// Create a coordinator flushing after `debounce_ticks` ticks.
    pub fn with_debounce(debounce_ticks: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            by_panel: HashMap::new(),
            next_id: 0,
            debounce_ticks,
        }
    }

    /// Open a session for `panel` seeded with `initial`, or join the
    /// existing one if the panel already has a live session.
    pub fn open(
        &mut self,
        panel: &PanelId,
        viewer: ViewerId,
        initial: SharedSnapshot,
    ) -> SessionId {
        if let Some(&id) = self.by_panel.get(panel) {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.participants.insert(viewer);
                return id;
            }
        }
        self.next_id += 1;
        let id = SessionId(self.next_id);
        debug!(session = id.0, panel = %panel, "shared session opened");
        self.sessions.insert(
            id,
            Session {
                panel: panel.clone(),
                participants: HashSet::from([viewer]),
                context: Arc::new(SharedContext::new(initial)),
                pending: BTreeMap::new(),
                queued_since: None,
            },
        );
        self.by_panel.insert(panel.clone(), id);
        id
    }

    /// Remove a viewer from a session. The session tears down once its
    /// participant set empties; other participants are unaffected.
    pub fn leave(&mut self, session: SessionId, viewer: ViewerId) {
        let Some(entry) = self.sessions.get_mut(&session) else {
            return;
        };
        entry.participants.remove(&viewer);
        if entry.participants.is_empty() {
            if let Some(entry) = self.sessions.remove(&session) {
                debug!(session = session.0, panel = %entry.panel, "shared session closed");
                self.by_panel.remove(&entry.panel);
            }
        }
    }

    /// The live session for a panel, if one exists.
    pub fn session_for(&self, panel: &PanelId) -> Option<SessionId> {
        self.by_panel.get(panel).copied()
    }

    /// Participants of a session.
    pub fn participants(&self, session: SessionId) -> Option<&HashSet<ViewerId>> {
        self.sessions.get(&session).map(|s| &s.participants)
    }

    /// The session's current snapshot, for late joiners and re-renders.
    pub fn snapshot(&self, session: SessionId) -> Option<Arc<SharedSnapshot>> {
        self.sessions.get(&session).map(|s| s.context.load())
    }

    /// Write a shared cell on behalf of `origin`.
    ///
    /// The snapshot is swapped immediately; the broadcast is queued and
    /// coalesced per slot until the debounce window elapses.
    pub fn write_cell(
        &mut self,
        session: SessionId,
        origin: ViewerId,
        slot: Slot,
        cell: RenderedCell,
        now_tick: u64,
    ) {
        let Some(entry) = self.sessions.get_mut(&session) else {
            return;
        };
        entry
            .context
            .update(|prior| prior.with_cell(slot, cell.clone()));
        entry.pending.insert(slot, PendingWrite { origin, cell });
        if entry.queued_since.is_none() {
            entry.queued_since = Some(now_tick);
        }
    }

    /// Write a shared value on behalf of `origin`. Values swap immediately
    /// and do not queue a broadcast on their own; cells carry the visible
    /// change.
    pub fn write_value(
        &mut self,
        session: SessionId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        if let Some(entry) = self.sessions.get_mut(&session) {
            let (key, value) = (key.into(), value.into());
            entry.context.update(|prior| prior.with_value(&key, &value));
        }
    }

    /// Flush every session whose debounce window has elapsed.
    ///
    /// Each participant other than a slot's origin receives the slot once,
    /// with only the final coalesced cell.
    pub fn flush(&mut self, now_tick: u64) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        for (&id, session) in &mut self.sessions {
            let Some(since) = session.queued_since else {
                continue;
            };
            if now_tick.saturating_sub(since) < self.debounce_ticks {
                continue;
            }
            let pending = std::mem::take(&mut session.pending);
            session.queued_since = None;
            for &viewer in &session.participants {
                let cells: Vec<(Slot, RenderedCell)> = pending
                    .iter()
                    .filter(|(_, write)| write.origin != viewer)
                    .map(|(&slot, write)| (slot, write.cell.clone()))
                    .collect();
                if cells.is_empty() {
                    continue;
                }
                updates.push(SessionUpdate {
                    session: id,
                    panel: session.panel.clone(),
                    viewer,
                    cells,
                });
            }
        }
        updates
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
