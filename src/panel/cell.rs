//! Rendered cells: the display-ready unit handed to transport.
//!
//! A [`RenderedCell`] is a plain value. The engine clones it freely
//! (cache reads hand out defensive copies, frames own their cells) so
//! nothing downstream can mutate cached or shared content.

use crate::panel::Slot;
use bitflags::bitflags;
use std::collections::BTreeMap;

bitflags! {
    /// Visual accent flags applied on top of a cell's base visual.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CellAccents: u8 {
        /// Emphasized / glowing.
        const GLOW = 0b0000_0001;
        /// De-emphasized.
        const DIM = 0b0000_0010;
        /// Marked as selected by the viewer.
        const MARKED = 0b0000_0100;
        /// Not interactable right now.
        const DISABLED = 0b0000_1000;
    }
}

/// A compiled, display-ready cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderedCell {
    /// Identifier of the visual asset to display.
    visual: String,
    /// Resolved title line.
    title: String,
    /// Resolved body lines.
    body: Vec<String>,
    /// Metadata tags carried through to transport untouched.
    tags: Vec<String>,
    /// Accent flags.
    accents: CellAccents,
}

impl RenderedCell {
    /// Tag attached to placeholder cells produced on compile failure.
    pub const PLACEHOLDER_TAG: &'static str = "compile-error";

    /// Create a cell with the given visual.
    pub fn new(visual: impl Into<String>) -> Self {
        Self {
            visual: visual.into(),
            ..Self::default()
        }
    }

    /// Set the title line.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the body lines.
    #[must_use]
    pub fn with_body(mut self, body: Vec<String>) -> Self {
        self.body = body;
        self
    }

    /// Set the metadata tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the accent flags.
    #[must_use]
    pub const fn with_accents(mut self, accents: CellAccents) -> Self {
        self.accents = accents;
        self
    }

    /// The clearly marked cell substituted when compilation fails.
    pub fn placeholder() -> Self {
        Self::new("builtin:missing")
            .with_title("unavailable")
            .with_tags(vec![Self::PLACEHOLDER_TAG.to_string()])
            .with_accents(CellAccents::DIM)
    }

    /// Whether this cell is a compile-failure placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.tags.iter().any(|t| t == Self::PLACEHOLDER_TAG)
    }

    /// The visual asset id.
    pub fn visual(&self) -> &str {
        &self.visual
    }

    /// The resolved title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The resolved body lines.
    pub fn body(&self) -> &[String] {
        &self.body
    }

    /// The metadata tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// The accent flags.
    pub const fn accents(&self) -> CellAccents {
        self.accents
    }
}

/// A fully rendered panel frame: every visible slot mapped to its cell.
///
/// This is what the engine hands to the transport sink; it never builds
/// wire messages itself. Slots iterate in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedFrame {
    cells: BTreeMap<Slot, RenderedCell>,
}

impl RenderedFrame {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a cell at a slot, replacing any previous content.
    pub fn set(&mut self, slot: Slot, cell: RenderedCell) {
        self.cells.insert(slot, cell);
    }

    /// The cell at a slot, if any.
    pub fn get(&self, slot: Slot) -> Option<&RenderedCell> {
        self.cells.get(&slot)
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the frame has no populated slots.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate populated slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &RenderedCell)> {
        self.cells.iter().map(|(slot, cell)| (*slot, cell))
    }
}

impl IntoIterator for RenderedFrame {
    type Item = (Slot, RenderedCell);
    type IntoIter = std::collections::btree_map::IntoIter<Slot, RenderedCell>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.into_iter()
    }
}
