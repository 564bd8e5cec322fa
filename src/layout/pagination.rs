//! Pagination: computes which items occupy which physical slots per page.
//!
//! Three strategies cover the practical layouts:
//!
//! - **FixedSlots**: a statically configured slot list. Positions never
//!   move; paging capacity is the slot count.
//! - **DeclarativeRows**: every slot is declared in a row-based grammar,
//!   one character per column. Content and navigation are both markers.
//! - **Hybrid**: rows declare navigation and decoration only; the content
//!   slot list is every remaining grid slot in row-major order. Pure
//!   declarative layouts scale poorly for large item counts and pure fixed
//!   paging cannot declaratively decorate borders; hybrid does both.

use crate::layout::GridSize;
use crate::panel::{Slot, TemplateId};
use std::collections::HashMap;

/// Row-grammar marker for a content slot.
pub const CONTENT_MARKER: char = '#';
/// Row-grammar marker for the previous-page navigation cell.
pub const PREV_MARKER: char = '<';
/// Row-grammar marker for the next-page navigation cell.
pub const NEXT_MARKER: char = '>';
/// Row-grammar marker for the page-indicator cell.
pub const PAGE_MARKER: char = '=';
/// Row-grammar marker for an intentionally empty slot.
pub const EMPTY_MARKER: char = '.';

/// How content slots are determined for a paginated panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaginationStrategy {
    /// Statically configured content slots, no layout grammar.
    FixedSlots,
    /// Every slot declared through the row grammar.
    DeclarativeRows,
    /// Grammar for navigation/decoration, computed content region.
    Hybrid,
}

/// Pagination configuration, owned by a panel definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationConfig {
    /// Strategy selecting how content slots are derived.
    pub strategy: PaginationStrategy,
    /// Requested items per page. Non-positive values are corrected to the
    /// strategy default at layout time.
    pub items_per_page: i32,
    /// Content slots for [`PaginationStrategy::FixedSlots`].
    pub fixed_slots: Vec<Slot>,
    /// Row grammar, one string per grid row, one character per column.
    pub rows: Vec<String>,
    /// Decoration templates keyed by their grammar character.
    pub decorations: HashMap<char, TemplateId>,
}

impl PaginationConfig {
    /// Fixed-slot configuration.
    pub fn fixed(slots: Vec<Slot>) -> Self {
        Self {
            strategy: PaginationStrategy::FixedSlots,
            items_per_page: 0,
            fixed_slots: slots,
            rows: Vec::new(),
            decorations: HashMap::new(),
        }
    }

    /// Declarative-rows configuration.
    pub fn declarative(rows: Vec<String>) -> Self {
        Self {
            strategy: PaginationStrategy::DeclarativeRows,
            items_per_page: 0,
            fixed_slots: Vec::new(),
            rows,
            decorations: HashMap::new(),
        }
    }

    /// Hybrid configuration.
    pub fn hybrid(rows: Vec<String>, items_per_page: i32) -> Self {
        Self {
            strategy: PaginationStrategy::Hybrid,
            items_per_page,
            fixed_slots: Vec::new(),
            rows,
            decorations: HashMap::new(),
        }
    }

    /// Attach a decoration template for a grammar character.
    #[must_use]
    pub fn with_decoration(mut self, marker: char, template: TemplateId) -> Self {
        self.decorations.insert(marker, template);
        self
    }

    /// Set the requested items per page.
    #[must_use]
    pub const fn with_items_per_page(mut self, items_per_page: i32) -> Self {
        self.items_per_page = items_per_page;
        self
    }
}

/// A navigation cell placed by the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavCell {
    /// Go to the previous page.
    PrevPage,
    /// Go to the next page.
    NextPage,
    /// Displays "page N of M".
    PageIndicator,
}

/// The computed layout for one page of one panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLayout {
    /// Clamped current page, 1-based.
    pub current_page: u32,
    /// Total pages, at least 1.
    pub total_pages: u32,
    /// Content slots in fill order.
    pub content_slots: Vec<Slot>,
    /// Slot to global item index, for the current page only.
    pub slot_items: HashMap<Slot, usize>,
    /// Navigation cells.
    pub nav_cells: HashMap<Slot, NavCell>,
    /// Decoration cells.
    pub decorations: HashMap<Slot, TemplateId>,
}

impl PageLayout {
    /// Whether a next page exists.
    pub const fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }

    /// Whether a previous page exists.
    pub const fn has_prev(&self) -> bool {
        self.current_page > 1
    }
}

/// Compute the layout for `requested_page` given `item_count` items.
///
/// The page is clamped to `[1, total_pages]`; an empty item list yields a
/// single empty page; a non-positive `items_per_page` falls back to the
/// strategy default, so the page count never divides by zero.
pub fn layout(
    config: &PaginationConfig,
    grid: GridSize,
    requested_page: u32,
    item_count: usize,
) -> PageLayout {
    let (content_slots, nav_cells, decorations) = scan(config, grid);

    let per_page = effective_items_per_page(config, content_slots.len());
    let total_pages = item_count.div_ceil(per_page).max(1) as u32;
    let current_page = requested_page.clamp(1, total_pages);

    let start = (current_page as usize - 1) * per_page;
    let mut slot_items = HashMap::new();
    for (offset, slot) in content_slots.iter().take(per_page).enumerate() {
        let item = start + offset;
        if item < item_count {
            slot_items.insert(*slot, item);
        }
    }

    PageLayout {
        current_page,
        total_pages,
        content_slots,
        slot_items,
        nav_cells,
        decorations,
    }
}

/// Resolve the per-page capacity, correcting non-positive configuration.
fn effective_items_per_page(config: &PaginationConfig, content_slot_count: usize) -> usize {
    let configured = usize::try_from(config.items_per_page).unwrap_or(0);
    let capped = match config.strategy {
        // Fixed positions cannot hold more items than slots.
        PaginationStrategy::FixedSlots => content_slot_count,
        PaginationStrategy::DeclarativeRows | PaginationStrategy::Hybrid => {
            if configured > 0 {
                configured.min(content_slot_count.max(1))
            } else {
                content_slot_count
            }
        }
    };
    capped.max(1)
}

type ScanResult = (
    Vec<Slot>,
    HashMap<Slot, NavCell>,
    HashMap<Slot, TemplateId>,
);

/// Derive content/nav/decoration slots from the configuration.
fn scan(config: &PaginationConfig, grid: GridSize) -> ScanResult {
    let mut nav_cells = HashMap::new();
    let mut decorations = HashMap::new();
    let mut declared_content = Vec::new();
    let mut claimed = vec![false; grid.slot_count() as usize];

    for (row, line) in config.rows.iter().enumerate().take(usize::from(grid.rows)) {
        for (col, marker) in line.chars().enumerate().take(usize::from(grid.columns)) {
            let slot = Slot::at(row as u16, col as u16, grid.columns);
            match marker {
                CONTENT_MARKER => declared_content.push(slot),
                PREV_MARKER => {
                    nav_cells.insert(slot, NavCell::PrevPage);
                    claimed[usize::from(slot.index())] = true;
                }
                NEXT_MARKER => {
                    nav_cells.insert(slot, NavCell::NextPage);
                    claimed[usize::from(slot.index())] = true;
                }
                PAGE_MARKER => {
                    nav_cells.insert(slot, NavCell::PageIndicator);
                    claimed[usize::from(slot.index())] = true;
                }
                EMPTY_MARKER | ' ' => claimed[usize::from(slot.index())] = true,
                other => {
                    if let Some(template) = config.decorations.get(&other) {
                        decorations.insert(slot, template.clone());
                    }
                    claimed[usize::from(slot.index())] = true;
                }
            }
        }
    }

    let content_slots = match config.strategy {
        PaginationStrategy::FixedSlots => config.fixed_slots.clone(),
        PaginationStrategy::DeclarativeRows => declared_content,
        // Hybrid: everything the grammar did not claim, row-major.
        PaginationStrategy::Hybrid => {
            let mut content: Vec<Slot> = declared_content;
            for index in 0..grid.slot_count().min(u32::from(u16::MAX)) {
                let slot = Slot(index as u16);
                if !claimed[index as usize] && !content.contains(&slot) {
                    content.push(slot);
                }
            }
            content.sort_unstable();
            content
        }
    };

    (content_slots, nav_cells, decorations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridSize {
        GridSize::new(3, 9)
    }

    #[test]
    fn test_fixed_slots_paging() {
        let config = PaginationConfig::fixed(vec![Slot(0), Slot(1), Slot(2)]);
        let page = layout(&config, grid(), 1, 7);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.content_slots.len(), 3);
        assert_eq!(page.slot_items[&Slot(0)], 0);
        assert_eq!(page.slot_items[&Slot(2)], 2);
    }

    #[test]
    fn test_page_clamps_both_ends() {
        let config = PaginationConfig::fixed(vec![Slot(0)]);
        assert_eq!(layout(&config, grid(), 0, 5).current_page, 1);
        assert_eq!(layout(&config, grid(), 99, 5).current_page, 5);
    }

    #[test]
    fn test_empty_items_yield_one_empty_page() {
        let config = PaginationConfig::fixed(vec![Slot(0), Slot(1)]);
        let page = layout(&config, grid(), 3, 0);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.current_page, 1);
        assert!(page.slot_items.is_empty());
    }

    #[test]
    fn test_non_positive_items_per_page_corrected() {
        let mut config = PaginationConfig::hybrid(vec!["<=>".to_string()], -4);
        config.items_per_page = -4;
        let page = layout(&config, GridSize::new(2, 3), 1, 10);
        // Never panics, never divides by zero.
        assert!(page.total_pages >= 1);
    }

    #[test]
    fn test_declarative_rows_markers() {
        let rows = vec![
            "b#######b".to_string(),
            "b#######b".to_string(),
            "<===b===>".to_string(),
        ];
        let config = PaginationConfig::declarative(rows)
            .with_decoration('b', TemplateId::new("border"));
        let page = layout(&config, grid(), 1, 20);
        assert_eq!(page.content_slots.len(), 14);
        assert_eq!(page.nav_cells[&Slot::at(2, 0, 9)], NavCell::PrevPage);
        assert_eq!(page.nav_cells[&Slot::at(2, 8, 9)], NavCell::NextPage);
        assert_eq!(page.decorations[&Slot(0)], TemplateId::new("border"));
        assert_eq!(page.total_pages, 2);
    }

    #[test]
    fn test_hybrid_content_is_unclaimed_region() {
        // Bottom row fully claimed by nav/decor; rows 0-1 left for content.
        let rows = vec![
            String::new(),
            String::new(),
            "<bbb=bbb>".to_string(),
        ];
        let config = PaginationConfig::hybrid(rows, 0)
            .with_decoration('b', TemplateId::new("border"));
        let page = layout(&config, grid(), 1, 30);
        assert_eq!(page.content_slots.len(), 18);
        assert_eq!(page.content_slots[0], Slot(0));
        assert_eq!(page.total_pages, 2);
    }

    #[test]
    fn test_second_page_item_mapping() {
        let config = PaginationConfig::fixed(vec![Slot(3), Slot(4)]);
        let page = layout(&config, grid(), 2, 5);
        assert_eq!(page.slot_items[&Slot(3)], 2);
        assert_eq!(page.slot_items[&Slot(4)], 3);
        // Final page shows the remainder only.
        let last = layout(&config, grid(), 3, 5);
        assert_eq!(last.slot_items.len(), 1);
        assert_eq!(last.slot_items[&Slot(3)], 4);
    }

    #[test]
    fn test_nav_availability_flags() {
        let config = PaginationConfig::fixed(vec![Slot(0)]);
        let first = layout(&config, grid(), 1, 3);
        assert!(first.has_next());
        assert!(!first.has_prev());
        let last = layout(&config, grid(), 3, 3);
        assert!(!last.has_next());
        assert!(last.has_prev());
    }
}
