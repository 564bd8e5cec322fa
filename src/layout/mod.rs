//! Layout module: pagination strategies for panel content.
//!
//! Layouts are pure functions of (config, page, item count). Nothing here
//! touches live panel state, which keeps every strategy trivially testable.

mod pagination;

pub use pagination::{
    layout, NavCell, PageLayout, PaginationConfig, PaginationStrategy, CONTENT_MARKER,
    EMPTY_MARKER, NEXT_MARKER, PAGE_MARKER, PREV_MARKER,
};

/// Grid dimensions of a panel surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize {
    /// Number of rows.
    pub rows: u16,
    /// Number of columns.
    pub columns: u16,
}

impl GridSize {
    /// Create a grid size.
    #[inline]
    pub const fn new(rows: u16, columns: u16) -> Self {
        Self { rows, columns }
    }

    /// Total number of slots.
    ///
    /// Widened to `u32` so oversized dimensions count instead of wrapping;
    /// definition validation rejects grids whose slots overflow a `u16`.
    #[inline]
    pub const fn slot_count(&self) -> u32 {
        self.rows as u32 * self.columns as u32
    }

    /// Whether a linear slot index falls inside the grid.
    #[inline]
    pub const fn contains(&self, index: u16) -> bool {
        (index as u32) < self.slot_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_count_does_not_wrap_on_large_grids() {
        assert_eq!(GridSize::new(300, 300).slot_count(), 90_000);
        assert_eq!(GridSize::new(3, 9).slot_count(), 27);
    }

    #[test]
    fn test_contains_checks_linear_bounds() {
        let grid = GridSize::new(3, 9);
        assert!(grid.contains(26));
        assert!(!grid.contains(27));
        assert!(!GridSize::new(256, 257).contains(u16::MAX));
    }
}
