//! Windowed rendering math for the card grid.
//!
//! Everything is a function of viewport width, item count and scroll offset.
//! The only state kept is the table of measured row heights and the last
//! window handed out.

use std::collections::HashMap;
use std::ops::Range;

/// Below this width the grid is a single column.
pub const MOBILE_BREAKPOINT: f64 = 640.0;
/// Horizontal padding of the grid container, both sides together.
pub const CONTAINER_PADDING: f64 = 48.0;
/// Narrowest card before a column is dropped.
pub const MIN_CARD_WIDTH: f64 = 320.0;
pub const CARD_GAP: f64 = 24.0;
pub const MAX_COLUMNS: usize = 4;
/// Height assumed for a row until it has been measured.
pub const ESTIMATED_ROW_HEIGHT: f64 = 320.0;
/// Extra rows rendered on each side of the visible range.
pub const OVERSCAN: usize = 3;

/// Number of card columns that fit in `viewport_width`.
pub fn column_count(viewport_width: f64) -> usize {
    if !viewport_width.is_finite() || viewport_width < MOBILE_BREAKPOINT {
        return 1;
    }
    let usable = viewport_width - CONTAINER_PADDING;
    let fits = ((usable + CARD_GAP) / (MIN_CARD_WIDTH + CARD_GAP)).floor();
    if fits < 1.0 {
        1
    } else {
        // fits is finite and positive here
        (fits as usize).min(MAX_COLUMNS)
    }
}

/// Rows needed to lay out `item_count` items in `columns` columns.
pub fn row_count(item_count: usize, columns: usize) -> usize {
    item_count.div_ceil(columns.max(1))
}

/// Indices into the flat item list that make up `row`.
pub fn row_items(row: usize, columns: usize, item_count: usize) -> Range<usize> {
    let columns = columns.max(1);
    let start = (row * columns).min(item_count);
    let end = (start + columns).min(item_count);
    start..end
}

/// Inclusive range of rows to render, overscan included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleWindow {
    pub first_row: usize,
    pub last_row: usize,
    pub columns: usize,
}

impl VisibleWindow {
    pub fn rows(&self) -> std::ops::RangeInclusive<usize> {
        self.first_row..=self.last_row
    }

    /// Flat item indices covered by the window.
    pub fn item_range(&self, item_count: usize) -> Range<usize> {
        let start = row_items(self.first_row, self.columns, item_count).start;
        let end = row_items(self.last_row, self.columns, item_count).end;
        start..end
    }
}

/// Row layout state: the column count, measured row heights and the
/// last computed window.
#[derive(Debug, Clone)]
pub struct Virtualizer {
    columns: usize,
    measured: HashMap<usize, f64>,
    last_window: Option<VisibleWindow>,
}

impl Virtualizer {
    pub fn new(viewport_width: f64) -> Self {
        let mut virtualizer = Self {
            columns: 0,
            measured: HashMap::new(),
            last_window: None,
        };
        virtualizer.resize(viewport_width);
        virtualizer
    }

    pub const fn columns(&self) -> usize {
        self.columns
    }

    /// Recompute the column count. Measurements belong to a layout, so they
    /// are dropped when the count changes. Returns whether it changed.
    pub fn resize(&mut self, viewport_width: f64) -> bool {
        let columns = column_count(viewport_width);
        if columns == self.columns {
            return false;
        }
        self.columns = columns;
        self.measured.clear();
        self.last_window = None;
        true
    }

    /// Record the rendered height of a row.
    pub fn measure(&mut self, row: usize, height: f64) {
        if height.is_finite() && height > 0.0 {
            self.measured.insert(row, height);
        }
    }

    pub fn row_height(&self, row: usize) -> f64 {
        self.measured
            .get(&row)
            .copied()
            .unwrap_or(ESTIMATED_ROW_HEIGHT)
    }

    /// Distance from the top of the list to the top of `row`.
    pub fn row_offset(&self, row: usize) -> f64 {
        (0..row).map(|r| self.row_height(r)).sum()
    }

    pub fn total_height(&self, item_count: usize) -> f64 {
        self.row_offset(row_count(item_count, self.columns))
    }

    /// Rows intersecting `[scroll_offset, scroll_offset + viewport_height)`
    /// widened by [`OVERSCAN`]. `None` for an empty list.
    pub fn window(
        &mut self,
        item_count: usize,
        scroll_offset: f64,
        viewport_height: f64,
    ) -> Option<VisibleWindow> {
        let rows = row_count(item_count, self.columns);
        if rows == 0 {
            self.last_window = None;
            return None;
        }
        let scroll_offset = if scroll_offset.is_finite() {
            scroll_offset.max(0.0)
        } else {
            0.0
        };
        let viewport_bottom = scroll_offset + viewport_height.max(0.0);

        let mut first = rows - 1;
        let mut last = 0;
        let mut found_first = false;
        let mut top = 0.0;
        for row in 0..rows {
            let bottom = top + self.row_height(row);
            if !found_first && bottom > scroll_offset {
                first = row;
                found_first = true;
            }
            if top < viewport_bottom {
                last = row;
            } else {
                break;
            }
            top = bottom;
        }
        let last = last.max(first);

        let window = VisibleWindow {
            first_row: first.saturating_sub(OVERSCAN),
            last_row: (last + OVERSCAN).min(rows - 1),
            columns: self.columns,
        };
        self.last_window = Some(window);
        Some(window)
    }

    #[allow(dead_code)]
    pub const fn last_window(&self) -> Option<VisibleWindow> {
        self.last_window
    }
}

/// True exactly when the window reaches the final known row, another page
/// exists and nothing is being fetched.
pub fn should_load_more(
    window: Option<VisibleWindow>,
    row_count: usize,
    has_more: bool,
    in_flight: bool,
) -> bool {
    has_more
        && !in_flight
        && window.is_some_and(|w| row_count > 0 && w.last_row + 1 == row_count)
}
