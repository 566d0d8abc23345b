//! Scan-line collection of the tile columns inside a polygon.
//!
//! The engine holds two vectors per tile column (a "stripe" running from
//! north to south): candidate *minimum* y bounds and candidate *maximum* y
//! bounds. For every ring segment we decide on which side of the segment the
//! polygon interior lies. Interior above: the segment caps an inside-interval
//! from below, so its largest y goes into the maximum bounds. Interior below:
//! its smallest y goes into the minimum bounds. (Remember that the tile-space
//! y axis points south, so "above" means smaller y.)
//!
//! After all segments of all rings have been recorded, [`sort_bounds`] pairs
//! the entries up per column; each (minimum, maximum) pair is then one
//! interval of tile rows inside the polygon, read back through the cursor
//! methods [`move_to_next_column`], [`column_has_intervals`] and
//! [`next_pair`].
//!
//! [`sort_bounds`]: IntersectingTiles::sort_bounds
//! [`move_to_next_column`]: IntersectingTiles::move_to_next_column
//! [`column_has_intervals`]: IntersectingTiles::column_has_intervals
//! [`next_pair`]: IntersectingTiles::next_pair

use std::f64::consts::PI;

/// In-band marker for a bounds entry that was merged away. Sorts to the end
/// of its column and is larger than any valid tile index.
const INVALIDATED: u32 = u32::MAX;

/// Per-column y-crossing bounds of one polygon, plus read cursors.
///
/// Lives only while a single polygon is being rasterized; construction sizes
/// the column vectors to the polygon's buffered x extent.
pub struct IntersectingTiles {
    /// Leftmost tile column covered, after buffer expansion.
    offset_x: u32,
    /// One past the largest valid tile index (the map width).
    max_tile_id: u32,
    leeway: f64,
    min_bounds: Vec<Vec<u32>>,
    max_bounds: Vec<Vec<u32>>,
    current_x: usize,
    next_idx_min: usize,
    next_idx_max: usize,
}

impl IntersectingTiles {
    /// Create the engine for a polygon spanning `[x_min, x_max]` in tile
    /// space. `leeway` widens the span on both sides.
    pub fn new(x_min: f64, x_max: f64, map_width: u32, leeway: f64) -> Self {
        let offset_x = (x_min - leeway) as u32;
        let columns = ((x_max + leeway) as u32).saturating_sub(offset_x) as usize + 1;
        IntersectingTiles {
            offset_x,
            max_tile_id: map_width,
            leeway,
            min_bounds: vec![Vec::new(); columns],
            max_bounds: vec![Vec::new(); columns],
            current_x: 0,
            next_idx_min: 0,
            next_idx_max: 0,
        }
    }

    fn x_index(&self, x: u32) -> usize {
        (x - self.offset_x) as usize
    }

    fn add_minimum(&mut self, x: u32, min: f64) {
        let index = self.x_index(x);
        self.min_bounds[index].push((min - self.leeway) as u32);
    }

    fn add_maximum(&mut self, x: u32, max: f64) {
        let index = self.x_index(x);
        self.max_bounds[index].push((max + self.leeway) as u32);
    }

    /// Record one crossing of column `x`: the segment's largest y if the
    /// interior is above it, its smallest y otherwise.
    fn add_minimum_or_maximum(&mut self, x: u32, y1: f64, y2: f64, interior_above: bool) {
        if interior_above {
            // The y axis points south, so the bound capping the interval from
            // below is the *larger* of the two y values.
            self.add_maximum(x, y1.max(y2));
        } else {
            self.add_minimum(x, y1.min(y2));
        }
    }

    /// Which side of the segment the polygon interior is on, for a ring
    /// walked in its source orientation. Strictly inside (-pi/2, pi/2) counts
    /// as above; y1 and y2 are swapped in the angle because the y axis points
    /// south.
    fn interior_side_above(x1: f64, y1: f64, x2: f64, y2: f64) -> bool {
        let angle = (y1 - y2).atan2(x2 - x1);
        angle > -PI / 2.0 && angle < PI / 2.0
    }

    /// Record one ring segment, given in tile-space coordinates.
    ///
    /// The `_outer_ring` flag is accepted for API symmetry; the orientation
    /// rule is the same for outer and inner rings, which requires inner rings
    /// to be wound opposite to the outer ring in the source data.
    pub fn evaluate_segment(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, _outer_ring: bool) {
        // A segment that stays inside one buffered column would contribute a
        // lone minimum or maximum with no partner to pair with. Record both
        // its extremes instead so the entries stay paired; direction and ring
        // kind cannot matter. Most building outlines take this path.
        if (x1.min(x2) - self.leeway) as u32 == (x1.max(x2) + self.leeway) as u32 {
            self.add_minimum(x1 as u32, y1.min(y2));
            self.add_maximum(x1 as u32, y1.max(y2));
            return;
        }

        let interior_above = Self::interior_side_above(x1, y1, x2, y2);

        // Walk west to east; the original direction has already been folded
        // into interior_above.
        let (x1, y1, x2, y2) = if x2 < x1 {
            (x2, y2, x1, y1)
        } else {
            (x1, y1, x2, y2)
        };

        let start = (x1 - self.leeway) as u32;
        let end = (x2 + self.leeway) as u32;
        for x in start..=end {
            self.add_minimum_or_maximum(x, y1, y2, interior_above);
            // A column crossed on both its west and east border sees the
            // segment twice.
            if x != start && x != end {
                self.add_minimum_or_maximum(x, y1, y2, interior_above);
            }
        }
    }

    /// Sort all bounds and merge overlapping intervals.
    ///
    /// Must be called once after the last [`evaluate_segment`] and before the
    /// first [`next_pair`].
    ///
    /// [`evaluate_segment`]: IntersectingTiles::evaluate_segment
    /// [`next_pair`]: IntersectingTiles::next_pair
    pub fn sort_bounds(&mut self) {
        for column in &mut self.min_bounds {
            column.sort_unstable();
        }
        for column in &mut self.max_bounds {
            column.sort_unstable();
        }

        // Merge overlapping intervals: pull the merged bounds into the later
        // slot and invalidate the earlier one.
        for column in 0..self.min_bounds.len().min(self.max_bounds.len()) {
            let entries = self.min_bounds[column]
                .len()
                .min(self.max_bounds[column].len());
            for entry in 1..entries {
                if self.min_bounds[column][entry] <= self.max_bounds[column][entry - 1] {
                    self.min_bounds[column][entry] =
                        self.min_bounds[column][entry].min(self.min_bounds[column][entry - 1]);
                    self.max_bounds[column][entry] =
                        self.max_bounds[column][entry].max(self.max_bounds[column][entry - 1]);
                    self.min_bounds[column][entry - 1] = INVALIDATED;
                    self.max_bounds[column][entry - 1] = INVALIDATED;
                }
            }
        }

        // Sort again so the invalidated entries migrate to the end.
        for column in &mut self.min_bounds {
            column.sort_unstable();
        }
        for column in &mut self.max_bounds {
            column.sort_unstable();
        }
    }

    /// True while the current column still has unread (minimum, maximum)
    /// entries.
    pub fn column_has_intervals(&self) -> bool {
        self.next_idx_min < self.min_bounds[self.current_x].len()
            && self.next_idx_max < self.max_bounds[self.current_x].len()
    }

    /// Read the next interval of the current column and advance the cursors.
    ///
    /// Returns `None` when either bound is invalidated or lies outside the
    /// map. Callers must check [`column_has_intervals`] first.
    ///
    /// [`column_has_intervals`]: IntersectingTiles::column_has_intervals
    pub fn next_pair(&mut self) -> Option<(u32, u32)> {
        let minimum = self.min_bounds[self.current_x][self.next_idx_min];
        self.next_idx_min += 1;
        let maximum = self.max_bounds[self.current_x][self.next_idx_max];
        self.next_idx_max += 1;
        (minimum < self.max_tile_id && maximum < self.max_tile_id).then_some((minimum, maximum))
    }

    /// Advance to the next tile column, resetting the interval cursors.
    /// Returns false once the last column has been passed.
    pub fn move_to_next_column(&mut self) -> bool {
        self.current_x += 1;
        self.next_idx_min = 0;
        self.next_idx_max = 0;
        self.current_x < self.min_bounds.len() && self.current_x < self.max_bounds.len()
    }

    /// Tile x index of the column the cursors currently point at.
    pub fn current_x(&self) -> u32 {
        self.offset_x + self.current_x as u32
    }
}
