//! The tile-expiry accumulator.
//!
//! [`TileExpiry`] collects the set of max-zoom tiles touched by a stream of
//! changed geometries. Tiles are stored as quadkeys in an unordered set; the
//! enclosing tiles at lower zoom levels are derived only at output time by
//! bit-shifting down the sorted set, so ingestion never pays for more than the
//! maximum zoom.
//!
//! One accumulator belongs to one worker. Workers ingest without any
//! coordination and a single thread merges the shards with [`merge`] before
//! draining the result through [`output_and_destroy`].
//!
//! [`merge`]: TileExpiry::merge
//! [`output_and_destroy`]: TileExpiry::output_and_destroy

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use geo::{Geometry, LineString, Polygon};

use crate::output::{TileListWriter, TileSink};
use crate::projection::{Projection, EARTH_CIRCUMFERENCE};
use crate::quadkey::{self, quadkey_to_xy, xy_to_quadkey};
use crate::scanline::IntersectingTiles;
use crate::{wkb, Error, Result};

/// How many tile-widths of space to expire either side of a changed feature,
/// so that rendering artefacts reaching across tile borders are covered.
pub const TILE_EXPIRY_LEEWAY: f64 = 0.1;

/// Accumulates the dirty tiles of one worker shard.
pub struct TileExpiry {
    /// Widest bounding box a polygon may have, in source-system units.
    /// Anything wider is suspected of wrapping the globe and only its rings
    /// are expired.
    max_bbox: f64,
    max_zoom: u32,
    /// Number of tile columns at `max_zoom`; 0 disables the engine entirely.
    map_width: u32,
    /// Width of one tile in metres; merge partners must agree on it.
    tile_width: f64,
    projection: Arc<dyn Projection>,
    /// Most recently inserted tile. Rasterization hits the same tile many
    /// times in a row, so this one-slot cache skips most set lookups. Starts
    /// out of range so the first insertion always proceeds.
    last_tile: (u32, u32),
    /// Quadkeys of the dirty tiles at `max_zoom`. Lower zoom levels are
    /// derived at output time.
    dirty: HashSet<u64>,
}

impl TileExpiry {
    /// Create an accumulator expiring tiles at `max_zoom`.
    ///
    /// A `max_zoom` of 0 disables expiry: every ingest call becomes a no-op.
    pub fn new(max_zoom: u32, max_bbox: f64, projection: Arc<dyn Projection>) -> Self {
        debug_assert!(max_zoom <= quadkey::MAX_ZOOM);
        let map_width = if max_zoom > 0 { 1u32 << max_zoom } else { 0 };
        let tile_width = if map_width > 0 {
            EARTH_CIRCUMFERENCE / f64::from(map_width)
        } else {
            0.0
        };
        TileExpiry {
            max_bbox,
            max_zoom,
            map_width,
            tile_width,
            projection,
            last_tile: (map_width.wrapping_add(1), map_width.wrapping_add(1)),
            dirty: HashSet::new(),
        }
    }

    /// Maximum zoom level this accumulator expires at.
    pub fn max_zoom(&self) -> u32 {
        self.max_zoom
    }

    /// Number of tile columns at the maximum zoom (0 when disabled).
    pub fn map_width(&self) -> u32 {
        self.map_width
    }

    /// Number of distinct max-zoom tiles collected so far.
    pub fn dirty_tile_count(&self) -> usize {
        self.dirty.len()
    }

    /// Expire the tile containing a point, including a small buffer around
    /// it. Coordinates are in the source reference system.
    pub fn from_point(&mut self, lon: f64, lat: f64) {
        if self.map_width == 0 {
            return;
        }
        let (tile_x, tile_y) = self.projection.project(lon, lat, self.map_width);
        self.from_bbox(tile_x, tile_y, tile_x, tile_y);
    }

    /// Expire the tiles intersecting a bounding box given in the source
    /// reference system. Like [`from_bbox`] after projecting the corners;
    /// note that the y axis flips between most projections and tile space.
    ///
    /// [`from_bbox`]: TileExpiry::from_bbox
    pub fn from_bbox_lon_lat(&mut self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) {
        if self.map_width == 0 {
            return;
        }
        let (x_min, y_min) = self.projection.project(min_x, max_y, self.map_width);
        let (x_max, y_max) = self.projection.project(max_x, min_y, self.map_width);
        self.from_bbox(x_min, y_min, x_max, y_max);
    }

    /// Expire the tiles intersecting a bounding box given in tile-space
    /// doubles, widened by the leeway buffer.
    pub fn from_bbox(&mut self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) {
        if self.map_width == 0 {
            return;
        }
        self.from_bbox_without_buffer(
            (min_x - TILE_EXPIRY_LEEWAY) as u32,
            (min_y - TILE_EXPIRY_LEEWAY) as u32,
            (max_x + TILE_EXPIRY_LEEWAY) as u32,
            (max_y + TILE_EXPIRY_LEEWAY) as u32,
        );
    }

    /// Expire the tile rectangle `(min_x, min_y) ..= (max_x, max_y)` exactly,
    /// without any buffer.
    pub fn from_bbox_without_buffer(&mut self, min_x: u32, min_y: u32, max_x: u32, max_y: u32) {
        if self.map_width == 0 {
            return;
        }
        // Cap the walk at the map edge; expire_tile clamps the indices, so a
        // far out-of-range rectangle degenerates to the edge tiles instead of
        // a four-billion-step loop.
        let min_x = min_x.min(self.map_width);
        let min_y = min_y.min(self.map_width);
        let max_x = max_x.min(self.map_width);
        let max_y = max_y.min(self.map_width);
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                self.expire_tile(x, y);
            }
        }
    }

    /// Expire all tiles along a line segment given in the source reference
    /// system, including a buffer. Splits the segment first if it crosses the
    /// 180th meridian.
    pub fn from_line_lon_lat(&mut self, lon_a: f64, lat_a: f64, lon_b: f64, lat_b: f64) {
        if self.map_width == 0 {
            return;
        }
        let (ax, ay) = self.projection.project(lon_a, lat_a, self.map_width);
        let (bx, by) = self.projection.project(lon_b, lat_b, self.map_width);
        // walk from west to east
        let (x1, y1, x2, y2) = if ax > bx {
            (bx, by, ax, ay)
        } else {
            (ax, ay, bx, by)
        };
        let map_width = f64::from(self.map_width);
        if x2 - x1 > map_width / 2.0 {
            // The segment is shorter going the other way around the globe: it
            // crosses the 180th meridian and has to be split there.
            if x1 == 0.0 && x2 == map_width {
                // The segment lies on the meridian itself; splitting would
                // divide by zero below.
                self.expire_line_segment(0.0, y1, 0.0, y2);
                return;
            }
            // Intercept theorem: (y2-y1)/(y_split-y1) = (x2-x1)/(x_split-x1),
            // with the x distance measured across the meridian.
            let x_distance = map_width + x1 - x2;
            let y_split = y1 + (y2 - y1) * (x1 / x_distance);
            self.expire_line_segment(0.0, y_split, x1, y1);
            self.expire_line_segment(x2, y2, map_width, y_split);
        } else {
            self.expire_line_segment(x1, y1, x2, y2);
        }
    }

    /// Expire tiles for a geometry decoded from a WKB or EWKB buffer.
    ///
    /// Unknown geometry types and undecodable buffers are logged with the
    /// feature id and dropped; they never fail the caller.
    pub fn from_wkb(&mut self, wkb: &[u8], osm_id: i64) {
        if self.map_width == 0 {
            return;
        }
        match wkb::wkb_to_geometry(wkb) {
            Ok(geometry) => self.from_geometry(&geometry, osm_id),
            Err(error) => {
                log::warn!("OSM id {}: {}, cannot expire.", osm_id, error);
            }
        }
    }

    /// Expire tiles for an already decoded geometry.
    pub fn from_geometry(&mut self, geometry: &Geometry, osm_id: i64) {
        if self.map_width == 0 {
            return;
        }
        match geometry {
            Geometry::Point(point) => self.from_point(point.x(), point.y()),
            Geometry::LineString(line) => self.from_linestring(line),
            Geometry::Polygon(polygon) => self.from_polygon(polygon),
            Geometry::MultiLineString(lines) => {
                for line in &lines.0 {
                    self.from_linestring(line);
                }
            }
            Geometry::MultiPolygon(polygons) => {
                for polygon in &polygons.0 {
                    self.from_polygon(polygon);
                }
            }
            other => {
                log::warn!(
                    "OSM id {}: unknown geometry type {}, cannot expire.",
                    osm_id,
                    geometry_type_name(other)
                );
            }
        }
    }

    /// Merge the dirty tiles collected by `other` into this accumulator,
    /// emptying `other`.
    ///
    /// Fails when the accumulators were configured for different tile grids.
    pub fn merge(&mut self, other: &mut TileExpiry) -> Result<()> {
        if self.map_width != other.map_width {
            return Err(Error::MergeMapWidth(self.map_width, other.map_width));
        }
        if self.tile_width != other.tile_width {
            return Err(Error::MergeTileWidth(self.tile_width, other.tile_width));
        }
        if self.dirty.is_empty() {
            self.dirty = std::mem::take(&mut other.dirty);
        } else {
            self.dirty.extend(other.dirty.drain());
        }
        Ok(())
    }

    /// Emit every dirty tile on all zoom levels from `max_zoom` down to
    /// `min_zoom`, draining the accumulator.
    ///
    /// The sorted quadkeys are walked exactly once: right-shifting a quadkey
    /// yields its ancestor tile, and because the input is sorted, siblings of
    /// an already emitted ancestor are adjacent and can be skipped by
    /// comparing against the previously handled key. Each tile is delivered
    /// exactly once.
    pub fn output_and_destroy<S: TileSink>(&mut self, sink: &mut S, min_zoom: u32) {
        debug_assert!(min_zoom <= self.max_zoom);
        let mut tiles: Vec<u64> = std::mem::take(&mut self.dirty).into_iter().collect();
        tiles.sort_unstable();
        // larger than any legal quadkey at max_zoom
        let mut last_quadkey = 1u64 << (2 * self.max_zoom);
        for &current in &tiles {
            for dz in 0..=self.max_zoom - min_zoom {
                let ancestor = current >> (dz * 2);
                // At dz > 0 consecutive quadkeys are often sub-tiles of the
                // same ancestor; emit only the first sibling.
                if ancestor == last_quadkey >> (dz * 2) {
                    continue;
                }
                let (x, y) = quadkey_to_xy(ancestor, self.max_zoom - dz);
                sink.emit(x, y, self.max_zoom - dz);
            }
            last_quadkey = current;
        }
    }

    /// Append the expiry list to a file, one `zoom/x/y` line per tile,
    /// draining the accumulator. See [`TileListWriter`] for the failure
    /// behavior.
    pub fn output_and_destroy_to_file<P: AsRef<Path>>(&mut self, path: P, min_zoom: u32) {
        let mut writer = TileListWriter::create(path);
        self.output_and_destroy(&mut writer, min_zoom);
    }

    /// Clamp a single tile index into the valid range and record it.
    fn expire_tile(&mut self, x: u32, y: u32) {
        let x = x.min(self.map_width - 1);
        let y = y.min(self.map_width - 1);
        // Only touch the set if this is not a repeat of the last insertion.
        if self.last_tile == (x, y) {
            return;
        }
        self.dirty.insert(xy_to_quadkey(x, y, self.max_zoom));
        self.last_tile = (x, y);
    }

    /// Clamp a tile-space coordinate into `[0, map_width]`.
    fn normalise_tile_coord(&self, coord: f64) -> f64 {
        coord.clamp(0.0, f64::from(self.map_width))
    }

    /// Expire all tiles a buffered line segment intersects. Tile-space
    /// coordinates, west end first; the segment must not span more than half
    /// the map (antimeridian crossings are split beforehand).
    fn expire_line_segment(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) {
        debug_assert!(x1 <= x2);
        debug_assert!(x2 - x1 <= f64::from(self.map_width) / 2.0);
        if x1 == x2 && y1 == y2 {
            // degenerated to a point
            return;
        }
        if x2 - x1 < 1.0 && (x2 as u32 == x1 as u32 || x2 - x1 < 0.000_000_01) {
            // The segment is parallel to a meridian, stays within one tile
            // column, or is so close to parallel that the error of treating
            // it as such is negligible. Rasterize it as a vertical line plus
            // a buffered parallel to its east when that falls into a
            // different column.
            let (y1, y2) = if y2 < y1 { (y2, y1) } else { (y1, y2) };
            let x_buffer_west = self.normalise_tile_coord(x1 - TILE_EXPIRY_LEEWAY);
            self.expire_vertical_line(x_buffer_west, y1, y2);
            let x_buffer_east = self.normalise_tile_coord(x1 + TILE_EXPIRY_LEEWAY);
            if x_buffer_west as u32 != x_buffer_east as u32 {
                self.expire_vertical_line(x_buffer_east, y1, y2);
            }
            return;
        }
        // Rasterize two parallels displaced by the leeway along the unit
        // normal, so tiles the segment merely grazes are covered as well. The
        // ends are extended by the same amount along the direction vector.
        let segment_length = (x2 - x1).hypot(y2 - y1);
        let x_norm = (x2 - x1) / segment_length;
        let y_norm = (y2 - y1) / segment_length;
        let x_buffer = TILE_EXPIRY_LEEWAY * x_norm;
        let y_buffer = TILE_EXPIRY_LEEWAY * y_norm;
        // normal to the left: (y, -x), to the right: (-y, x)
        self.expire_line(
            x1 - x_buffer - y_buffer,
            y1 - y_buffer + x_buffer,
            x2 + x_buffer - y_buffer,
            y2 + y_buffer + x_buffer,
        );
        self.expire_line(
            x1 - x_buffer + y_buffer,
            y1 - y_buffer - x_buffer,
            x2 + x_buffer + y_buffer,
            y2 + y_buffer - x_buffer,
        );
    }

    /// Expire all tiles a line from `(x1, y1)` to `(x2, y2)` intersects,
    /// without a buffer. `x1` must be strictly west of `x2`.
    ///
    /// Walks the crossings of tile borders: O(dx + dy) tiles per segment.
    fn expire_line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) {
        debug_assert!(x1 < x2);
        // y(x) = incline * x + y_intercept
        let incline = (y2 - y1) / (x2 - x1);
        let y_intercept = y2 - incline * x2;

        // horizontal and entirely outside the map?
        if incline == 0.0 && (y_intercept < 0.0 || y_intercept > f64::from(self.map_width)) {
            return;
        }
        // entirely west of the map?
        if x2 <= 0.0 {
            return;
        }
        let mut x1 = x1;
        let mut y1 = y1;
        let mut x2 = x2;
        let mut y2 = y2;
        // Pull endpoints west or north of the map onto its edge. Endpoints
        // past the eastern or southern edge are harmless: expire_tile clamps.
        if x1 < 0.0 {
            x1 = 0.0;
            y1 = y_intercept;
        }
        if y1 < 0.0 {
            y1 = 0.0;
            x1 = -y_intercept / incline;
        }
        if y2 < 0.0 {
            y2 = 0.0;
            x2 = -y_intercept / incline;
        }

        // the tile the segment starts in
        self.expire_tile(x1 as u32, y1 as u32);
        // all tiles the segment enters by crossing their western border
        let last_column = (x2 as u32).min(self.map_width);
        for x in (x1 + 1.0) as u32..=last_column {
            let y = incline * f64::from(x) + y_intercept;
            self.expire_tile(x, y as u32);
        }
        // all tiles the segment enters by crossing their northern or
        // southern border
        let min_y = y1.min(y2);
        let max_y = y1.max(y2);
        let last_row = (max_y as u32).min(self.map_width);
        for y in (min_y + 1.0) as u32..=last_row {
            let x = (f64::from(y) - y_intercept) / incline;
            if y2 > y1 {
                // heading south: crossing row y enters the tile below
                self.expire_tile(x as u32, y);
            } else {
                self.expire_tile(x as u32, y - 1);
            }
        }
    }

    /// Expire the tiles of a south-to-north line at tile column `x`, buffered
    /// at both ends. `y1` must not be south of `y2`.
    fn expire_vertical_line(&mut self, x: f64, y1: f64, y2: f64) {
        debug_assert!(y1 <= y2);
        // the southern end tile and its buffer
        self.from_bbox(x, y1, x, y1);
        // everything strictly between the two end tiles
        for y in (y1 + 1.0) as u32..(y2 as u32).min(self.map_width) {
            self.expire_tile(x as u32, y);
        }
        // the northern end tile and its buffer
        self.from_bbox(x, y2, x, y2);
    }

    /// Expire each consecutive vertex pair of a linestring; a single vertex
    /// degenerates to a point.
    fn from_linestring(&mut self, line: &LineString) {
        match line.0.as_slice() {
            [] => {}
            [point] => self.from_point(point.x, point.y),
            points => {
                for pair in points.windows(2) {
                    self.from_line_lon_lat(pair[0].x, pair[0].y, pair[1].x, pair[1].y);
                }
            }
        }
    }

    /// Expire the interior of a polygon via the scan-line engine.
    fn from_polygon(&mut self, polygon: &Polygon) {
        let outer = polygon.exterior();
        if outer.0.len() <= 1 {
            // outer ring degenerated, ignore the whole polygon
            return;
        }

        // Bounding box of the outer ring in source coordinates.
        let mut min = outer.0[0];
        let mut max = outer.0[0];
        for coord in &outer.0[1..] {
            min.x = min.x.min(coord.x);
            min.y = min.y.min(coord.y);
            max.x = max.x.max(coord.x);
            max.y = max.y.max(coord.y);
        }

        // A bounding box wider than max_bbox is suspected of wrapping the
        // globe (the projection cannot tell a 350 degree wide polygon from
        // one crossing the antimeridian). Expire every ring as if it were a
        // line and leave the interior alone.
        if max.x - min.x > self.max_bbox || max.y - min.y > self.max_bbox {
            self.from_linestring(outer);
            for inner in polygon.interiors() {
                self.from_linestring(inner);
            }
            return;
        }

        // Project the bounding box corners; min and max y swap because the
        // tile-space y axis points the other way.
        let (min_x, min_y) = self.projection.project(min.x, max.y, self.map_width);
        let (max_x, max_y) = self.projection.project(max.x, min.y, self.map_width);

        // A polygon that stays within one tile column in max_zoom is covered
        // by its buffered bounding box. The scan-line pass below still runs
        // and re-expires a subset of the same tiles.
        if min_x as u32 == max_x as u32 {
            self.from_bbox(min_x, min_y, max_x, max_y);
        }

        let mut tiles = IntersectingTiles::new(min_x, max_x, self.map_width, TILE_EXPIRY_LEEWAY);
        for (ring_index, ring) in std::iter::once(outer)
            .chain(polygon.interiors().iter())
            .enumerate()
        {
            if ring.0.len() <= 3 {
                // A degenerate inner ring removes no tiles; nothing to do.
                continue;
            }
            for pair in ring.0.windows(2) {
                let (ax, ay) = self.projection.project(pair[0].x, pair[0].y, self.map_width);
                let (bx, by) = self.projection.project(pair[1].x, pair[1].y, self.map_width);
                tiles.evaluate_segment(ax, ay, bx, by, ring_index == 0);
            }
        }

        tiles.sort_bounds();
        loop {
            while tiles.column_has_intervals() {
                if let Some((row_min, row_max)) = tiles.next_pair() {
                    let column = tiles.current_x();
                    self.from_bbox_without_buffer(column, row_min, column, row_max);
                }
            }
            if !tiles.move_to_next_column() {
                break;
            }
        }
    }
}

fn geometry_type_name(geometry: &Geometry) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
