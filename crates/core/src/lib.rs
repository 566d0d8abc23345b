//! Core library for computing dirty-tile lists from changed geometries.
//!
//! Whenever a geographic feature changes, every map tile that feature touches
//! has to be re-rendered. This library rasterizes changed geometries (points,
//! lines, polygons and their multi-variants) into the set of tiles they
//! intersect at a maximum zoom level, and emits that set -- together with the
//! enclosing tiles at every requested lower zoom level -- to a pluggable sink.
//!
//! The engine deliberately over-expires a little (a leeway buffer around
//! every feature) and never under-expires: a missed tile would leave stale
//! imagery on the map, while a spuriously expired tile only costs one
//! re-render.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use tile_expiry_core::{SphericalMercator, TileExpiry};
//!
//! let mut expiry = TileExpiry::new(18, 20000.0, Arc::new(SphericalMercator));
//! expiry.from_bbox_lon_lat(-1.0, -1.0, 1.0, 1.0);
//!
//! let mut tiles: Vec<(u32, u32, u32)> = Vec::new();
//! expiry.output_and_destroy(&mut tiles, 18);
//! assert_eq!(tiles.len(), 4);
//! ```

use thiserror::Error;

pub mod expire;
pub mod output;
pub mod projection;
pub mod quadkey;
pub mod scanline;
pub mod wkb;

pub use expire::{TileExpiry, TILE_EXPIRY_LEEWAY};
pub use output::{TileListWriter, TileSink};
pub use projection::{LonLat, Projection, SphericalMercator, EARTH_CIRCUMFERENCE};
pub use quadkey::{quadkey_to_xy, xy_to_quadkey};

/// Errors that can occur while expiring tiles
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unable to merge tile expiry sets when map_width does not match: {0} != {1}")]
    MergeMapWidth(u32, u32),

    #[error("Unable to merge tile expiry sets when tile_width does not match: {0} != {1}")]
    MergeTileWidth(f64, f64),

    #[error("Failed to decode WKB geometry: {0}")]
    WkbDecode(String),

    #[error("Invalid hex in geometry string: {0}")]
    InvalidHex(String),
}

pub type Result<T> = std::result::Result<T, Error>;
