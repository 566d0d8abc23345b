//! Emit sinks for the expiry list.
//!
//! [`TileExpiry::output_and_destroy`] is generic over anything implementing
//! [`TileSink`], so production code writes straight to a file while tests
//! collect into a `Vec` or `BTreeSet` with no indirection in between.
//!
//! [`TileExpiry::output_and_destroy`]: crate::TileExpiry::output_and_destroy

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Receives dirty tiles from the multi-zoom emitter.
pub trait TileSink {
    /// Deliver one dirty tile.
    fn emit(&mut self, x: u32, y: u32, zoom: u32);
}

/// Tiles are appended as `(zoom, x, y)` tuples, in emit order.
impl TileSink for Vec<(u32, u32, u32)> {
    fn emit(&mut self, x: u32, y: u32, zoom: u32) {
        self.push((zoom, x, y));
    }
}

/// Tiles are inserted as `(zoom, x, y)` tuples, kept sorted by the set.
impl TileSink for BTreeSet<(u32, u32, u32)> {
    fn emit(&mut self, x: u32, y: u32, zoom: u32) {
        self.insert((zoom, x, y));
    }
}

/// File-backed sink appending one `zoom/x/y` line per tile.
///
/// When the file cannot be opened a warning is logged once and every
/// subsequent emit becomes a no-op; expiry output is best-effort and never
/// fails the import that produced it.
pub struct TileListWriter {
    outfile: Option<BufWriter<File>>,
    outcount: u32,
}

impl TileListWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        let outfile = match OpenOptions::new().append(true).create(true).open(path.as_ref()) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(error) => {
                log::warn!(
                    "Failed to open expired tiles file {} ({}). Tile expiry list will not be written!",
                    path.as_ref().display(),
                    error
                );
                None
            }
        };
        TileListWriter {
            outfile,
            outcount: 0,
        }
    }

    /// Number of tiles written so far.
    pub fn written(&self) -> u32 {
        self.outcount
    }
}

impl TileSink for TileListWriter {
    fn emit(&mut self, x: u32, y: u32, zoom: u32) {
        if let Some(outfile) = &mut self.outfile {
            let _ = writeln!(outfile, "{}/{}/{}", zoom, x, y);
            self.outcount += 1;
            if self.outcount % 1000 == 0 {
                eprint!("\rWriting dirty tile list ({}K)", self.outcount / 1000);
            }
        }
    }
}
