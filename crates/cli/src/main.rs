//! CLI for tile-expiry - compute a dirty tile list from changed geometries
//!
//! This is a thin wrapper around the tile-expiry-core library. The input file
//! carries one changed feature per line, either as a bare hex-encoded
//! (E)WKB geometry or as `id<TAB>hexwkb`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tile_expiry_core::{LonLat, Projection, SphericalMercator, TileExpiry};

#[derive(Parser, Debug)]
#[command(
    name = "tile-expiry",
    about = "Compute the map tiles touched by changed geometries",
    version
)]
struct Args {
    /// Input file: one hex-encoded WKB geometry per line, optionally
    /// prefixed with a feature id and a tab
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output tile list file (appended, one z/x/y line per tile)
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Maximum zoom level to expire at
    #[arg(long, default_value = "14")]
    max_zoom: u32,

    /// Minimum zoom level to roll expired tiles up to
    #[arg(long, default_value = "14")]
    min_zoom: u32,

    /// Coordinate system of the input geometries (mercator, lonlat)
    #[arg(long, default_value = "mercator")]
    projection: String,

    /// Widest polygon bounding box to rasterize, in input units; wider
    /// polygons are expired along their rings only
    #[arg(long, default_value = "20000")]
    max_bbox: f64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn parse_projection(&self) -> Result<std::sync::Arc<dyn Projection>> {
        match self.projection.to_lowercase().as_str() {
            "mercator" => Ok(std::sync::Arc::new(SphericalMercator)),
            "lonlat" => Ok(std::sync::Arc::new(LonLat)),
            _ => anyhow::bail!("Invalid projection: {}", self.projection),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    anyhow::ensure!(
        args.min_zoom <= args.max_zoom,
        "min_zoom {} must not exceed max_zoom {}",
        args.min_zoom,
        args.max_zoom
    );
    anyhow::ensure!(
        args.max_zoom <= tile_expiry_core::quadkey::MAX_ZOOM,
        "max_zoom {} exceeds the supported maximum of {}",
        args.max_zoom,
        tile_expiry_core::quadkey::MAX_ZOOM
    );

    let projection = args
        .parse_projection()
        .context("Failed to parse projection")?;
    let mut expiry = TileExpiry::new(args.max_zoom, args.max_bbox, projection);

    let input = File::open(&args.input)
        .with_context(|| format!("Failed to open input file {}", args.input.display()))?;

    let mut features = 0u64;
    for (line_number, line) in BufReader::new(input).lines().enumerate() {
        let line = line.context("Failed to read input line")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (id, hex) = match line.split_once('\t') {
            Some((id, hex)) => (id.parse::<i64>().unwrap_or(0), hex),
            None => (0, line),
        };
        match tile_expiry_core::wkb::wkb_from_hex(hex) {
            Ok(buffer) => {
                expiry.from_wkb(&buffer, id);
                features += 1;
            }
            Err(error) => {
                log::warn!("Line {}: {}, skipped.", line_number + 1, error);
            }
        }
    }

    let dirty = expiry.dirty_tile_count();
    log::info!(
        "Ingested {} features, {} dirty tiles at zoom {}",
        features,
        dirty,
        args.max_zoom
    );

    expiry.output_and_destroy_to_file(&args.output, args.min_zoom);
    eprintln!();

    println!(
        "✓ Expired {} tiles at zoom {} into {}",
        dirty,
        args.max_zoom,
        args.output.display()
    );

    Ok(())
}
