//! End-to-end expiry scenarios: bounding boxes, lines across the
//! antimeridian, merging of worker shards and the multi-zoom roll-up.

use std::collections::BTreeSet;
use std::sync::Arc;

use tile_expiry_core::{
    Error, LonLat, Projection, SphericalMercator, TileExpiry, EARTH_CIRCUMFERENCE,
};

type TileSet = BTreeSet<(u32, u32, u32)>;

fn tiles(entries: &[(u32, u32, u32)]) -> TileSet {
    entries.iter().copied().collect()
}

fn drain(expiry: &mut TileExpiry, min_zoom: u32) -> TileSet {
    let mut set = TileSet::new();
    expiry.output_and_destroy(&mut set, min_zoom);
    set
}

fn mercator_expiry(max_zoom: u32) -> TileExpiry {
    TileExpiry::new(max_zoom, 20000.0, Arc::new(SphericalMercator))
}

#[test]
fn test_expire_simple_z1() {
    let mut expiry = mercator_expiry(1);
    // as big a bbox as possible at the origin to dirty all four quadrants of
    // the world
    expiry.from_bbox_lon_lat(-10000.0, -10000.0, 10000.0, 10000.0);
    assert_eq!(
        drain(&mut expiry, 1),
        tiles(&[(1, 0, 0), (1, 0, 1), (1, 1, 0), (1, 1, 1)])
    );
}

#[test]
fn test_expire_simple_z3() {
    let mut expiry = mercator_expiry(3);
    expiry.from_bbox_lon_lat(-10000.0, -10000.0, 10000.0, 10000.0);
    assert_eq!(
        drain(&mut expiry, 3),
        tiles(&[(3, 3, 3), (3, 3, 4), (3, 4, 3), (3, 4, 4)])
    );
}

#[test]
fn test_expire_simple_z18() {
    let mut expiry = mercator_expiry(18);
    // a smaller bbox this time, as at z18 the scale is pretty small
    expiry.from_bbox_lon_lat(-1.0, -1.0, 1.0, 1.0);
    assert_eq!(
        drain(&mut expiry, 18),
        tiles(&[
            (18, 131071, 131071),
            (18, 131071, 131072),
            (18, 131072, 131071),
            (18, 131072, 131072),
        ])
    );
}

#[test]
fn test_expire_simple_z17_18() {
    let mut expiry = mercator_expiry(18);
    expiry.from_bbox_lon_lat(-1.0, -1.0, 1.0, 1.0);
    // four z18 tiles around the origin straddle four different z17 parents
    assert_eq!(
        drain(&mut expiry, 17),
        tiles(&[
            (17, 65535, 65535),
            (17, 65535, 65536),
            (17, 65536, 65535),
            (17, 65536, 65536),
            (18, 131071, 131071),
            (18, 131071, 131072),
            (18, 131072, 131071),
            (18, 131072, 131072),
        ])
    );
}

#[test]
fn test_expire_simple_z17_18_one_superior_tile() {
    let mut expiry = mercator_expiry(18);
    // all four z18 tiles are children of the same z17 tile, which must be
    // emitted exactly once
    expiry.from_bbox_lon_lat(-163.0, 140.0, -140.0, 164.0);
    assert_eq!(
        drain(&mut expiry, 17),
        tiles(&[
            (17, 65535, 65535),
            (18, 131070, 131070),
            (18, 131070, 131071),
            (18, 131071, 131070),
            (18, 131071, 131071),
        ])
    );
}

#[test]
fn test_expire_line_crossing_antimeridian() {
    let mut expiry = TileExpiry::new(8, 20000.0, Arc::new(LonLat));
    // Fiji area: the short way between these two points crosses the 180th
    // meridian, so tiles must appear at both map edges
    expiry.from_line_lon_lat(179.1332, -16.4748, -179.1969, -17.7244);
    assert_eq!(
        drain(&mut expiry, 8),
        tiles(&[(8, 0, 140), (8, 255, 139), (8, 255, 140)])
    );
}

// Deterministic pseudo-random tile generator (64-bit LCG).
struct TileRng(u64);

impl TileRng {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn tile_set(&mut self, zoom: u32, count: usize) -> BTreeSet<(u32, u32)> {
        let mask = (1u64 << zoom) - 1;
        let mut set = BTreeSet::new();
        while set.len() < count {
            set.insert(((self.next() & mask) as u32, (self.next() & mask) as u32));
        }
        set
    }
}

/// Expire the centroid of each tile in the set, in tile-space coordinates.
fn expire_centroids(expiry: &mut TileExpiry, set: &BTreeSet<(u32, u32)>) {
    let map_width = f64::from(expiry.map_width());
    for &(x, y) in set {
        // tile centroid in spherical Mercator metres
        let center_x = ((f64::from(x) + 0.5) / map_width - 0.5) * EARTH_CIRCUMFERENCE;
        let center_y = (0.5 - (f64::from(y) + 0.5) / map_width) * EARTH_CIRCUMFERENCE;
        let (tile_x, tile_y) = SphericalMercator.project(center_x, center_y, expiry.map_width());
        expiry.from_bbox(tile_x, tile_y, tile_x, tile_y);
    }
}

fn at_zoom(zoom: u32, set: &BTreeSet<(u32, u32)>) -> TileSet {
    set.iter().map(|&(x, y)| (zoom, x, y)).collect()
}

#[test]
fn test_expire_set_of_centroids() {
    // expiring a set of tile centroids expires exactly those tiles
    let zoom = 14;
    let mut rng = TileRng(42);
    for _ in 0..10 {
        let check_set = rng.tile_set(zoom, 100);
        let mut expiry = mercator_expiry(zoom);
        expire_centroids(&mut expiry, &check_set);
        assert_eq!(drain(&mut expiry, zoom), at_zoom(zoom, &check_set));
    }
}

#[test]
fn test_expire_merge_is_set_union() {
    let zoom = 14;
    let mut rng = TileRng(7);
    for _ in 0..10 {
        let set1 = rng.tile_set(zoom, 100);
        let set2 = rng.tile_set(zoom, 100);

        let mut shard1 = mercator_expiry(zoom);
        let mut shard2 = mercator_expiry(zoom);
        expire_centroids(&mut shard1, &set1);
        expire_centroids(&mut shard2, &set2);

        let mut merged = mercator_expiry(zoom);
        merged.merge(&mut shard1).unwrap();
        merged.merge(&mut shard2).unwrap();
        assert_eq!(shard1.dirty_tile_count(), 0);
        assert_eq!(shard2.dirty_tile_count(), 0);

        let union: BTreeSet<(u32, u32)> = set1.union(&set2).copied().collect();
        assert_eq!(drain(&mut merged, zoom), at_zoom(zoom, &union));
    }
}

#[test]
fn test_expire_merge_same_set_twice() {
    // merging two identical shards must not change the result
    let zoom = 14;
    let mut rng = TileRng(11);
    let check_set = rng.tile_set(zoom, 100);

    let mut shard1 = mercator_expiry(zoom);
    let mut shard2 = mercator_expiry(zoom);
    expire_centroids(&mut shard1, &check_set);
    expire_centroids(&mut shard2, &check_set);

    let mut merged = mercator_expiry(zoom);
    merged.merge(&mut shard1).unwrap();
    merged.merge(&mut shard2).unwrap();

    assert_eq!(drain(&mut merged, zoom), at_zoom(zoom, &check_set));
}

#[test]
fn test_expire_merge_with_overlap() {
    let zoom = 14;
    let mut rng = TileRng(13);
    let set1 = rng.tile_set(zoom, 100);
    let set2 = rng.tile_set(zoom, 100);
    let shared = rng.tile_set(zoom, 100);

    let mut shard1 = mercator_expiry(zoom);
    let mut shard2 = mercator_expiry(zoom);
    expire_centroids(&mut shard1, &set1);
    expire_centroids(&mut shard1, &shared);
    expire_centroids(&mut shard2, &set2);
    expire_centroids(&mut shard2, &shared);

    let mut merged = mercator_expiry(zoom);
    merged.merge(&mut shard1).unwrap();
    merged.merge(&mut shard2).unwrap();

    let mut union = set1.clone();
    union.extend(&set2);
    union.extend(&shared);
    assert_eq!(drain(&mut merged, zoom), at_zoom(zoom, &union));
}

#[test]
fn test_expire_merge_of_partitioned_bbox() {
    // two shards covering the two halves of a rectangle merge to the same
    // result as one accumulator covering the whole rectangle
    let zoom = 10;
    let mut whole = mercator_expiry(zoom);
    let mut west = mercator_expiry(zoom);
    let mut east = mercator_expiry(zoom);

    whole.from_bbox(-3.0, -3.0, 3.0, 3.0);
    west.from_bbox(-3.0, -3.0, 0.0, 3.0);
    east.from_bbox(0.0, -3.0, 3.0, 3.0);

    let mut merged = mercator_expiry(zoom);
    merged.merge(&mut west).unwrap();
    merged.merge(&mut east).unwrap();

    assert_eq!(drain(&mut merged, zoom), drain(&mut whole, zoom));
}

#[test]
fn test_merge_rejects_differing_grids() {
    let mut coarse = mercator_expiry(10);
    let mut fine = mercator_expiry(12);
    let error = coarse.merge(&mut fine).unwrap_err();
    assert!(matches!(error, Error::MergeMapWidth(1024, 4096)));
}

#[test]
fn test_worker_shards_merge_across_threads() {
    // the intended concurrency pattern: one accumulator per worker thread,
    // merged by a single thread at the end of the phase
    let zoom = 12;
    let handles: Vec<_> = (0..4u32)
        .map(|worker| {
            std::thread::spawn(move || {
                let mut shard = TileExpiry::new(zoom, 20000.0, Arc::new(SphericalMercator));
                let offset = f64::from(worker) * 20.0;
                shard.from_bbox(offset, offset, offset + 10.0, offset + 10.0);
                shard
            })
        })
        .collect();

    let mut merged = mercator_expiry(zoom);
    for handle in handles {
        let mut shard = handle.join().unwrap();
        merged.merge(&mut shard).unwrap();
    }

    let mut sequential = mercator_expiry(zoom);
    for worker in 0..4u32 {
        let offset = f64::from(worker) * 20.0;
        sequential.from_bbox(offset, offset, offset + 10.0, offset + 10.0);
    }

    assert_eq!(drain(&mut merged, zoom), drain(&mut sequential, zoom));
}

#[test]
fn test_output_to_file() {
    let path = std::env::temp_dir().join("tile-expiry-scenario-test.list");
    let _ = std::fs::remove_file(&path);

    let mut expiry = mercator_expiry(3);
    expiry.from_bbox_lon_lat(-10000.0, -10000.0, 10000.0, 10000.0);
    expiry.output_and_destroy_to_file(&path, 3);

    let contents = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = contents.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["3/3/3", "3/3/4", "3/4/3", "3/4/4"]);

    let _ = std::fs::remove_file(&path);
}
