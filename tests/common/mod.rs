#![allow(dead_code)]

use ndarray::Array2;
use opendem::core::TileCoord;
use opendem::io::tile_fetch::{TileFetcher, TileResponse, TileSourceConfig, TileTransport};
use opendem::{BoundingBox, Crs, GeoTransform, RasterGrid, RasterIo};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const BASE_URL: &str = "http://tiles.test";
pub const ZOOM: u8 = 10;
pub const TILE_SIZE: usize = 256;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Smooth synthetic terrain in web mercator meters
pub fn synthetic_elevation(x: f64, y: f64) -> f32 {
    (1500.0 + 250.0 * (x / 9000.0).sin() + 150.0 * (y / 7000.0).cos()) as f32
}

/// GeoTIFF bytes for one tile of the synthetic surface
pub fn tile_bytes(coord: TileCoord, scratch: &Path) -> Vec<u8> {
    let [left, _, right, top] = coord.mercator_bounds();
    let res = (right - left) / TILE_SIZE as f64;
    let transform = GeoTransform::north_up(left, top, res, -res);
    let data = Array2::from_shape_fn((TILE_SIZE, TILE_SIZE), |(r, c)| {
        let (x, y) = transform.pixel_to_world(c as f64 + 0.5, r as f64 + 0.5);
        synthetic_elevation(x, y)
    });

    let path = scratch.join(coord.file_name());
    RasterIo::write_grid(&RasterGrid::new(data, transform, Crs::web_mercator()), &path).unwrap();
    std::fs::read(&path).unwrap()
}

/// In-memory tile service keyed by URL; unknown URLs answer 404
pub struct MockTileServer {
    tiles: HashMap<String, Vec<u8>>,
    calls: Arc<AtomicUsize>,
}

impl MockTileServer {
    pub fn serving(coords: &[TileCoord], missing: &HashSet<TileCoord>) -> Self {
        let scratch = tempfile::TempDir::new().unwrap();
        let tiles = coords
            .iter()
            .filter(|c| !missing.contains(c))
            .map(|c| (c.url(BASE_URL, None), tile_bytes(*c, scratch.path())))
            .collect();
        Self {
            tiles,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn into_fetcher(self) -> TileFetcher {
        TileFetcher::new(
            TileSourceConfig {
                base_url: BASE_URL.to_string(),
                zoom: ZOOM,
                fetch_workers: 2,
                ..Default::default()
            },
            Box::new(self),
        )
    }
}

impl TileTransport for MockTileServer {
    fn get(&self, url: &str) -> Result<TileResponse, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.tiles.get(url) {
            Some(body) => TileResponse {
                status: 200,
                body: body.clone(),
            },
            None => TileResponse {
                status: 404,
                body: Vec::new(),
            },
        })
    }
}

/// A 0.2 degree box centered on a tile corner, so it spans 2x2 tiles at zoom 10
pub fn corner_bbox() -> BoundingBox {
    let corner = TileCoord::new(ZOOM, 197, 365).bounds();
    let (lat, lon) = (corner.south, corner.east);
    BoundingBox::new(lat + 0.1, lat - 0.1, lon + 0.1, lon - 0.1).unwrap()
}

pub fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

pub fn call_count(calls: &Arc<AtomicUsize>) -> usize {
    calls.load(Ordering::SeqCst)
}
