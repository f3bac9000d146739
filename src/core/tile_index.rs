//! Slippy-map tile indexing over the spherical web mercator projection.
//!
//! Tiles follow the OpenStreetMap convention: `x` grows eastward from 180°W,
//! `y` grows southward from the north edge of the mercator square, and zoom
//! level `z` splits the world into `2^z` x `2^z` tiles.

use crate::types::BoundingBox;
use std::cmp::Ordering;
use std::f64::consts::PI;
use std::fmt;

/// Highest zoom level accepted for tile requests
pub const MAX_ZOOM: u8 = 20;

/// Latitude where the web mercator square ends (`atan(sinh(π))`)
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Sphere radius of EPSG:3857 in meters
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the side of the web mercator square in meters
pub const MERCATOR_HALF_EXTENT: f64 = PI * EARTH_RADIUS;

/// One tile address `(z, x, y)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Geographic extent of the tile
    pub fn bounds(&self) -> BoundingBox {
        let n = tiles_per_side(self.z);
        let lon = |x: f64| x / n * 360.0 - 180.0;
        let lat = |y: f64| (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();
        BoundingBox {
            north: lat(self.y as f64),
            south: lat(self.y as f64 + 1.0),
            west: lon(self.x as f64),
            east: lon(self.x as f64 + 1.0),
        }
    }

    /// Planar EPSG:3857 extent `[left, bottom, right, top]`
    pub fn mercator_bounds(&self) -> [f64; 4] {
        let size = 2.0 * MERCATOR_HALF_EXTENT / tiles_per_side(self.z);
        let left = -MERCATOR_HALF_EXTENT + self.x as f64 * size;
        let top = MERCATOR_HALF_EXTENT - self.y as f64 * size;
        [left, top - size, left + size, top]
    }

    /// Tile URL under a `{base_url}/geotiff/{z}/{x}/{y}.tif` service
    pub fn url(&self, base_url: &str, api_key: Option<&str>) -> String {
        let url = format!(
            "{}/geotiff/{}/{}/{}.tif",
            base_url.trim_end_matches('/'),
            self.z,
            self.x,
            self.y
        );
        match api_key {
            Some(key) => format!("{}?api_key={}", url, key),
            None => url,
        }
    }

    /// File name used for the tile inside a scratch workspace
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}.tif", self.z, self.x, self.y)
    }
}

// Row-major order: north to south, then west to east.
impl Ord for TileCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.z, self.y, self.x).cmp(&(other.z, other.y, other.x))
    }
}

impl PartialOrd for TileCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

fn tiles_per_side(zoom: u8) -> f64 {
    2f64.powi(zoom as i32)
}

/// Forward spherical mercator, degrees to EPSG:3857 meters
pub fn lonlat_to_web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (0.25 * PI + 0.5 * lat.to_radians()).tan().ln();
    (x, y)
}

/// Tile containing a geographic point at `zoom`.
///
/// Projects to mercator radians and scales by `2^zoom` tiles per 2π,
/// truncating to integer indices. Points on the east edge (180°) or past the
/// mercator latitude limit land in the last valid row/column.
pub fn mercator_tile(lat: f64, lon: f64, zoom: u8) -> TileCoord {
    let x1 = lon.to_radians();
    let y1 = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();

    let x2 = x1;
    let y2 = (0.25 * PI + 0.5 * y1).tan().ln();

    let tiles = tiles_per_side(zoom);
    let diameter = 2.0 * PI;
    let max_index = tiles - 1.0;
    let x3 = (tiles * (x2 + PI) / diameter).trunc().clamp(0.0, max_index);
    let y3 = (tiles * (PI - y2) / diameter).trunc().clamp(0.0, max_index);

    TileCoord::new(zoom, x3 as u32, y3 as u32)
}

/// All tiles covering `bbox` at `zoom`, row-major from the north-west corner.
///
/// Enumerates the inclusive rectangle between the tile holding the north-west
/// corner and the tile holding the south-east corner.
pub fn find_tiles(bbox: &BoundingBox, zoom: u8) -> Vec<TileCoord> {
    let min_lat = bbox.south.min(bbox.north);
    let max_lat = bbox.south.max(bbox.north);
    let min_lon = bbox.west.min(bbox.east);
    let max_lon = bbox.west.max(bbox.east);

    let nw = mercator_tile(max_lat, min_lon, zoom);
    let se = mercator_tile(min_lat, max_lon, zoom);

    let tiles: Vec<TileCoord> = (nw.y..=se.y)
        .flat_map(|y| (nw.x..=se.x).map(move |x| TileCoord::new(zoom, x, y)))
        .collect();

    log::debug!(
        "Bounding box {:?} covers {} tiles at zoom {} (x {}..={}, y {}..={})",
        bbox,
        tiles.len(),
        zoom,
        nw.x,
        se.x,
        nw.y,
        se.y
    );
    tiles
}
