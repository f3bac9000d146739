//! Value types shared by every stage, and the error type.

use crate::core::tile_index::{lonlat_to_web_mercator, TileCoord, MAX_MERCATOR_LAT};
use gdal::spatial_ref::SpatialRef;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// EPSG code of the spherical web mercator CRS used by slippy-map tiles
pub const WEB_MERCATOR_EPSG: u32 = 3857;

/// EPSG code of geographic WGS84 latitude/longitude
pub const WGS84_EPSG: u32 = 4326;

/// Vector mask applied to a raster, in the raster's CRS
pub type ClipGeometry = geo::MultiPolygon<f64>;

/// Geographic extent in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    /// Build a bounding box, rejecting extents the tile scheme cannot cover.
    ///
    /// Boxes crossing the antimeridian (`west > east`) and boxes reaching past
    /// the web mercator latitude limit are unsupported and fail with
    /// [`DemError::UnsupportedExtent`] instead of producing wrapped tile ranges.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> DemResult<Self> {
        if ![north, south, east, west].iter().all(|v| v.is_finite()) {
            return Err(DemError::UnsupportedExtent(
                "bounding box coordinates must be finite".to_string(),
            ));
        }
        if south > north {
            return Err(DemError::UnsupportedExtent(format!(
                "south {} is above north {}",
                south, north
            )));
        }
        if west > east {
            return Err(DemError::UnsupportedExtent(format!(
                "west {} is east of east {} (antimeridian crossing is not supported)",
                west, east
            )));
        }
        if north > MAX_MERCATOR_LAT || south < -MAX_MERCATOR_LAT {
            return Err(DemError::UnsupportedExtent(format!(
                "latitude range [{}, {}] exceeds the web mercator limit of ±{:.4}",
                south, north, MAX_MERCATOR_LAT
            )));
        }
        if west < -180.0 || east > 180.0 {
            return Err(DemError::UnsupportedExtent(format!(
                "longitude range [{}, {}] is outside [-180, 180]",
                west, east
            )));
        }

        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    /// Web mercator (EPSG:3857) bounds as `[left, bottom, right, top]`
    pub fn to_web_mercator(&self) -> [f64; 4] {
        let (left, bottom) = lonlat_to_web_mercator(self.west, self.south);
        let (right, top) = lonlat_to_web_mercator(self.east, self.north);
        [left, bottom, right, top]
    }
}

/// Six-coefficient affine transform from pixel (col, row) to world (x, y).
///
/// Field order follows GDAL: `x = top_left_x + col * pixel_width + row * rotation_x`
/// and `y = top_left_y + col * rotation_y + row * pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeoTransformRepr")]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

/// Accepted serialized forms of a transform: named fields, or the six
/// `(a, b, c, d, e, f)` coefficients of an affine matrix (nine when the
/// trailing `0, 0, 1` row is included).
#[derive(Deserialize)]
#[serde(untagged)]
enum GeoTransformRepr {
    Fields {
        top_left_x: f64,
        pixel_width: f64,
        rotation_x: f64,
        top_left_y: f64,
        rotation_y: f64,
        pixel_height: f64,
    },
    Coefficients(Vec<f64>),
}

impl TryFrom<GeoTransformRepr> for GeoTransform {
    type Error = String;

    fn try_from(repr: GeoTransformRepr) -> Result<Self, Self::Error> {
        match repr {
            GeoTransformRepr::Fields {
                top_left_x,
                pixel_width,
                rotation_x,
                top_left_y,
                rotation_y,
                pixel_height,
            } => Ok(Self {
                top_left_x,
                pixel_width,
                rotation_x,
                top_left_y,
                rotation_y,
                pixel_height,
            }),
            GeoTransformRepr::Coefficients(c) if c.len() == 6 || c.len() == 9 => {
                Ok(Self::from_affine(c[0], c[1], c[2], c[3], c[4], c[5]))
            }
            GeoTransformRepr::Coefficients(c) => Err(format!(
                "affine transform needs 6 or 9 coefficients, got {}",
                c.len()
            )),
        }
    }
}

impl GeoTransform {
    /// North-up transform with no rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// From affine-matrix coefficient order `(a, b, c, d, e, f)`
    pub fn from_affine(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self {
            top_left_x: c,
            pixel_width: a,
            rotation_x: b,
            top_left_y: f,
            rotation_y: d,
            pixel_height: e,
        }
    }

    /// World coordinates of a (fractional) pixel position.
    ///
    /// Integer positions are pixel corners; add 0.5 to address pixel centers.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel position of a world coordinate, `None` for a singular transform
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON * 1e-6 || !det.is_finite() {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        Some((
            (self.pixel_height * dx - self.rotation_x * dy) / det,
            (-self.rotation_y * dx + self.pixel_width * dy) / det,
        ))
    }

    /// Pixel size along x and y, always positive
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.rotation_y),
            self.rotation_x.hypot(self.pixel_height),
        )
    }

    /// World extent `[left, bottom, right, top]` of a `width` x `height` grid
    pub fn bounds(&self, width: usize, height: usize) -> [f64; 4] {
        let corners = [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(width as f64, 0.0),
            self.pixel_to_world(0.0, height as f64),
            self.pixel_to_world(width as f64, height as f64),
        ];
        let mut b = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
        for (x, y) in corners {
            b[0] = b[0].min(x);
            b[1] = b[1].min(y);
            b[2] = b[2].max(x);
            b[3] = b[3].max(y);
        }
        b
    }

    /// Transform whose origin sits at pixel `(col_off, row_off)` of this one
    pub fn translated(&self, col_off: f64, row_off: f64) -> Self {
        let (top_left_x, top_left_y) = self.pixel_to_world(col_off, row_off);
        Self {
            top_left_x,
            top_left_y,
            ..*self
        }
    }

    /// Pixels of a `width` x `height` grid under `bounds` (`[left, bottom,
    /// right, top]`), snapped outward to whole pixels and clipped to the grid.
    /// `None` when nothing overlaps.
    pub fn window(&self, bounds: [f64; 4], width: usize, height: usize) -> Option<PixelWindow> {
        // absorbs float noise on bounds that sit exactly on pixel edges
        const SNAP: f64 = 1e-6;

        let [left, bottom, right, top] = bounds;
        let mut cols = (f64::INFINITY, f64::NEG_INFINITY);
        let mut rows = (f64::INFINITY, f64::NEG_INFINITY);
        for (x, y) in [(left, top), (right, top), (left, bottom), (right, bottom)] {
            let (col, row) = self.world_to_pixel(x, y)?;
            cols = (cols.0.min(col), cols.1.max(col));
            rows = (rows.0.min(row), rows.1.max(row));
        }

        let col_start = (cols.0 + SNAP).floor().max(0.0) as usize;
        let row_start = (rows.0 + SNAP).floor().max(0.0) as usize;
        let col_end = ((cols.1 - SNAP).ceil().max(0.0) as usize).min(width);
        let row_end = ((rows.1 - SNAP).ceil().max(0.0) as usize).min(height);
        if col_end <= col_start || row_end <= row_start {
            return None;
        }

        Some(PixelWindow {
            col_off: col_start,
            row_off: row_start,
            width: col_end - col_start,
            height: row_end - row_start,
        })
    }
}

/// Rectangular block of pixels within a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn col_end(&self) -> usize {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.height
    }
}

/// Coordinate reference system, kept as its user-input definition
/// (`EPSG:4326`, a PROJ string or WKT) and handed to GDAL when needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(String);

impl Crs {
    pub fn new(definition: impl Into<String>) -> Self {
        Self(definition.into())
    }

    pub fn from_epsg(code: u32) -> Self {
        Self(format!("EPSG:{}", code))
    }

    pub fn web_mercator() -> Self {
        Self::from_epsg(WEB_MERCATOR_EPSG)
    }

    pub fn wgs84() -> Self {
        Self::from_epsg(WGS84_EPSG)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// GDAL spatial reference with traditional x=easting/longitude axis order
    pub fn to_spatial_ref(&self) -> DemResult<SpatialRef> {
        let srs = SpatialRef::from_definition(&self.0)?;
        srs.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        Ok(srs)
    }

    /// Whether both definitions describe the same CRS
    pub fn is_same(&self, other: &Crs) -> DemResult<bool> {
        if self.0.eq_ignore_ascii_case(&other.0) {
            return Ok(true);
        }
        Ok(self.to_spatial_ref()? == other.to_spatial_ref()?)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Crs {
    fn from(definition: &str) -> Self {
        Self::new(definition)
    }
}

/// Single-band raster: samples, pixel grid and CRS.
///
/// Stages never modify a grid; each one returns a new `RasterGrid`, so the
/// transform and CRS of every intermediate stay traceable.
#[derive(Debug, Clone)]
pub struct RasterGrid {
    data: Array2<f32>,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f32>,
}

impl RasterGrid {
    pub fn new(data: Array2<f32>, transform: GeoTransform, crs: Crs) -> Self {
        Self {
            data,
            transform,
            crs,
            nodata: None,
        }
    }

    pub fn with_nodata(self, nodata: Option<f32>) -> Self {
        Self { nodata, ..self }
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Extent `[left, bottom, right, top]` in the grid's CRS
    pub fn bounds(&self) -> [f64; 4] {
        self.transform.bounds(self.width(), self.height())
    }

    pub fn resolution(&self) -> (f64, f64) {
        self.transform.resolution()
    }

    /// Samples with a leading band axis, shape `(1, height, width)`
    pub fn to_banded(&self) -> Array3<f32> {
        self.data.clone().insert_axis(ndarray::Axis(0))
    }

    pub fn into_data(self) -> Array2<f32> {
        self.data
    }

    /// Whether a sample counts as missing under this grid's nodata value
    pub fn is_nodata(&self, value: f32) -> bool {
        match self.nodata {
            Some(nd) if nd.is_nan() => value.is_nan(),
            Some(nd) => value == nd,
            None => false,
        }
    }
}

/// Output grid requested by the caller: CRS, transform and shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub crs: Crs,
    /// Also accepted under the legacy key `affine`
    #[serde(alias = "affine")]
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    #[serde(default)]
    pub nodata: Option<f64>,
}

impl TargetProfile {
    pub fn new(crs: Crs, transform: GeoTransform, width: usize, height: usize) -> Self {
        Self {
            crs,
            transform,
            width,
            height,
            nodata: None,
        }
    }

    /// Parse a profile mapping such as
    /// `{"crs": "EPSG:32612", "affine": [30, 0, 300000, 0, -30, 5000000], "width": 100, "height": 100}`.
    pub fn from_json(json: &str) -> DemResult<Self> {
        let profile: Self =
            serde_json::from_str(json).map_err(|e| DemError::InvalidProfile(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> DemResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(DemError::InvalidProfile(format!(
                "target grid must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        let (res_x, res_y) = self.transform.resolution();
        if !(res_x > 0.0 && res_y > 0.0 && res_x.is_finite() && res_y.is_finite()) {
            return Err(DemError::InvalidProfile(format!(
                "target transform has a degenerate pixel size {:?}",
                self.transform
            )));
        }
        Ok(())
    }

    /// Extent `[left, bottom, right, top]` in the target CRS
    pub fn bounds(&self) -> [f64; 4] {
        self.transform.bounds(self.width, self.height)
    }
}

/// Terrain product requested from the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainAttribute {
    Elevation,
    Slope,
    Aspect,
}

impl FromStr for TerrainAttribute {
    type Err = DemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elevation" => Ok(Self::Elevation),
            "slope" => Ok(Self::Slope),
            "aspect" => Ok(Self::Aspect),
            other => Err(DemError::InvalidAttribute(other.to_string())),
        }
    }
}

impl fmt::Display for TerrainAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerrainAttribute::Elevation => write!(f, "elevation"),
            TerrainAttribute::Slope => write!(f, "slope"),
            TerrainAttribute::Aspect => write!(f, "aspect"),
        }
    }
}

/// Units of the slope product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlopeUnits {
    /// Raw smoothed gradient magnitude
    #[default]
    Percent,
    Fraction,
    Degrees,
}

impl SlopeUnits {
    /// Resolve a mode name; missing or unrecognized names mean percent.
    pub fn from_mode(mode: Option<&str>) -> Self {
        match mode {
            None | Some("percent") => Self::Percent,
            Some("fraction") => Self::Fraction,
            Some("degrees") => Self::Degrees,
            Some(other) => {
                log::warn!("Unknown slope mode '{}', leaving slope in percent", other);
                Self::Percent
            }
        }
    }
}

/// Errors raised by the elevation pipeline
#[derive(Debug, thiserror::Error)]
pub enum DemError {
    /// `status` is the HTTP status when the server answered, `None` for
    /// transport failures (timeout, DNS, connection reset)
    #[error("Failed to fetch tile {coord}: {reason}")]
    TileFetch {
        coord: TileCoord,
        status: Option<u16>,
        reason: String,
    },

    #[error("No tiles available to merge")]
    EmptyMosaic,

    #[error("Clip geometry does not intersect the raster")]
    EmptyClip,

    #[error("Invalid terrain attribute '{0}', must choose from \"elevation\", \"slope\", or \"aspect\"")]
    InvalidAttribute(String),

    #[error("Invalid target profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported extent: {0}")]
    UnsupportedExtent(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl DemError {
    /// Whether upstream retry logic may reasonably try the same request again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DemError::TileFetch { .. } | DemError::Io(_) | DemError::Gdal(_)
        )
    }
}

/// Result type for elevation operations
pub type DemResult<T> = Result<T, DemError>;
