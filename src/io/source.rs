//! Where elevation comes from: web mercator tiles or a gridded dataset.

use crate::core::mosaic::merge_tiles;
use crate::core::reproject::transform_bounds;
use crate::core::tile_index::find_tiles;
use crate::io::raster::RasterIo;
use crate::io::tile_fetch::{CancellationToken, TileFetcher, TileSourceConfig};
use crate::io::workspace::TempWorkspace;
use crate::types::{BoundingBox, Crs, DemError, DemResult, RasterGrid, WGS84_EPSG};
use std::path::PathBuf;

/// gridMET elevation served over OPeNDAP
pub const GRIDMET_ELEVATION_URL: &str =
    "http://thredds.northwestknowledge.net:8080/thredds/dodsC/MET/elev/metdata_elevationdata.nc";

/// Provider of a native-CRS elevation grid covering a bounding box
pub trait ElevationSource {
    /// Gather elevation for `bbox`, using `workspace` for any scratch files
    fn acquire(
        &self,
        bbox: &BoundingBox,
        workspace: &TempWorkspace,
        cancel: &CancellationToken,
    ) -> DemResult<RasterGrid>;

    /// Short label for log messages
    fn describe(&self) -> String;
}

/// Web mercator GeoTIFF tiles fetched per `(z, x, y)` and mosaicked
pub struct TiledSource {
    fetcher: TileFetcher,
}

impl TiledSource {
    pub fn new(fetcher: TileFetcher) -> DemResult<Self> {
        fetcher.config().validate()?;
        Ok(Self { fetcher })
    }

    /// Source reading over HTTP from the configured tile service
    pub fn http(config: TileSourceConfig) -> DemResult<Self> {
        Self::new(TileFetcher::http(config)?)
    }

    /// Public AWS terrain tiles at `zoom`
    pub fn aws(zoom: u8) -> DemResult<Self> {
        Self::http(TileSourceConfig {
            zoom,
            ..Default::default()
        })
    }
}

impl ElevationSource for TiledSource {
    fn acquire(
        &self,
        bbox: &BoundingBox,
        workspace: &TempWorkspace,
        cancel: &CancellationToken,
    ) -> DemResult<RasterGrid> {
        let tiles = find_tiles(bbox, self.fetcher.config().zoom);
        if tiles.is_empty() {
            return Err(DemError::EmptyMosaic);
        }

        let fetched = self.fetcher.fetch_all(&tiles, workspace, cancel)?;
        let paths: Vec<PathBuf> = fetched.into_iter().map(|(_, path)| path).collect();
        merge_tiles(&paths, bbox.to_web_mercator())
    }

    fn describe(&self) -> String {
        format!(
            "tiles from {} at zoom {}",
            self.fetcher.config().base_url,
            self.fetcher.config().zoom
        )
    }
}

/// Window of a single gridded dataset readable by GDAL: a local file, a
/// `/vsicurl/` URL or an OPeNDAP endpoint.
pub struct SubsetSource {
    location: String,
}

impl SubsetSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn gridmet() -> Self {
        Self::new(GRIDMET_ELEVATION_URL)
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

impl Default for SubsetSource {
    fn default() -> Self {
        Self::gridmet()
    }
}

impl ElevationSource for SubsetSource {
    fn acquire(
        &self,
        bbox: &BoundingBox,
        _workspace: &TempWorkspace,
        cancel: &CancellationToken,
    ) -> DemResult<RasterGrid> {
        cancel.check()?;
        log::info!("Subsetting {} to {:?}", self.location, bbox);

        let crs = RasterIo::read_crs(&self.location)?;
        let geographic = [bbox.west, bbox.south, bbox.east, bbox.north];
        let bounds = transform_bounds(geographic, &Crs::from_epsg(WGS84_EPSG), &crs)?;
        RasterIo::read_window(&self.location, bounds)
    }

    fn describe(&self) -> String {
        format!("subset of {}", self.location)
    }
}
