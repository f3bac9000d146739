//! opendem: elevation tiles onto any raster grid
//!
//! Fetches web mercator DEM tiles covering a bounding box, mosaics them,
//! reprojects and resamples the mosaic onto a caller's target grid and
//! derives slope and aspect, so elevation lines up pixel for pixel with
//! other rasters on that grid.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types
pub use types::{
    BoundingBox, ClipGeometry, Crs, DemError, DemResult, GeoTransform, PixelWindow, RasterGrid,
    SlopeUnits, TargetProfile, TerrainAttribute,
};

pub use crate::core::{DemPipeline, PipelineConfig, TerrainRaster, TileCoord};
pub use io::{CancellationToken, ElevationSource, RasterIo, SubsetSource, TiledSource};
