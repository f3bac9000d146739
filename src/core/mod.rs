//! Processing stages of the elevation pipeline

pub mod tile_index;
pub mod mosaic;
pub mod reproject;
pub mod mask;
pub mod resample;
pub mod terrain;
pub mod pipeline;

// Re-export main types
pub use tile_index::{find_tiles, mercator_tile, TileCoord, MAX_ZOOM};
pub use mosaic::{merge_grids, merge_tiles};
pub use reproject::{reproject, reproject_to, suggested_warp_output, transform_bounds};
pub use mask::clip;
pub use resample::resample_to_profile;
pub use terrain::{TerrainAnalyzer, TerrainParams, TerrainRaster};
pub use pipeline::{DemPipeline, PipelineConfig};
