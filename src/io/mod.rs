//! Tile downloads, raster files and scratch space

pub mod raster;
pub mod source;
pub mod tile_fetch;
pub mod workspace;

pub use raster::RasterIo;
pub use source::{ElevationSource, SubsetSource, TiledSource};
pub use tile_fetch::{
    CancellationToken, HttpTransport, TileFetcher, TileResponse, TileSourceConfig, TileTransport,
};
pub use workspace::TempWorkspace;
