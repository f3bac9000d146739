//! End-to-end terrain run: acquire, reproject, clip, resample, derive.
//!
//! Each stage takes a [`RasterGrid`] and returns a new one; the pipeline only
//! threads values between them. A run owns one [`TempWorkspace`] that is
//! removed when the run returns, whichever way it returns.

use crate::core::mask::clip;
use crate::core::reproject::reproject;
use crate::core::resample::resample_to_profile;
use crate::core::terrain::{TerrainAnalyzer, TerrainParams, TerrainRaster};
use crate::io::raster::RasterIo;
use crate::io::source::{ElevationSource, TiledSource};
use crate::io::tile_fetch::CancellationToken;
use crate::io::workspace::TempWorkspace;
use crate::types::{
    BoundingBox, ClipGeometry, DemError, DemResult, RasterGrid, SlopeUnits, TargetProfile,
    TerrainAttribute,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Gaussian sigma (pixels) for slope
    pub slope_sigma: f64,
    /// Parent of the per-run scratch directory; system temp dir when `None`
    pub workspace_root: Option<PathBuf>,
    /// Also write the reprojected, clipped and resampled grids here
    pub intermediates_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn validate(&self) -> DemResult<()> {
        if !(self.slope_sigma > 0.0 && self.slope_sigma.is_finite()) {
            return Err(DemError::InvalidConfig(format!(
                "slope_sigma must be a positive number of pixels, got {}",
                self.slope_sigma
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slope_sigma: 5.0,
            workspace_root: None,
            intermediates_dir: None,
        }
    }
}

/// Elevation and terrain derivatives co-registered with a target grid
pub struct DemPipeline<S: ElevationSource> {
    source: S,
    target: TargetProfile,
    bbox: BoundingBox,
    clip: Option<ClipGeometry>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl DemPipeline<TiledSource> {
    /// Pipeline over the public AWS terrain tiles
    pub fn aws(zoom: u8, target: TargetProfile, bbox: BoundingBox) -> DemResult<Self> {
        Self::new(TiledSource::aws(zoom)?, target, bbox)
    }
}

impl<S: ElevationSource> DemPipeline<S> {
    pub fn new(source: S, target: TargetProfile, bbox: BoundingBox) -> DemResult<Self> {
        target.validate()?;
        Ok(Self {
            source,
            target,
            bbox,
            clip: None,
            config: PipelineConfig::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Pipeline whose bounding box is the geographic extent of `target`
    pub fn for_profile(source: S, target: TargetProfile) -> DemResult<Self> {
        target.validate()?;
        let bbox = BoundingBox::from_profile(&target)?;
        Self::new(source, target, bbox)
    }

    /// Clip to `geometry`, given in the target CRS
    pub fn with_clip(mut self, geometry: ClipGeometry) -> Self {
        self.clip = Some(geometry);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> DemResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn target(&self) -> &TargetProfile {
        &self.target
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Compute `attribute` and optionally write it to `out_file`.
    ///
    /// `attribute` is one of `elevation`, `slope` or `aspect`, and is checked
    /// before any network or disk access. `mode` selects slope units. Without
    /// `out_file` the product is returned; with it the product is saved on the
    /// target grid and returned only when `save_and_return` is set.
    pub fn terrain(
        &self,
        attribute: &str,
        mode: Option<&str>,
        out_file: Option<&Path>,
        save_and_return: bool,
    ) -> DemResult<Option<TerrainRaster>> {
        let attribute: TerrainAttribute = attribute.parse()?;
        let units = SlopeUnits::from_mode(mode);

        let raster = self.run(attribute, units)?;

        match out_file {
            Some(path) => {
                RasterIo::save(raster.view(), &self.target, path, None, false)?;
                Ok(save_and_return.then_some(raster))
            }
            None => Ok(Some(raster)),
        }
    }

    /// Run every stage and derive `attribute`
    pub fn run(&self, attribute: TerrainAttribute, units: SlopeUnits) -> DemResult<TerrainRaster> {
        let workspace = TempWorkspace::create(self.config.workspace_root.as_deref())?;
        let elevation = self.elevation(&workspace)?;

        let analyzer = TerrainAnalyzer::with_params(TerrainParams {
            gaussian_sigma: self.config.slope_sigma,
            ..Default::default()
        });
        let raster = analyzer.derive(elevation.data(), attribute, units)?;

        workspace.close()?;
        Ok(raster)
    }

    /// Elevation resampled onto the target grid
    pub fn elevation(&self, workspace: &TempWorkspace) -> DemResult<RasterGrid> {
        log::info!(
            "Acquiring elevation for {:?} from {}",
            self.bbox,
            self.source.describe()
        );
        let mosaic = self.source.acquire(&self.bbox, workspace, &self.cancel)?;

        self.cancel.check()?;
        let reprojected = reproject(&mosaic, &self.target.crs)?;
        drop(mosaic);
        self.keep_intermediate(&reprojected, "tiled_reproj.tif")?;

        let surface = match &self.clip {
            Some(geometry) => {
                self.cancel.check()?;
                let masked = clip(&reprojected, geometry)?;
                self.keep_intermediate(&masked, "masked_dem.tif")?;
                masked
            }
            None => reprojected,
        };

        self.cancel.check()?;
        let resampled = resample_to_profile(&surface, &self.target)?;
        self.keep_intermediate(&resampled, "resample.tif")?;
        Ok(resampled)
    }

    fn keep_intermediate(&self, grid: &RasterGrid, name: &str) -> DemResult<()> {
        if let Some(dir) = &self.config.intermediates_dir {
            std::fs::create_dir_all(dir)?;
            RasterIo::write_grid(grid, dir.join(name))?;
        }
        Ok(())
    }
}
