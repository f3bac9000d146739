//! Bilinear resampling onto the target grid.

use crate::types::{DemError, DemResult, GeoTransform, RasterGrid, TargetProfile};
use ndarray::Array2;

/// Bilinear rescale of a grid onto the target profile's pixel grid.
///
/// Output pixels are sampled at the centers of the profile's own transform,
/// so the result is registered to the profile whatever extent the incoming
/// grid covers (a clip window or a curved reprojected footprint). The scale
/// ratio of the grid's x pixel size over the target's is only reported.
/// Pixels past the source footprint get the source nodata value, or 0.
pub fn resample_to_profile(grid: &RasterGrid, profile: &TargetProfile) -> DemResult<RasterGrid> {
    let target_res = profile.transform.pixel_width.abs();
    let (src_res, _) = grid.resolution();
    if !(target_res > 0.0 && target_res.is_finite()) {
        return Err(DemError::InvalidProfile(format!(
            "target pixel width {} cannot drive a resample",
            profile.transform.pixel_width
        )));
    }
    let coeff = src_res / target_res;

    log::info!(
        "Resampling {}x{} grid by {:.4} to {}x{}",
        grid.width(),
        grid.height(),
        coeff,
        profile.width,
        profile.height
    );
    log::debug!(
        "Ratio-derived shape would be {}x{}",
        (grid.width() as f64 * coeff).round(),
        (grid.height() as f64 * coeff).round()
    );

    let data = bilinear(grid, &profile.transform, profile.width, profile.height)?;
    Ok(RasterGrid::new(data, profile.transform, grid.crs().clone()).with_nodata(grid.nodata()))
}

/// Sample `grid` bilinearly at the pixel centers of a `width` x `height`
/// destination grid in the same CRS.
pub fn bilinear(
    grid: &RasterGrid,
    dst_transform: &GeoTransform,
    width: usize,
    height: usize,
) -> DemResult<Array2<f32>> {
    let fill = grid.nodata().unwrap_or(0.0);
    let src_transform = grid.transform();

    let sample = |idx: usize| -> f32 {
        let (row, col) = (idx / width, idx % width);
        let (x, y) = dst_transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
        match src_transform.world_to_pixel(x, y) {
            Some((c, r)) => interpolate(grid, c, r).unwrap_or(fill),
            None => fill,
        }
    };

    #[cfg(feature = "parallel")]
    let values: Vec<f32> = {
        use rayon::prelude::*;
        (0..width * height).into_par_iter().map(sample).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let values: Vec<f32> = (0..width * height).map(sample).collect();

    Array2::from_shape_vec((height, width), values)
        .map_err(|e| DemError::Processing(format!("Failed to shape resampled data: {}", e)))
}

fn interpolate(grid: &RasterGrid, col: f64, row: f64) -> Option<f32> {
    let data = grid.data();
    let (height, width) = data.dim();
    if !(col >= 0.0 && row >= 0.0 && col <= width as f64 && row <= height as f64) {
        return None;
    }

    let x = (col - 0.5).clamp(0.0, (width - 1) as f64);
    let y = (row - 0.5).clamp(0.0, (height - 1) as f64);
    let x1 = x.floor() as usize;
    let y1 = y.floor() as usize;
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);
    let dx = x - x1 as f64;
    let dy = y - y1 as f64;

    let v11 = data[[y1, x1]];
    let v12 = data[[y2, x1]];
    let v21 = data[[y1, x2]];
    let v22 = data[[y2, x2]];
    if [v11, v12, v21, v22].iter().any(|&v| grid.is_nodata(v)) {
        // fall back to the closest sample
        let nearest = data[[y.round() as usize, x.round() as usize]];
        return (!grid.is_nodata(nearest)).then_some(nearest);
    }

    let interpolated = v11 as f64 * (1.0 - dx) * (1.0 - dy)
        + v21 as f64 * dx * (1.0 - dy)
        + v12 as f64 * (1.0 - dx) * dy
        + v22 as f64 * dx * dy;
    Some(interpolated as f32)
}
