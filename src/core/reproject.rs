//! CRS-to-CRS warping of elevation grids.
//!
//! The output grid is GDAL's suggested warp output for the source extent:
//! the source footprint is traced in the target CRS and covered by square
//! pixels that preserve the source's pixel count along the diagonal. Every
//! destination pixel center is then mapped back into the source and sampled
//! with Keys cubic convolution.

use crate::types::{
    BoundingBox, Crs, DemError, DemResult, GeoTransform, RasterGrid, TargetProfile, WGS84_EPSG,
};
use gdal::spatial_ref::CoordTransform;
use ndarray::Array2;

/// Value written to destination pixels the source does not cover
pub const REPROJECT_FILL: f32 = 0.0;

/// Samples taken along each edge when tracing an extent into another CRS
const EDGE_SAMPLES: usize = 21;

/// Keys cubic convolution parameter, as used by GDAL and rasterio
const CUBIC_A: f64 = -0.5;

/// Transform coordinate arrays in place from `src` to `dst`.
///
/// Points GDAL cannot transform come back as NaN.
pub fn transform_points(xs: &mut [f64], ys: &mut [f64], src: &Crs, dst: &Crs) -> DemResult<()> {
    if src.is_same(dst)? {
        return Ok(());
    }
    let transform = CoordTransform::new(&src.to_spatial_ref()?, &dst.to_spatial_ref()?)?;
    // GDAL rewrites the buffers in place even when the batch fails
    let (orig_xs, orig_ys) = (xs.to_vec(), ys.to_vec());
    let mut zs = vec![0.0; xs.len()];
    if transform.transform_coords(xs, ys, &mut zs).is_ok() {
        for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
            if !(x.is_finite() && y.is_finite()) {
                *x = f64::NAN;
                *y = f64::NAN;
            }
        }
        return Ok(());
    }

    log::debug!("Batch coordinate transform failed, retrying {} points individually", xs.len());
    for ((x, y), (&ox, &oy)) in xs
        .iter_mut()
        .zip(ys.iter_mut())
        .zip(orig_xs.iter().zip(orig_ys.iter()))
    {
        let (mut px, mut py, mut pz) = ([ox], [oy], [0.0]);
        let ok = transform.transform_coords(&mut px, &mut py, &mut pz).is_ok();
        if ok && px[0].is_finite() && py[0].is_finite() {
            *x = px[0];
            *y = py[0];
        } else {
            *x = f64::NAN;
            *y = f64::NAN;
        }
    }
    Ok(())
}

/// Extent `[left, bottom, right, top]` of `bounds` after transforming into
/// `dst`, traced along densified edges.
pub fn transform_bounds(bounds: [f64; 4], src: &Crs, dst: &Crs) -> DemResult<[f64; 4]> {
    let [left, bottom, right, top] = bounds;
    let (mut xs, mut ys) = edge_points(EDGE_SAMPLES, |u, v| {
        (left + u * (right - left), top - v * (top - bottom))
    });
    transform_points(&mut xs, &mut ys, src, dst)?;
    extent(&xs, &ys).ok_or_else(|| {
        DemError::UnsupportedExtent(format!(
            "bounds {:?} cannot be transformed from {} to {}",
            bounds, src, dst
        ))
    })
}

impl BoundingBox {
    /// Geographic extent of a target profile's grid
    pub fn from_profile(profile: &TargetProfile) -> DemResult<Self> {
        let [west, south, east, north] =
            transform_bounds(profile.bounds(), &profile.crs, &Crs::from_epsg(WGS84_EPSG))?;
        log::debug!(
            "Target grid spans lat [{:.5}, {:.5}], lon [{:.5}, {:.5}]",
            south,
            north,
            west,
            east
        );
        BoundingBox::new(north, south, east, west)
    }
}

/// Default output grid for warping a `width` x `height` raster with extent
/// `bounds` from `src` into `dst`.
pub fn suggested_warp_output(
    src: &Crs,
    dst: &Crs,
    width: usize,
    height: usize,
    bounds: [f64; 4],
) -> DemResult<(GeoTransform, usize, usize)> {
    let [left, bottom, right, top] = transform_bounds(bounds, src, dst)?;

    let diagonal = (right - left).hypot(top - bottom);
    let pixel_size = diagonal / (width as f64).hypot(height as f64);
    let dst_width = (((right - left) / pixel_size + 0.5) as usize).max(1);
    let dst_height = (((top - bottom) / pixel_size + 0.5) as usize).max(1);

    let transform = GeoTransform::north_up(left, top, pixel_size, -pixel_size);
    log::debug!(
        "Suggested warp output {}x{} at {:.6} for {} -> {}",
        dst_width,
        dst_height,
        pixel_size,
        src,
        dst
    );
    Ok((transform, dst_width, dst_height))
}

/// Warp `grid` into `dst_crs` on the suggested default grid for its extent
pub fn reproject(grid: &RasterGrid, dst_crs: &Crs) -> DemResult<RasterGrid> {
    let (transform, width, height) =
        suggested_warp_output(grid.crs(), dst_crs, grid.width(), grid.height(), grid.bounds())?;
    reproject_to(grid, dst_crs, transform, width, height)
}

/// Warp `grid` onto an explicit destination grid with cubic resampling.
///
/// Destination pixels whose center falls outside the source, or whose nearest
/// source sample is nodata, receive [`REPROJECT_FILL`].
pub fn reproject_to(
    grid: &RasterGrid,
    dst_crs: &Crs,
    dst_transform: GeoTransform,
    width: usize,
    height: usize,
) -> DemResult<RasterGrid> {
    log::info!(
        "Reprojecting {}x{} grid from {} to {} ({}x{})",
        grid.width(),
        grid.height(),
        grid.crs(),
        dst_crs,
        width,
        height
    );

    // Destination pixel centers, in destination world coordinates
    let mut xs = Vec::with_capacity(width * height);
    let mut ys = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let (x, y) = dst_transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
            xs.push(x);
            ys.push(y);
        }
    }
    transform_points(&mut xs, &mut ys, dst_crs, grid.crs())?;

    let src_transform = *grid.transform();
    let sample = |idx: usize| -> f32 {
        match src_transform.world_to_pixel(xs[idx], ys[idx]) {
            Some((col, row)) if col.is_finite() && row.is_finite() => cubic_sample(grid, col, row),
            _ => REPROJECT_FILL,
        }
    };

    #[cfg(feature = "parallel")]
    let values: Vec<f32> = {
        use rayon::prelude::*;
        (0..width * height).into_par_iter().map(sample).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let values: Vec<f32> = (0..width * height).map(sample).collect();

    let data = Array2::from_shape_vec((height, width), values).map_err(|e| {
        DemError::Processing(format!("Failed to shape reprojected data: {}", e))
    })?;

    Ok(RasterGrid::new(data, dst_transform, dst_crs.clone()))
}

/// Cubic convolution at fractional pixel position `(col, row)`, where
/// integer positions are pixel corners.
fn cubic_sample(grid: &RasterGrid, col: f64, row: f64) -> f32 {
    let data = grid.data();
    let (height, width) = data.dim();
    if col < 0.0 || row < 0.0 || col > width as f64 || row > height as f64 {
        return REPROJECT_FILL;
    }

    // Shift to pixel-center coordinates
    let x = col - 0.5;
    let y = row - 0.5;
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let clamp = |v: f64, max: usize| -> usize { v.max(0.0).min((max - 1) as f64) as usize };

    let mut acc = 0.0f64;
    for j in -1..=2 {
        let wy = keys_weight(fy - j as f64);
        let r = clamp(y0 + j as f64, height);
        for i in -1..=2 {
            let wx = keys_weight(fx - i as f64);
            let c = clamp(x0 + i as f64, width);
            let value = data[[r, c]];
            if grid.is_nodata(value) || !value.is_finite() {
                return nearest_sample(grid, col, row);
            }
            acc += wx * wy * value as f64;
        }
    }
    acc as f32
}

fn nearest_sample(grid: &RasterGrid, col: f64, row: f64) -> f32 {
    let data = grid.data();
    let (height, width) = data.dim();
    let c = (col.floor() as usize).min(width - 1);
    let r = (row.floor() as usize).min(height - 1);
    let value = data[[r, c]];
    if grid.is_nodata(value) || !value.is_finite() {
        REPROJECT_FILL
    } else {
        value
    }
}

fn keys_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        ((CUBIC_A + 2.0) * t - (CUBIC_A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((CUBIC_A * t - 5.0 * CUBIC_A) * t + 8.0 * CUBIC_A) * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

/// Points along the unit square's edges, mapped through `f(u, v)`
fn edge_points<F>(samples: usize, f: F) -> (Vec<f64>, Vec<f64>)
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let steps = (samples - 1) as f64;
    let mut xs = Vec::with_capacity(samples * 4);
    let mut ys = Vec::with_capacity(samples * 4);
    for k in 0..samples {
        let t = k as f64 / steps;
        for (u, v) in [(t, 0.0), (t, 1.0), (0.0, t), (1.0, t)] {
            let (x, y) = f(u, v);
            xs.push(x);
            ys.push(y);
        }
    }
    (xs, ys)
}

fn extent(xs: &[f64], ys: &[f64]) -> Option<[f64; 4]> {
    let mut b = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
    for (&x, &y) in xs.iter().zip(ys) {
        if !(x.is_finite() && y.is_finite()) {
            continue;
        }
        b[0] = b[0].min(x);
        b[1] = b[1].min(y);
        b[2] = b[2].max(x);
        b[3] = b[3].max(y);
    }
    if b[0] < b[2] && b[1] < b[3] {
        Some(b)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tile_index::lonlat_to_web_mercator;
    use approx::assert_relative_eq;

    fn plane(width: usize, height: usize) -> RasterGrid {
        let data = Array2::from_shape_fn((height, width), |(r, c)| (2 * c + 3 * r) as f32);
        RasterGrid::new(
            data,
            GeoTransform::north_up(-12_000_000.0, 5_800_000.0, 100.0, -100.0),
            Crs::web_mercator(),
        )
    }

    #[test]
    fn test_keys_weights_partition_unity() {
        for &f in &[0.0, 0.25, 0.5, 0.9] {
            let sum: f64 = (-1..=2).map(|i| keys_weight(f - i as f64)).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        }
        assert_eq!(keys_weight(0.0), 1.0);
        assert_eq!(keys_weight(1.0), 0.0);
    }

    #[test]
    fn test_identity_reprojection_preserves_values() {
        let grid = plane(16, 12);
        let out = reproject_to(&grid, &Crs::web_mercator(), *grid.transform(), 16, 12).unwrap();
        for ((r, c), &v) in out.data().indexed_iter() {
            assert_relative_eq!(v, grid.data()[[r, c]], epsilon = 1e-3);
        }
    }

    #[test]
    fn test_cubic_reproduces_linear_ramp_between_centers() {
        let grid = plane(16, 12);
        // between pixel centers (5, 4) and (6, 4) away from the edges
        let value = cubic_sample(&grid, 6.0, 4.5);
        assert_relative_eq!(value, 2.0 * 5.5 + 3.0 * 4.0, epsilon = 1e-4);
    }

    #[test]
    fn test_outside_source_is_filled() {
        let grid = plane(4, 4);
        let shifted = grid.transform().translated(10.0, 0.0);
        let out = reproject_to(&grid, &Crs::web_mercator(), shifted, 4, 4).unwrap();
        assert!(out.data().iter().all(|&v| v == REPROJECT_FILL));
    }

    #[test]
    fn test_untransformable_point_does_not_corrupt_batch() {
        let mut xs = vec![-111.0, 0.0, 10.0];
        let mut ys = vec![45.0, 90.0, -30.0];
        transform_points(&mut xs, &mut ys, &Crs::wgs84(), &Crs::web_mercator()).unwrap();

        for (i, (lon, lat)) in [(0, (-111.0, 45.0)), (2, (10.0, -30.0))] {
            let (x, y) = lonlat_to_web_mercator(lon, lat);
            assert_relative_eq!(xs[i], x, epsilon = 1e-3);
            assert_relative_eq!(ys[i], y, epsilon = 1e-3);
        }
        assert!(xs[1].is_nan());
        assert!(ys[1].is_nan());
    }

    #[test]
    fn test_transform_bounds_geographic() {
        let (left, bottom) = lonlat_to_web_mercator(-111.0, 45.0);
        let (right, top) = lonlat_to_web_mercator(-110.0, 46.0);
        let b = transform_bounds(
            [left, bottom, right, top],
            &Crs::web_mercator(),
            &Crs::wgs84(),
        )
        .unwrap();
        assert_relative_eq!(b[0], -111.0, epsilon = 1e-6);
        assert_relative_eq!(b[1], 45.0, epsilon = 1e-6);
        assert_relative_eq!(b[2], -110.0, epsilon = 1e-6);
        assert_relative_eq!(b[3], 46.0, epsilon = 1e-6);
    }

    #[test]
    fn test_suggested_output_keeps_diagonal_pixel_count() {
        let grid = plane(200, 100);
        let (transform, width, height) = suggested_warp_output(
            grid.crs(),
            &Crs::wgs84(),
            grid.width(),
            grid.height(),
            grid.bounds(),
        )
        .unwrap();
        assert_eq!(transform.pixel_width, -transform.pixel_height);
        let diagonal = (width as f64).hypot(height as f64);
        assert!((diagonal - 200f64.hypot(100.0)).abs() < 2.0);
    }

    #[test]
    fn test_bbox_from_profile() {
        let profile = TargetProfile::new(
            Crs::wgs84(),
            GeoTransform::north_up(-111.0, 46.0, 0.01, -0.01),
            100,
            50,
        );
        let bbox = BoundingBox::from_profile(&profile).unwrap();
        assert_relative_eq!(bbox.west, -111.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.east, -110.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.south, 45.5, epsilon = 1e-9);
        assert_relative_eq!(bbox.north, 46.0, epsilon = 1e-9);
    }
}
