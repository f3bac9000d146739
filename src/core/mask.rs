//! All-touched clipping of a grid to a polygon mask.

use crate::types::{ClipGeometry, DemError, DemResult, RasterGrid};
use geo::{BoundingRect, Intersects, LineString, Polygon};
use ndarray::{s, Array2};

/// Crop `grid` to the bounding rectangle of `geometry` and blank every pixel
/// the geometry does not touch.
///
/// A pixel is kept when its footprint intersects the geometry at all, so
/// partially covered edge pixels survive. Blanked pixels take the grid's
/// nodata value, or 0 when it has none, and the result records that value as
/// its nodata.
pub fn clip(grid: &RasterGrid, geometry: &ClipGeometry) -> DemResult<RasterGrid> {
    let rect = geometry.bounding_rect().ok_or(DemError::EmptyClip)?;
    let transform = grid.transform();

    let (min, max) = (rect.min(), rect.max());
    let window = transform
        .window([min.x, min.y, max.x, max.y], grid.width(), grid.height())
        .ok_or_else(|| {
            log::warn!("Clip geometry bounds {:?} fall outside the raster", rect);
            DemError::EmptyClip
        })?;
    log::info!("Clipping to window {:?}", window);

    let fill = grid.nodata().unwrap_or(0.0);
    let block = grid
        .data()
        .slice(s![window.row_off..window.row_end(), window.col_off..window.col_end()]);
    let window_transform = transform.translated(window.col_off as f64, window.row_off as f64);

    let mut touched = 0usize;
    let data = Array2::from_shape_fn(block.dim(), |(r, c)| {
        let corners = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]
            .iter()
            .map(|(dc, dr)| window_transform.pixel_to_world(c as f64 + dc, r as f64 + dr))
            .collect::<Vec<_>>();
        let pixel = Polygon::new(LineString::from(corners), vec![]);
        if geometry.intersects(&pixel) {
            touched += 1;
            block[[r, c]]
        } else {
            fill
        }
    });

    if touched == 0 {
        log::warn!("Clip geometry touches no pixel of the raster");
        return Err(DemError::EmptyClip);
    }
    log::debug!("Clip kept {} of {} pixels", touched, data.len());

    Ok(RasterGrid::new(data, window_transform, grid.crs().clone()).with_nodata(Some(fill)))
}
