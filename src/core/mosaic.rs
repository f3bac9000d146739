//! Merging fetched tiles into one north-up grid.

use crate::io::raster::RasterIo;
use crate::types::{DemError, DemResult, GeoTransform, RasterGrid};
use ndarray::Array2;
use std::path::PathBuf;

/// Read tile files and merge them onto one grid covering `bounds`.
///
/// `bounds` is `[left, bottom, right, top]` in the tiles' CRS.
pub fn merge_tiles(paths: &[PathBuf], bounds: [f64; 4]) -> DemResult<RasterGrid> {
    if paths.is_empty() {
        return Err(DemError::EmptyMosaic);
    }
    let grids = paths
        .iter()
        .map(RasterIo::read_grid)
        .collect::<DemResult<Vec<_>>>()?;
    merge_grids(&grids, bounds)
}

/// Merge grids sharing a CRS onto one north-up grid covering `bounds`.
///
/// The first grid is the template: its CRS, pixel size and nodata value carry
/// over to the mosaic. Output pixels take the value of the source pixel under
/// their center, and where grids overlap the later grid wins. Pixels no grid
/// covers hold the nodata value, or 0 when the template has none.
pub fn merge_grids(grids: &[RasterGrid], bounds: [f64; 4]) -> DemResult<RasterGrid> {
    let template = grids.first().ok_or(DemError::EmptyMosaic)?;
    let (res_x, res_y) = template.resolution();
    let [left, bottom, right, top] = bounds;

    let width = ((right - left) / res_x).round().max(1.0) as usize;
    let height = ((top - bottom) / res_y).round().max(1.0) as usize;
    let transform = GeoTransform::north_up(left, top, res_x, -res_y);
    let fill = template.nodata().unwrap_or(0.0);

    log::info!(
        "Merging {} tiles into a {}x{} mosaic at {:.3} x {:.3} resolution",
        grids.len(),
        width,
        height,
        res_x,
        res_y
    );

    let mut data = Array2::from_elem((height, width), fill);
    for grid in grids {
        if !grid.crs().is_same(template.crs())? {
            return Err(DemError::Processing(format!(
                "Cannot merge tiles in different CRS ({} vs {})",
                grid.crs(),
                template.crs()
            )));
        }
        paint(&mut data, &transform, grid);
    }

    log::debug!("Mosaic transform: {:?}", transform);
    Ok(RasterGrid::new(data, transform, template.crs().clone()).with_nodata(template.nodata()))
}

fn paint(data: &mut Array2<f32>, transform: &GeoTransform, grid: &RasterGrid) {
    let (height, width) = data.dim();
    let Some(window) = transform.window(grid.bounds(), width, height) else {
        return;
    };

    let src = grid.data();
    let (src_height, src_width) = src.dim();
    let mut painted = 0usize;

    for row in window.row_off..window.row_end() {
        for col in window.col_off..window.col_end() {
            let (x, y) = transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
            let Some((src_col, src_row)) = grid.transform().world_to_pixel(x, y) else {
                continue;
            };
            if src_col < 0.0 || src_row < 0.0 {
                continue;
            }
            let (sc, sr) = (src_col.floor() as usize, src_row.floor() as usize);
            if sc >= src_width || sr >= src_height {
                continue;
            }
            let value = src[[sr, sc]];
            if grid.is_nodata(value) {
                continue;
            }
            data[[row, col]] = value;
            painted += 1;
        }
    }

    log::debug!("Painted {} pixels from tile at {:?}", painted, grid.transform());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Crs;

    fn tile(left: f64, top: f64, value: f32) -> RasterGrid {
        RasterGrid::new(
            Array2::from_elem((4, 4), value),
            GeoTransform::north_up(left, top, 10.0, -10.0),
            Crs::web_mercator(),
        )
    }

    #[test]
    fn test_merge_two_by_two() {
        let grids = vec![
            tile(0.0, 80.0, 1.0),
            tile(40.0, 80.0, 2.0),
            tile(0.0, 40.0, 3.0),
            tile(40.0, 40.0, 4.0),
        ];
        let mosaic = merge_grids(&grids, [0.0, 0.0, 80.0, 80.0]).unwrap();

        assert_eq!(mosaic.data().dim(), (8, 8));
        assert_eq!(mosaic.data()[[0, 0]], 1.0);
        assert_eq!(mosaic.data()[[0, 7]], 2.0);
        assert_eq!(mosaic.data()[[7, 0]], 3.0);
        assert_eq!(mosaic.data()[[7, 7]], 4.0);
        assert_eq!(*mosaic.transform(), GeoTransform::north_up(0.0, 80.0, 10.0, -10.0));
    }

    #[test]
    fn test_clipped_to_bounds() {
        let grids = vec![tile(0.0, 40.0, 5.0)];
        let mosaic = merge_grids(&grids, [10.0, 10.0, 30.0, 40.0]).unwrap();
        assert_eq!(mosaic.data().dim(), (3, 2));
        assert!(mosaic.data().iter().all(|&v| v == 5.0));
        assert_eq!(mosaic.transform().top_left_x, 10.0);
    }

    #[test]
    fn test_later_tile_wins_overlap() {
        let grids = vec![tile(0.0, 40.0, 1.0), tile(20.0, 40.0, 2.0)];
        let mosaic = merge_grids(&grids, [0.0, 0.0, 60.0, 40.0]).unwrap();
        assert_eq!(mosaic.data()[[0, 1]], 1.0);
        assert_eq!(mosaic.data()[[0, 2]], 2.0);
        assert_eq!(mosaic.data()[[0, 5]], 2.0);
    }

    #[test]
    fn test_nodata_does_not_overwrite() {
        let holes = tile(0.0, 40.0, -1.0).with_nodata(Some(-1.0));
        let grids = vec![tile(0.0, 40.0, 7.0).with_nodata(Some(-1.0)), holes];
        let mosaic = merge_grids(&grids, [0.0, 0.0, 40.0, 40.0]).unwrap();
        assert!(mosaic.data().iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_uncovered_pixels_filled() {
        let mosaic = merge_grids(&[tile(0.0, 40.0, 3.0)], [0.0, 0.0, 80.0, 40.0]).unwrap();
        assert_eq!(mosaic.data()[[0, 7]], 0.0);
        assert_eq!(mosaic.nodata(), None);
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            merge_grids(&[], [0.0, 0.0, 1.0, 1.0]),
            Err(DemError::EmptyMosaic)
        ));
        assert!(matches!(
            merge_tiles(&[], [0.0, 0.0, 1.0, 1.0]),
            Err(DemError::EmptyMosaic)
        ));
    }
}
