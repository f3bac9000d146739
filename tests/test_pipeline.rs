mod common;

use common::*;
use geo::polygon;
use geo::MultiPolygon;
use opendem::core::find_tiles;
use opendem::core::tile_index::lonlat_to_web_mercator;
use opendem::{
    CancellationToken, Crs, DemError, DemPipeline, GeoTransform, PipelineConfig, RasterIo,
    SubsetSource, TargetProfile, TerrainAttribute, TerrainRaster, TiledSource,
};
use std::collections::HashSet;
use std::f32::consts::TAU;
use std::path::Path;
use tempfile::TempDir;

const TARGET_SIZE: usize = 100;
const TARGET_RES: f64 = 0.0019;
/// Inset of the target grid inside the fetched box, in degrees
const TARGET_INSET: f64 = 0.005;
/// Nearest-pixel mosaicking moves samples by up to half a tile pixel
const ELEVATION_TOLERANCE: f32 = 8.0;

fn target() -> TargetProfile {
    let bbox = corner_bbox();
    TargetProfile::new(
        Crs::wgs84(),
        GeoTransform::north_up(
            bbox.west + TARGET_INSET,
            bbox.north - TARGET_INSET,
            TARGET_RES,
            -TARGET_RES,
        ),
        TARGET_SIZE,
        TARGET_SIZE,
    )
}

/// Synthetic surface under the center of target pixel `(row, col)`
fn expected_elevation(row: usize, col: usize) -> f32 {
    let (lon, lat) = target()
        .transform
        .pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
    let (x, y) = lonlat_to_web_mercator(lon, lat);
    synthetic_elevation(x, y)
}

fn assert_elevation_at(data: &ndarray::Array3<f32>, row: usize, col: usize) {
    let (actual, expected) = (data[[0, row, col]], expected_elevation(row, col));
    assert!(
        (actual - expected).abs() < ELEVATION_TOLERANCE,
        "pixel ({}, {}): got {}, expected {}",
        row,
        col,
        actual,
        expected
    );
}

fn tiled_pipeline(server: MockTileServer, root: &Path) -> DemPipeline<TiledSource> {
    DemPipeline::new(
        TiledSource::new(server.into_fetcher()).unwrap(),
        target(),
        corner_bbox(),
    )
    .unwrap()
    .with_config(PipelineConfig {
        workspace_root: Some(root.to_path_buf()),
        ..Default::default()
    })
    .unwrap()
}

fn full_server() -> MockTileServer {
    MockTileServer::serving(&find_tiles(&corner_bbox(), ZOOM), &HashSet::new())
}

#[test]
fn test_corner_bbox_spans_four_tiles() {
    let tiles = find_tiles(&corner_bbox(), ZOOM);
    assert_eq!(tiles.len(), 4);
    assert_eq!(tiles[0].x, 197);
    assert_eq!(tiles[0].y, 365);
    assert_eq!(tiles[3].x, 198);
    assert_eq!(tiles[3].y, 366);
}

#[test]
fn test_elevation_on_target_grid() {
    init_logging();
    let root = TempDir::new().unwrap();
    let server = full_server();
    let calls = server.calls();

    let raster = tiled_pipeline(server, root.path())
        .terrain("elevation", None, None, false)
        .unwrap()
        .unwrap();

    assert_eq!(raster.attribute(), TerrainAttribute::Elevation);
    assert_eq!(raster.shape(), &[1, TARGET_SIZE, TARGET_SIZE]);
    assert_eq!(call_count(&calls), 4);

    let TerrainRaster::Elevation(data) = raster else {
        panic!("expected an elevation raster");
    };
    for row in 0..TARGET_SIZE {
        for col in 0..TARGET_SIZE {
            assert_elevation_at(&data, row, col);
        }
    }

    // scratch directory is gone once the run returns
    assert_eq!(count_entries(root.path()), 0);
}

#[test]
fn test_aspect_is_two_dimensional_and_wrapped() {
    init_logging();
    let root = TempDir::new().unwrap();

    let raster = tiled_pipeline(full_server(), root.path())
        .terrain("aspect", None, None, false)
        .unwrap()
        .unwrap();

    assert_eq!(raster.shape(), &[TARGET_SIZE, TARGET_SIZE]);
    let view = raster.view();
    assert!(view.iter().all(|&a| (0.0..TAU).contains(&a)));
    assert_eq!(count_entries(root.path()), 0);
}

#[test]
fn test_slope_in_degrees() {
    init_logging();
    let root = TempDir::new().unwrap();

    let raster = tiled_pipeline(full_server(), root.path())
        .with_config(PipelineConfig {
            slope_sigma: 2.0,
            workspace_root: Some(root.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap()
        .terrain("slope", Some("degrees"), None, false)
        .unwrap()
        .unwrap();

    assert_eq!(raster.shape(), &[1, TARGET_SIZE, TARGET_SIZE]);
    let view = raster.view();
    assert!(view.iter().all(|&s| (0.0..=90.0).contains(&s)));
    assert!(view.iter().any(|&s| s > 0.0));
}

#[test]
fn test_out_file_written_on_target_grid() {
    init_logging();
    let root = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let path = out.path().join("elevation.tif");

    let returned = tiled_pipeline(full_server(), root.path())
        .terrain("elevation", None, Some(&path), false)
        .unwrap();
    assert!(returned.is_none());

    let written = RasterIo::read_grid(&path).unwrap();
    assert_eq!(written.width(), TARGET_SIZE);
    assert_eq!(written.height(), TARGET_SIZE);
    assert_eq!(*written.transform(), target().transform);
    assert!(written.crs().is_same(&Crs::wgs84()).unwrap());
}

#[test]
fn test_save_and_return() {
    let root = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let path = out.path().join("aspect.tif");

    let returned = tiled_pipeline(full_server(), root.path())
        .terrain("aspect", None, Some(&path), true)
        .unwrap();

    assert_eq!(returned.unwrap().shape(), &[TARGET_SIZE, TARGET_SIZE]);
    assert!(path.exists());
}

#[test]
fn test_missing_tile_fails_and_cleans_up() {
    init_logging();
    let root = TempDir::new().unwrap();
    let tiles = find_tiles(&corner_bbox(), ZOOM);
    let missing: HashSet<_> = [tiles[2]].into_iter().collect();
    let server = MockTileServer::serving(&tiles, &missing);

    let result = tiled_pipeline(server, root.path()).terrain("elevation", None, None, false);

    match result {
        Err(DemError::TileFetch { coord, status, .. }) => {
            assert_eq!(coord, tiles[2]);
            assert_eq!(status, Some(404));
        }
        other => panic!("expected a tile fetch failure, got {:?}", other.map(|_| ())),
    }
    assert_eq!(count_entries(root.path()), 0);
}

#[test]
fn test_unknown_attribute_makes_no_requests() {
    let root = TempDir::new().unwrap();
    let server = full_server();
    let calls = server.calls();

    let result = tiled_pipeline(server, root.path()).terrain("curvature", None, None, false);

    assert!(matches!(result, Err(DemError::InvalidAttribute(ref a)) if a == "curvature"));
    assert_eq!(call_count(&calls), 0);
    assert_eq!(count_entries(root.path()), 0);
}

#[test]
fn test_cancelled_run_makes_no_requests() {
    let root = TempDir::new().unwrap();
    let server = full_server();
    let calls = server.calls();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = tiled_pipeline(server, root.path())
        .with_cancellation(cancel)
        .terrain("elevation", None, None, false);

    assert!(matches!(result, Err(DemError::Cancelled)));
    assert_eq!(call_count(&calls), 0);
    assert_eq!(count_entries(root.path()), 0);
}

#[test]
fn test_clip_output_registered_to_target() {
    init_logging();
    let root = TempDir::new().unwrap();
    let kept = TempDir::new().unwrap();
    let origin = target().transform;

    // box covering target columns 30..70 and rows 20..60
    let (west, north) = origin.pixel_to_world(30.0, 20.0);
    let (east, south) = origin.pixel_to_world(70.0, 60.0);
    let inner = MultiPolygon(vec![polygon![
        (x: west, y: south),
        (x: east, y: south),
        (x: east, y: north),
        (x: west, y: north),
        (x: west, y: south),
    ]]);

    let raster = tiled_pipeline(full_server(), root.path())
        .with_clip(inner)
        .with_config(PipelineConfig {
            workspace_root: Some(root.path().to_path_buf()),
            intermediates_dir: Some(kept.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap()
        .terrain("elevation", None, None, false)
        .unwrap()
        .unwrap();

    let TerrainRaster::Elevation(data) = raster else {
        panic!("expected an elevation raster");
    };
    assert_eq!(data.dim(), (1, TARGET_SIZE, TARGET_SIZE));

    // inside the box, away from its edge pixels
    for row in 23..57 {
        for col in 33..67 {
            assert_elevation_at(&data, row, col);
        }
    }
    // outside the box
    for (row, col) in [(0, 0), (10, 50), (40, 20), (40, 80), (70, 50), (99, 99)] {
        assert_eq!(data[[0, row, col]], 0.0, "pixel ({}, {}) should be blank", row, col);
    }

    for name in ["tiled_reproj.tif", "masked_dem.tif", "resample.tif"] {
        assert!(kept.path().join(name).exists(), "missing intermediate {}", name);
    }
    assert_eq!(count_entries(root.path()), 0);
}

#[test]
fn test_subset_source_pipeline() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gridded.tif");
    let bbox = corner_bbox();

    // 1/24 degree geographic grid, the layout of gridded climate elevation
    let res = 1.0 / 24.0;
    let origin = GeoTransform::north_up(bbox.west - 1.0, bbox.north + 1.0, res, -res);
    let data = ndarray::Array2::from_shape_fn((60, 60), |(r, c)| 1000.0 + (r + c) as f32);
    RasterIo::write_grid(&opendem::RasterGrid::new(data, origin, Crs::wgs84()), &path).unwrap();

    let target = TargetProfile::new(
        Crs::wgs84(),
        GeoTransform::north_up(bbox.west, bbox.north, 0.01, -0.01),
        20,
        20,
    );
    let raster = DemPipeline::new(SubsetSource::new(path.to_string_lossy()), target, bbox)
        .unwrap()
        .terrain("elevation", None, None, false)
        .unwrap()
        .unwrap();

    assert_eq!(raster.shape(), &[1, 20, 20]);
    assert!(raster.view().iter().all(|&v| v >= 1000.0 && v < 1120.0));
}
