//! Python bindings, built with the `python` feature

use crate::core::pipeline::{DemPipeline, PipelineConfig};
use crate::core::tile_index;
use crate::types::{BoundingBox, DemError, TargetProfile};
use numpy::ToPyArray;
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::path::PathBuf;

fn to_py_err(err: DemError) -> PyErr {
    match err {
        DemError::InvalidAttribute(_)
        | DemError::InvalidProfile(_)
        | DemError::InvalidConfig(_)
        | DemError::UnsupportedExtent(_) => PyValueError::new_err(err.to_string()),
        DemError::TileFetch { .. } | DemError::Io(_) | DemError::Gdal(_) => {
            PyIOError::new_err(err.to_string())
        }
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

/// Elevation, slope or aspect on the grid described by `profile_json`.
///
/// Returns a numpy array, or `None` when the product was only written to
/// `out_file`.
#[pyfunction]
#[pyo3(signature = (
    profile_json,
    north,
    south,
    east,
    west,
    attribute = "elevation",
    mode = None,
    out_file = None,
    save_and_return = false,
    zoom = 10,
    workspace_root = None,
))]
#[allow(clippy::too_many_arguments)]
fn terrain(
    py: Python,
    profile_json: &str,
    north: f64,
    south: f64,
    east: f64,
    west: f64,
    attribute: &str,
    mode: Option<&str>,
    out_file: Option<PathBuf>,
    save_and_return: bool,
    zoom: u8,
    workspace_root: Option<PathBuf>,
) -> PyResult<Option<PyObject>> {
    let profile = TargetProfile::from_json(profile_json).map_err(to_py_err)?;
    let bbox = BoundingBox::new(north, south, east, west).map_err(to_py_err)?;
    let pipeline = DemPipeline::aws(zoom, profile, bbox)
        .map_err(to_py_err)?
        .with_config(PipelineConfig {
            workspace_root,
            ..Default::default()
        })
        .map_err(to_py_err)?;

    let raster = py
        .allow_threads(|| pipeline.terrain(attribute, mode, out_file.as_deref(), save_and_return))
        .map_err(to_py_err)?;

    Ok(raster.map(|r| r.view().to_pyarray(py).into()))
}

/// Tile `(z, x, y)` containing a point
#[pyfunction]
fn mercator_tile(lat: f64, lon: f64, zoom: u8) -> (u8, u32, u32) {
    let coord = tile_index::mercator_tile(lat, lon, zoom);
    (coord.z, coord.x, coord.y)
}

/// Tiles covering a bounding box, row-major from the north-west corner
#[pyfunction]
fn find_tiles(north: f64, south: f64, east: f64, west: f64, zoom: u8) -> PyResult<Vec<(u8, u32, u32)>> {
    let bbox = BoundingBox::new(north, south, east, west).map_err(to_py_err)?;
    Ok(tile_index::find_tiles(&bbox, zoom)
        .into_iter()
        .map(|c| (c.z, c.x, c.y))
        .collect())
}

#[pymodule]
fn opendem(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(terrain, m)?)?;
    m.add_function(wrap_pyfunction!(mercator_tile, m)?)?;
    m.add_function(wrap_pyfunction!(find_tiles, m)?)?;
    Ok(())
}
