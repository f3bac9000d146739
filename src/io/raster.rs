//! GeoTIFF reading and writing through GDAL.

use crate::types::{Crs, DemError, DemResult, GeoTransform, RasterGrid, TargetProfile};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use ndarray::{Array2, Array3, ArrayView2, ArrayViewD, Ix2, Ix3};
use std::path::Path;

/// Raster file codec for single-band elevation grids
pub struct RasterIo;

impl RasterIo {
    /// Read band 1 of a georeferenced raster as `f32`
    pub fn read_grid<P: AsRef<Path>>(path: P) -> DemResult<RasterGrid> {
        log::debug!("Reading raster {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let (width, height) = dataset.raster_size();
        let crs = Self::dataset_crs(&dataset, path.as_ref())?;

        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value().map(|v| v as f32);
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| DemError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        Ok(RasterGrid::new(data, transform, crs).with_nodata(nodata))
    }

    pub fn read_crs<P: AsRef<Path>>(path: P) -> DemResult<Crs> {
        let dataset = Dataset::open(path.as_ref())?;
        Self::dataset_crs(&dataset, path.as_ref())
    }

    /// Read the part of band 1 overlapping `bounds` (`[left, bottom, right, top]`
    /// in the dataset's own CRS), snapped outward to whole pixels.
    pub fn read_window<P: AsRef<Path>>(path: P, bounds: [f64; 4]) -> DemResult<RasterGrid> {
        let dataset = Dataset::open(path.as_ref())?;
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let (width, height) = dataset.raster_size();
        let crs = Self::dataset_crs(&dataset, path.as_ref())?;

        let window = transform.window(bounds, width, height).ok_or_else(|| {
            log::warn!(
                "Requested bounds {:?} do not overlap {}",
                bounds,
                path.as_ref().display()
            );
            DemError::EmptyMosaic
        })?;
        let window_size = (window.width, window.height);
        log::debug!(
            "Reading window {:?} from {}",
            window,
            path.as_ref().display()
        );

        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value().map(|v| v as f32);
        let band_data = rasterband.read_as::<f32>(
            (window.col_off as isize, window.row_off as isize),
            window_size,
            window_size,
            None,
        )?;
        let data = Array2::from_shape_vec((window.height, window.width), band_data.data)
            .map_err(|e| DemError::Processing(format!("Failed to reshape raster window: {}", e)))?;

        let window_transform = transform.translated(window.col_off as f64, window.row_off as f64);
        Ok(RasterGrid::new(data, window_transform, crs).with_nodata(nodata))
    }

    /// Write a grid as a single-band Float32 GeoTIFF
    pub fn write_grid<P: AsRef<Path>>(grid: &RasterGrid, path: P) -> DemResult<()> {
        Self::write_band(
            grid.data().view(),
            grid.transform(),
            grid.crs(),
            grid.nodata().map(f64::from),
            path,
        )
    }

    /// Persist an array with the geometry of `profile`.
    ///
    /// `array` may be `(height, width)` or `(1, height, width)`; it is written
    /// as one band shaped `(1, height, width)`. `crs` overrides the profile's
    /// CRS with an EPSG-style definition such as `epsg:4326`. Returns the
    /// reshaped array when `return_array` is set.
    pub fn save<P: AsRef<Path>>(
        array: ArrayViewD<'_, f32>,
        profile: &TargetProfile,
        output_path: P,
        crs: Option<&str>,
        return_array: bool,
    ) -> DemResult<Option<Array3<f32>>> {
        let banded: Array3<f32> = match array.ndim() {
            2 => array
                .into_dimensionality::<Ix2>()
                .map_err(|e| DemError::Processing(e.to_string()))?
                .to_owned()
                .insert_axis(ndarray::Axis(0)),
            3 => {
                let cube = array
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| DemError::Processing(e.to_string()))?;
                if cube.shape()[0] != 1 {
                    return Err(DemError::Processing(format!(
                        "Only single-band arrays can be saved, got {} bands",
                        cube.shape()[0]
                    )));
                }
                cube.to_owned()
            }
            n => {
                return Err(DemError::Processing(format!(
                    "Cannot save a {}-dimensional array as a raster",
                    n
                )))
            }
        };

        let (_, height, width) = banded.dim();
        if (width, height) != (profile.width, profile.height) {
            return Err(DemError::Processing(format!(
                "Array shape {}x{} does not match profile shape {}x{}",
                width, height, profile.width, profile.height
            )));
        }

        let crs = match crs {
            Some(definition) => Crs::new(definition),
            None => profile.crs.clone(),
        };
        Self::write_band(
            banded.index_axis(ndarray::Axis(0), 0),
            &profile.transform,
            &crs,
            profile.nodata,
            output_path,
        )?;

        Ok(if return_array { Some(banded) } else { None })
    }

    fn write_band<P: AsRef<Path>>(
        data: ArrayView2<'_, f32>,
        transform: &GeoTransform,
        crs: &Crs,
        nodata: Option<f64>,
        output_path: P,
    ) -> DemResult<()> {
        log::info!("Saving raster as GeoTIFF: {}", output_path.as_ref().display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = data.dim();

        let mut dataset = driver.create_with_band_type::<f32, _>(
            output_path.as_ref(),
            width as isize,
            height as isize,
            1,
        )?;

        dataset.set_geo_transform(&transform.to_gdal())?;
        dataset.set_spatial_ref(&crs.to_spatial_ref()?)?;

        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<f32> = data.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        if let Some(value) = nodata {
            rasterband.set_no_data_value(Some(value))?;
        }

        Ok(())
    }

    fn dataset_crs(dataset: &Dataset, path: &Path) -> DemResult<Crs> {
        let wkt = dataset.projection();
        if wkt.trim().is_empty() {
            return Err(DemError::Processing(format!(
                "{} carries no coordinate reference system",
                path.display()
            )));
        }
        Ok(Crs::new(wkt))
    }
}
