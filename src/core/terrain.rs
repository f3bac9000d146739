//! Slope and aspect derived from an elevation surface.

use crate::types::{DemResult, SlopeUnits, TerrainAttribute};
use ndarray::{Array2, Array3, ArrayD, ArrayView2, ArrayViewD, Axis};
use std::f64::consts::PI;

/// Terrain derivative parameters
#[derive(Debug, Clone)]
pub struct TerrainParams {
    /// Standard deviation (pixels) of the Gaussian used for slope
    pub gaussian_sigma: f64,
    /// Kernel half-width in standard deviations
    pub truncate: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            gaussian_sigma: 5.0,
            truncate: 4.0,
        }
    }
}

/// Product of a terrain run.
///
/// Elevation and slope keep a leading band axis, `(1, height, width)`;
/// aspect is a plain `(height, width)` plane.
#[derive(Debug, Clone, PartialEq)]
pub enum TerrainRaster {
    Elevation(Array3<f32>),
    Slope(Array3<f32>),
    Aspect(Array2<f32>),
}

impl TerrainRaster {
    pub fn attribute(&self) -> TerrainAttribute {
        match self {
            TerrainRaster::Elevation(_) => TerrainAttribute::Elevation,
            TerrainRaster::Slope(_) => TerrainAttribute::Slope,
            TerrainRaster::Aspect(_) => TerrainAttribute::Aspect,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            TerrainRaster::Elevation(a) | TerrainRaster::Slope(a) => a.shape(),
            TerrainRaster::Aspect(a) => a.shape(),
        }
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        match self {
            TerrainRaster::Elevation(a) | TerrainRaster::Slope(a) => a.view().into_dyn(),
            TerrainRaster::Aspect(a) => a.view().into_dyn(),
        }
    }

    pub fn into_dyn(self) -> ArrayD<f32> {
        match self {
            TerrainRaster::Elevation(a) | TerrainRaster::Slope(a) => a.into_dyn(),
            TerrainRaster::Aspect(a) => a.into_dyn(),
        }
    }
}

/// Slope and aspect from an elevation surface
pub struct TerrainAnalyzer {
    params: TerrainParams,
}

impl TerrainAnalyzer {
    pub fn new() -> Self {
        Self {
            params: TerrainParams::default(),
        }
    }

    pub fn with_params(params: TerrainParams) -> Self {
        Self { params }
    }

    /// Derive `attribute` from `elevation`; `units` only affects slope
    pub fn derive(
        &self,
        elevation: &Array2<f32>,
        attribute: TerrainAttribute,
        units: SlopeUnits,
    ) -> DemResult<TerrainRaster> {
        log::info!("Deriving {} from {:?} elevation grid", attribute, elevation.dim());
        let raster = match attribute {
            TerrainAttribute::Elevation => {
                TerrainRaster::Elevation(elevation.clone().insert_axis(Axis(0)))
            }
            TerrainAttribute::Slope => {
                TerrainRaster::Slope(self.slope(elevation, units).insert_axis(Axis(0)))
            }
            TerrainAttribute::Aspect => TerrainRaster::Aspect(self.aspect(elevation)),
        };
        log_stats(attribute, raster.view());
        Ok(raster)
    }

    /// Gaussian-smoothed gradient magnitude, converted to `units`.
    ///
    /// The raw magnitude is taken as percent; `Fraction` divides it by 100 and
    /// `Degrees` is `atan(value / 100)` in degrees.
    pub fn slope(&self, elevation: &Array2<f32>, units: SlopeUnits) -> Array2<f32> {
        let magnitude = self.gaussian_gradient_magnitude(elevation.view());
        magnitude.mapv(|v| match units {
            SlopeUnits::Percent => v as f32,
            SlopeUnits::Fraction => (v / 100.0) as f32,
            SlopeUnits::Degrees => (v / 100.0).atan().to_degrees() as f32,
        })
    }

    /// Direction of the raw gradient in radians, `atan2(d/dcol, -d/drow)`,
    /// wrapped into `[0, 2π)`.
    pub fn aspect(&self, elevation: &Array2<f32>) -> Array2<f32> {
        let d_row = central_gradient(elevation.view(), Axis(0));
        let d_col = central_gradient(elevation.view(), Axis(1));
        let mut aspect = Array2::zeros(elevation.dim());
        ndarray::Zip::from(&mut aspect)
            .and(&d_row)
            .and(&d_col)
            .for_each(|a, &dx, &dy| *a = wrap_angle(dy.atan2(-dx)));
        aspect
    }

    fn gaussian_gradient_magnitude(&self, data: ArrayView2<'_, f32>) -> Array2<f64> {
        let sigma = self.params.gaussian_sigma;
        let radius = (self.params.truncate * sigma + 0.5) as usize;
        let smooth = gaussian_kernel(sigma, radius, false);
        let derivative = gaussian_kernel(sigma, radius, true);
        log::debug!("Gaussian gradient with sigma {} and radius {}", sigma, radius);

        let data = data.mapv(f64::from);
        let d_row = correlate_axis(&correlate_axis(&data, &derivative, Axis(0)), &smooth, Axis(1));
        let d_col = correlate_axis(&correlate_axis(&data, &smooth, Axis(0)), &derivative, Axis(1));

        let mut magnitude = d_row;
        ndarray::Zip::from(&mut magnitude)
            .and(&d_col)
            .for_each(|m, &c| *m = m.hypot(c));
        magnitude
    }
}

impl Default for TerrainAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sampled Gaussian (normalized to unit sum) or its first derivative,
/// as correlation weights indexed from `-radius` to `radius`.
fn gaussian_kernel(sigma: f64, radius: usize, derivative: bool) -> Vec<f64> {
    let r = radius as isize;
    let sigma2 = sigma * sigma;
    let phi: Vec<f64> = (-r..=r)
        .map(|x| (-0.5 * (x * x) as f64 / sigma2).exp())
        .collect();
    let sum: f64 = phi.iter().sum();

    (-r..=r)
        .zip(phi)
        .map(|(x, p)| {
            let p = p / sum;
            if derivative {
                x as f64 / sigma2 * p
            } else {
                p
            }
        })
        .collect()
}

/// 1-D correlation along `axis` with nearest-edge replication
fn correlate_axis(data: &Array2<f64>, weights: &[f64], axis: Axis) -> Array2<f64> {
    let radius = (weights.len() / 2) as isize;
    let mut out = Array2::zeros(data.dim());
    for (src, mut dst) in data.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let n = src.len() as isize;
        for i in 0..n {
            let mut acc = 0.0;
            for (k, w) in weights.iter().enumerate() {
                let j = (i + k as isize - radius).clamp(0, n - 1);
                acc += w * src[j as usize];
            }
            dst[i as usize] = acc;
        }
    }
    out
}

/// Finite differences along `axis`: central inside, one-sided at the edges
fn central_gradient(data: ArrayView2<'_, f32>, axis: Axis) -> Array2<f64> {
    let mut out = Array2::zeros(data.dim());
    for (src, mut dst) in data.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let n = src.len();
        if n < 2 {
            continue;
        }
        dst[0] = src[1] as f64 - src[0] as f64;
        dst[n - 1] = src[n - 1] as f64 - src[n - 2] as f64;
        for i in 1..n - 1 {
            dst[i] = (src[i + 1] as f64 - src[i - 1] as f64) / 2.0;
        }
    }
    out
}

fn wrap_angle(angle: f64) -> f32 {
    let wrapped = (if angle < 0.0 { angle + 2.0 * PI } else { angle }) as f32;
    // rounding to f32 can land exactly on 2π
    if wrapped >= std::f32::consts::TAU {
        0.0
    } else {
        wrapped
    }
}

fn log_stats(attribute: TerrainAttribute, values: ArrayViewD<'_, f32>) {
    if values.is_empty() {
        return;
    }
    let (min, max, sum) = values.iter().fold(
        (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
        |(lo, hi, s), &v| (lo.min(v), hi.max(v), s + v as f64),
    );
    log::debug!(
        "{} stats: min {:.4}, max {:.4}, mean {:.4}",
        attribute,
        min,
        max,
        sum / values.len() as f64
    );
}
