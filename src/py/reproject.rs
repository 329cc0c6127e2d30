//! PyO3 binding for warp_array.

use ndarray::Array2;
use numpy::{PyArray2, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::affine::Affine;
use crate::error::WarpError;
use crate::raster::{Band, DataType, Raster};
use crate::resample::ResamplingMethod;
use crate::warp::{InitDest, NoProgress, WarpOperation, WarpOptions};

fn to_py_err(e: WarpError) -> PyErr {
    match e {
        WarpError::Configuration(_) | WarpError::Geometry(_) => PyValueError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

/// Warp a single-band 2D f64 array onto a destination grid.
///
/// Args:
///     src: Input 2D array (f64).
///     src_crs: Source CRS string (e.g. "EPSG:32633" or PROJ string).
///     src_transform: Source affine as (a, b, c, d, e, f), i.e.
///         (pixel_width, rot_x, x_origin, rot_y, -pixel_height, y_origin).
///     dst_crs: Destination CRS string.
///     dst_transform: Destination affine, same convention.
///     dst_shape: Output shape as (rows, cols).
///     resampling: "nearest", "bilinear", "cubic", "cubicspline", "lanczos" or "average".
///     nodata: Optional nodata value, used for both source and destination.
///     error_threshold: Transform approximation tolerance in pixels, 0 for exact.
///     num_threads: Worker count, all CPUs when omitted.
///
/// Returns:
///     Warped 2D array (f64). Uncovered pixels hold nodata, or NaN without it.
#[pyfunction]
#[pyo3(signature = (src, src_crs, src_transform, dst_crs, dst_transform, dst_shape, resampling="nearest", nodata=None, error_threshold=0.125, num_threads=None))]
#[allow(clippy::too_many_arguments)]
pub fn warp_array<'py>(
    py: Python<'py>,
    src: PyReadonlyArray2<'py, f64>,
    src_crs: &str,
    src_transform: [f64; 6],
    dst_crs: &str,
    dst_transform: [f64; 6],
    dst_shape: (usize, usize),
    resampling: &str,
    nodata: Option<f64>,
    error_threshold: f64,
    num_threads: Option<usize>,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let method = ResamplingMethod::from_name(resampling)
        .ok_or_else(|| PyValueError::new_err(format!("Unknown resampling method: {resampling}")))?;

    let mut band = Band::from_array(src.as_array().to_owned(), DataType::Float64);
    band.nodata = nodata;
    let [a, b, c, d, e, f] = src_transform;
    let source = Raster::from_bands(vec![band])
        .map_err(to_py_err)?
        .with_geotransform(Affine::new(a, b, c, d, e, f))
        .with_srs(src_crs);

    let [a, b, c, d, e, f] = dst_transform;
    let (rows, cols) = dst_shape;
    let mut dst = Raster::new(cols, rows, 1, DataType::Float64)
        .map_err(to_py_err)?
        .with_geotransform(Affine::new(a, b, c, d, e, f))
        .with_srs(dst_crs);
    if let Some(band) = dst.band_mut(1) {
        band.nodata = nodata;
    }

    let mut options = WarpOptions {
        resampling: method,
        dst_srs: Some(dst_crs.to_string()),
        error_threshold,
        init_dest: Some(InitDest::Value(nodata.unwrap_or(f64::NAN))),
        ..Default::default()
    };
    if let Some(n) = num_threads {
        options.workers = n;
    }

    let result: Array2<f64> = py.allow_threads(move || -> Result<Array2<f64>, WarpError> {
        let sources = [source];
        let mut op = WarpOperation::new(&sources, options)?;
        op.execute(&mut dst, &mut NoProgress)?;
        Ok(dst.bands.swap_remove(0).data)
    })
    .map_err(to_py_err)?;

    Ok(PyArray2::from_owned_array(py, result))
}
