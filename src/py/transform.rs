//! PyO3 binding for batch CRS coordinate transformation.

use numpy::{PyArray1, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::proj::pipeline::Pipeline;

/// Transform arrays of coordinates from one CRS to another.
///
/// Points that cannot be transformed come back as NaN.
///
/// Args:
///     x: 1D array of x coordinates (longitude or easting).
///     y: 1D array of y coordinates (latitude or northing).
///     src_crs: Source CRS string (e.g. "EPSG:4326").
///     dst_crs: Destination CRS string (e.g. "EPSG:32633").
///
/// Returns:
///     Tuple of (x_out, y_out) arrays in the destination CRS.
#[pyfunction]
#[pyo3(signature = (x, y, src_crs, dst_crs))]
#[allow(clippy::type_complexity)]
pub fn transform_points<'py>(
    py: Python<'py>,
    x: PyReadonlyArray1<'py, f64>,
    y: PyReadonlyArray1<'py, f64>,
    src_crs: &str,
    dst_crs: &str,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray1<f64>>)> {
    let x_view = x.as_array();
    let y_view = y.as_array();
    if x_view.len() != y_view.len() {
        return Err(PyValueError::new_err(format!(
            "x and y must have same length, got {} and {}",
            x_view.len(),
            y_view.len()
        )));
    }

    let coords: Vec<(f64, f64)> = x_view.iter().copied().zip(y_view.iter().copied()).collect();
    let pipeline = Pipeline::new(Some(src_crs), Some(dst_crs))
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let (xs, ys): (Vec<f64>, Vec<f64>) = py.allow_threads(move || {
        coords
            .into_iter()
            .map(|(x, y)| pipeline.transform_fwd(x, y).unwrap_or((f64::NAN, f64::NAN)))
            .unzip()
    });

    Ok((
        PyArray1::from_owned_array(py, ndarray::Array1::from(xs)),
        PyArray1::from_owned_array(py, ndarray::Array1::from(ys)),
    ))
}
