use pyo3::prelude::*;

mod reproject;
mod transform;

/// Register all Python-visible functions.
pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(reproject::warp_array, m)?)?;
    m.add_function(wrap_pyfunction!(transform::transform_points, m)?)?;
    Ok(())
}
