//! Raster resampling and reprojection engine.
//!
//! Sources are mapped onto a destination grid through a
//! [`transform::SpatialTransformer`], sampled with a [`resample`] kernel,
//! optionally masked by a [`cutline`], and written block by block by
//! [`warp::WarpOperation`].

pub mod affine;
pub mod chunk;
pub mod cutline;
pub mod error;
pub mod proj;
pub mod raster;
pub mod resample;
pub mod store;
pub mod transform;
pub mod vector;
pub mod warp;

#[cfg(feature = "python")]
mod py;

pub use error::WarpError;
pub use raster::{Band, DataType, Raster};
pub use warp::{warp, WarpOperation, WarpOptions};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python extension module.
#[cfg(feature = "python")]
#[pymodule]
fn _rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    py::register(m)?;
    Ok(())
}
