//! CRS handling: identifier resolution and point reprojection through proj4rs.

pub mod crs;
pub mod pipeline;
