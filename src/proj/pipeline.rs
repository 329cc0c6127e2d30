//! CRS-to-CRS leg of a spatial transformer.
//!
//! Identical (or unspecified) references short-circuit to an identity pass,
//! everything else is delegated to proj4rs.

use crate::error::ProjError;
use crate::proj::crs::{self, CrsTransform};

/// Resolves spatial reference identifiers and relates pairs of them.
pub struct SrsCatalog;

impl SrsCatalog {
    /// Canonical spelling of an identifier: trimmed, authority upper-cased.
    pub fn normalize(id: &str) -> String {
        let id = id.trim();
        match id.split_once(':') {
            Some((auth, code)) if !auth.starts_with('+') => {
                format!("{}:{}", auth.to_uppercase(), code.trim())
            }
            _ => id.to_string(),
        }
    }

    /// Both identifiers name the same reference.
    pub fn same(a: &str, b: &str) -> bool {
        Self::normalize(a) == Self::normalize(b)
    }

    /// Check that an identifier resolves to a known reference.
    pub fn resolve(id: &str) -> Result<String, ProjError> {
        crs::resolve(id)?;
        Ok(Self::normalize(id))
    }

    /// True when points can be carried from `a` to `b`.
    pub fn is_transformable(a: &str, b: &str) -> bool {
        Self::same(a, b) || (crs::resolve(a).is_ok() && crs::resolve(b).is_ok())
    }
}

/// A CRS-to-CRS transform pipeline.
pub enum Pipeline {
    /// Source and destination share a reference (or one side is unspecified).
    Identity,
    /// Full reprojection through proj4rs.
    Proj4rs(Box<CrsTransform>),
}

impl Pipeline {
    /// Create a Pipeline from source and destination CRS strings.
    ///
    /// A missing reference on either side means "same as the other side".
    pub fn new(src_crs: Option<&str>, dst_crs: Option<&str>) -> Result<Self, ProjError> {
        match (src_crs, dst_crs) {
            (Some(src), Some(dst)) if !SrsCatalog::same(src, dst) => {
                let ct = CrsTransform::new(src, dst)?;
                Ok(Pipeline::Proj4rs(Box::new(ct)))
            }
            _ => Ok(Pipeline::Identity),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Pipeline::Identity)
    }

    /// Transform a single point from destination CRS to source CRS.
    ///
    /// This is the direction the warp engine needs: given an output pixel
    /// coordinate in dst CRS, find the corresponding source CRS coordinate.
    pub fn transform_inv(&self, x: f64, y: f64) -> Result<(f64, f64), ProjError> {
        match self {
            Pipeline::Identity => Ok((x, y)),
            Pipeline::Proj4rs(ct) => ct.transform_inv(x, y),
        }
    }

    /// Transform a single point from source CRS to destination CRS.
    pub fn transform_fwd(&self, x: f64, y: f64) -> Result<(f64, f64), ProjError> {
        match self {
            Pipeline::Identity => Ok((x, y)),
            Pipeline::Proj4rs(ct) => ct.transform_fwd(x, y),
        }
    }
}
