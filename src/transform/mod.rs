//! Spatial transformer: maps destination pixel/line coordinates to source
//! pixel/line coordinates and back.
//!
//! The chain is destination geotransform → CRS pipeline → source
//! georeferencing, where the source side is one of an affine geotransform,
//! a GCP polynomial, a GCP thin plate spline or geolocation arrays.

pub mod approx;
pub mod gcp;
pub mod geoloc;
pub mod linalg;
pub mod tps;

use crate::affine::Affine;
use crate::error::TransformError;
use crate::proj::pipeline::Pipeline;
use crate::raster::Raster;

use gcp::PolynomialTransform;
use geoloc::GeolocationTransform;
use tps::ThinPlateSpline;

/// How the source raster is georeferenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformSpec {
    Affine,
    /// Polynomial fitted to GCPs; order 0 picks one from the GCP count.
    GcpPolynomial { order: u8 },
    GcpThinPlateSpline,
    GeolocationArray,
}

impl TransformSpec {
    /// Pick the georeferencing a raster carries: geotransform, then GCPs,
    /// then geolocation arrays.
    pub fn infer(raster: &Raster) -> Option<Self> {
        if raster.geotransform.is_some() {
            Some(TransformSpec::Affine)
        } else if !raster.gcps.is_empty() {
            Some(TransformSpec::GcpPolynomial { order: 0 })
        } else if raster.geolocation.is_some() {
            Some(TransformSpec::GeolocationArray)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Destination pixel/line to source pixel/line.
    DstToSrc,
    /// Source pixel/line to destination pixel/line.
    SrcToDst,
}

/// Source-side georeferencing: pixel/line ↔ source georeferenced coordinates.
#[derive(Clone, Debug)]
pub enum SourceGeoref {
    Affine { gt: Affine, inv: Affine },
    Polynomial(PolynomialTransform),
    ThinPlateSpline(ThinPlateSpline),
    Geolocation(GeolocationTransform),
}

impl SourceGeoref {
    pub fn build(raster: &Raster, spec: Option<TransformSpec>) -> Result<Self, TransformError> {
        let spec = match spec.or_else(|| TransformSpec::infer(raster)) {
            Some(spec) => spec,
            None => {
                log::warn!("source raster has no georeferencing, assuming identity geotransform");
                return Self::affine(Affine::identity());
            }
        };

        match spec {
            TransformSpec::Affine => match raster.geotransform {
                Some(gt) => Self::affine(gt),
                None if !raster.gcps.is_empty() => Self::affine(Affine::from_gcps(&raster.gcps, false)?),
                None => {
                    log::warn!("no geotransform on source raster, assuming identity");
                    Self::affine(Affine::identity())
                }
            },
            TransformSpec::GcpPolynomial { order } => {
                let poly = PolynomialTransform::new(&raster.gcps, order)?;
                log::debug!(
                    "fitted order {} polynomial to {} GCPs",
                    poly.order(),
                    raster.gcps.len()
                );
                Ok(SourceGeoref::Polynomial(poly))
            }
            TransformSpec::GcpThinPlateSpline => {
                Ok(SourceGeoref::ThinPlateSpline(ThinPlateSpline::new(&raster.gcps)?))
            }
            TransformSpec::GeolocationArray => {
                let arrays = raster
                    .geolocation
                    .clone()
                    .ok_or(TransformError::MissingGeolocation)?;
                Ok(SourceGeoref::Geolocation(GeolocationTransform::new(arrays)?))
            }
        }
    }

    fn affine(gt: Affine) -> Result<Self, TransformError> {
        let inv = gt.inverse()?;
        Ok(SourceGeoref::Affine { gt, inv })
    }

    pub fn pixel_to_geo(&self, px: f64, ln: f64) -> Option<(f64, f64)> {
        let out = match self {
            SourceGeoref::Affine { gt, .. } => gt.forward(px, ln),
            SourceGeoref::Polynomial(p) => p.pixel_to_geo(px, ln),
            SourceGeoref::ThinPlateSpline(t) => t.pixel_to_geo(px, ln),
            SourceGeoref::Geolocation(g) => g.pixel_to_geo(px, ln)?,
        };
        finite(out)
    }

    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let out = match self {
            SourceGeoref::Affine { inv, .. } => inv.forward(x, y),
            SourceGeoref::Polynomial(p) => p.geo_to_pixel(x, y),
            SourceGeoref::ThinPlateSpline(t) => t.geo_to_pixel(x, y),
            SourceGeoref::Geolocation(g) => g.geo_to_pixel(x, y)?,
        };
        finite(out)
    }
}

fn finite(p: (f64, f64)) -> Option<(f64, f64)> {
    (p.0.is_finite() && p.1.is_finite()).then_some(p)
}

/// Source SRS of a raster, falling back to the geolocation arrays' SRS.
pub fn source_srs(raster: &Raster) -> Option<&str> {
    raster
        .srs
        .as_deref()
        .or_else(|| raster.geolocation.as_ref().and_then(|g| g.srs.as_deref()))
}

/// Maps coordinates between a destination grid and one source raster.
pub struct SpatialTransformer {
    georef: SourceGeoref,
    pipeline: Pipeline,
    dst_gt: Affine,
    dst_inv: Affine,
}

impl SpatialTransformer {
    /// Build a transformer for `source` into `dst_srs`.
    ///
    /// The destination geotransform starts as the identity, so until
    /// [`set_destination_geotransform`](Self::set_destination_geotransform)
    /// is called the destination side speaks georeferenced coordinates.
    pub fn build(
        source: &Raster,
        spec: Option<TransformSpec>,
        src_srs: Option<&str>,
        dst_srs: Option<&str>,
    ) -> Result<Self, TransformError> {
        let georef = SourceGeoref::build(source, spec)?;
        let pipeline = Pipeline::new(src_srs.or_else(|| source_srs(source)), dst_srs)?;
        Ok(Self {
            georef,
            pipeline,
            dst_gt: Affine::identity(),
            dst_inv: Affine::identity(),
        })
    }

    pub fn set_destination_geotransform(&mut self, gt: Affine) -> Result<(), TransformError> {
        self.dst_inv = gt.inverse()?;
        self.dst_gt = gt;
        Ok(())
    }

    pub fn with_destination_geotransform(mut self, gt: Affine) -> Result<Self, TransformError> {
        self.set_destination_geotransform(gt)?;
        Ok(self)
    }

    pub fn georef(&self) -> &SourceGeoref {
        &self.georef
    }

    pub fn transform_point(&self, direction: Direction, x: f64, y: f64) -> Option<(f64, f64)> {
        match direction {
            Direction::DstToSrc => {
                let (gx, gy) = self.dst_gt.forward(x, y);
                let (sx, sy) = self.pipeline.transform_inv(gx, gy).ok()?;
                self.georef.geo_to_pixel(sx, sy)
            }
            Direction::SrcToDst => {
                let (sx, sy) = self.georef.pixel_to_geo(x, y)?;
                let (gx, gy) = self.pipeline.transform_fwd(sx, sy).ok()?;
                finite(self.dst_inv.forward(gx, gy))
            }
        }
    }

    /// Transform `points` in place. Points that fail keep their input value
    /// and are flagged `false` in the returned vector.
    pub fn transform_points(&self, direction: Direction, points: &mut [(f64, f64)]) -> Vec<bool> {
        points
            .iter_mut()
            .map(|p| match self.transform_point(direction, p.0, p.1) {
                Some(out) => {
                    *p = out;
                    true
                }
                None => false,
            })
            .collect()
    }
}
