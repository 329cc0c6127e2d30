use crate::error::TransformError;
use crate::raster::Gcp;
use crate::transform::linalg;

/// A 2D affine transform representing a geotransform.
///
/// Maps pixel coordinates (col, row) to projected coordinates (x, y):
///   x = a * col + b * row + c
///   y = d * col + e * row + f
///
/// In GDAL convention: [c, a, b, f, d, e]
/// We store as: [a, b, c, d, e, f]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

/// Maximum GCP residual (in pixels) accepted by an exact [`Affine::from_gcps`] fit.
const GCP_EXACT_TOLERANCE_PX: f64 = 0.25;

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// The identity mapping, used for rasters without georeferencing.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// Create from a GDAL-style geotransform array [c, a, b, f, d, e].
    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self {
            a: gt[1],
            b: gt[2],
            c: gt[0],
            d: gt[4],
            e: gt[5],
            f: gt[3],
        }
    }

    /// Convert to GDAL-style geotransform array [c, a, b, f, d, e].
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// No rotation terms.
    pub fn is_axis_aligned(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// Apply the forward transform: (col, row) -> (x, y).
    pub fn forward(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }

    /// Georeferenced (x, y) -> fractional (col, row).
    pub fn to_pixel_line(&self, x: f64, y: f64) -> Result<(f64, f64), TransformError> {
        Ok(self.inverse()?.forward(x, y))
    }

    /// Compute the inverse affine transform.
    pub fn inverse(&self) -> Result<Affine, TransformError> {
        let det = self.a * self.e - self.b * self.d;
        if det.abs() < f64::EPSILON {
            return Err(TransformError::SingularTransform);
        }
        let inv_det = 1.0 / det;
        Ok(Affine {
            a: self.e * inv_det,
            b: -self.b * inv_det,
            c: (self.b * self.f - self.e * self.c) * inv_det,
            d: -self.d * inv_det,
            e: self.a * inv_det,
            f: (self.d * self.c - self.a * self.f) * inv_det,
        })
    }

    /// Translate the origin to pixel (col, row), keeping scale and rotation.
    pub fn shifted(&self, col: f64, row: f64) -> Affine {
        let (c, f) = self.forward(col, row);
        Affine { c, f, ..*self }
    }

    /// Fit a geotransform to ground control points by first order least squares.
    ///
    /// With `approx_ok == false` the fit is rejected when any GCP lands more than
    /// a quarter pixel away from its georeferenced position.
    pub fn from_gcps(gcps: &[Gcp], approx_ok: bool) -> Result<Affine, TransformError> {
        if gcps.len() < 3 {
            return Err(TransformError::InsufficientControlPoints {
                order: 1,
                required: 3,
                found: gcps.len(),
            });
        }

        let pixels: Vec<(f64, f64)> = gcps.iter().map(|g| (g.pixel, g.line)).collect();
        let xs: Vec<f64> = gcps.iter().map(|g| g.x).collect();
        let ys: Vec<f64> = gcps.iter().map(|g| g.y).collect();

        let cx = linalg::fit_polynomial(&pixels, &xs, 1)?;
        let cy = linalg::fit_polynomial(&pixels, &ys, 1)?;

        // fit_polynomial terms are [1, u, v] in normalized space; expand back.
        let affine_x = cx.to_affine_row();
        let affine_y = cy.to_affine_row();
        let gt = Affine::new(
            affine_x.1, affine_x.2, affine_x.0, affine_y.1, affine_y.2, affine_y.0,
        );

        if !approx_ok {
            let pixel_size = (gt.a.abs() + gt.b.abs()).max(gt.d.abs() + gt.e.abs());
            for g in gcps {
                let (x, y) = gt.forward(g.pixel, g.line);
                let err = ((x - g.x).abs()).max((y - g.y).abs());
                if err > GCP_EXACT_TOLERANCE_PX * pixel_size {
                    return Err(TransformError::DegenerateControlPoints(format!(
                        "GCP ({}, {}) deviates {err:.6} from an affine fit",
                        g.pixel, g.line
                    )));
                }
            }
        }

        Ok(gt)
    }
}
