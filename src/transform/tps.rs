//! Thin plate spline georeferencing.
//!
//! Interpolates the control points exactly; the affine part of the spline
//! carries the global trend and the radial terms bend it through each GCP.

use ndarray::Array2;

use crate::error::TransformError;
use crate::raster::Gcp;
use crate::transform::linalg::{self, Normalization};

/// Radial basis U(r) = r² ln(r²), evaluated on the squared distance.
fn radial(r2: f64) -> f64 {
    if r2 <= 0.0 {
        0.0
    } else {
        r2 * r2.ln()
    }
}

/// A 2D → 2D spline through a set of centres.
#[derive(Clone, Debug)]
struct Spline {
    norm: Normalization,
    centers: Vec<(f64, f64)>,
    /// `n` radial weights followed by the affine terms [1, u, v]; one column per output.
    coeffs: Array2<f64>,
}

impl Spline {
    fn fit(inputs: &[(f64, f64)], outputs: &[(f64, f64)]) -> Result<Self, TransformError> {
        let n = inputs.len();
        let norm = Normalization::from_points(inputs);
        let centers: Vec<(f64, f64)> = inputs.iter().map(|&(u, v)| norm.apply(u, v)).collect();

        let size = n + 3;
        let mut a = Array2::zeros((size, size));
        let mut b = Array2::zeros((size, 2));
        for i in 0..n {
            let (ui, vi) = centers[i];
            for j in 0..n {
                let (uj, vj) = centers[j];
                let du = ui - uj;
                let dv = vi - vj;
                a[(i, j)] = radial(du * du + dv * dv);
            }
            a[(i, n)] = 1.0;
            a[(i, n + 1)] = ui;
            a[(i, n + 2)] = vi;
            a[(n, i)] = 1.0;
            a[(n + 1, i)] = ui;
            a[(n + 2, i)] = vi;
            b[(i, 0)] = outputs[i].0;
            b[(i, 1)] = outputs[i].1;
        }

        let coeffs = linalg::solve(a, b).ok_or_else(|| {
            TransformError::DegenerateControlPoints(
                "thin plate spline system is singular (duplicate or collinear GCPs?)".into(),
            )
        })?;

        Ok(Self {
            norm,
            centers,
            coeffs,
        })
    }

    fn eval(&self, u: f64, v: f64) -> (f64, f64) {
        let n = self.centers.len();
        let (nu, nv) = self.norm.apply(u, v);
        let mut x = self.coeffs[(n, 0)] + self.coeffs[(n + 1, 0)] * nu + self.coeffs[(n + 2, 0)] * nv;
        let mut y = self.coeffs[(n, 1)] + self.coeffs[(n + 1, 1)] * nu + self.coeffs[(n + 2, 1)] * nv;
        for (i, &(cu, cv)) in self.centers.iter().enumerate() {
            let du = nu - cu;
            let dv = nv - cv;
            let w = radial(du * du + dv * dv);
            x += w * self.coeffs[(i, 0)];
            y += w * self.coeffs[(i, 1)];
        }
        (x, y)
    }
}

/// Thin plate spline fitted in both directions.
#[derive(Clone, Debug)]
pub struct ThinPlateSpline {
    forward: Spline,
    inverse: Spline,
}

impl ThinPlateSpline {
    pub const MIN_GCPS: usize = 3;

    pub fn new(gcps: &[Gcp]) -> Result<Self, TransformError> {
        if gcps.len() < Self::MIN_GCPS {
            return Err(TransformError::InsufficientControlPoints {
                order: 0,
                required: Self::MIN_GCPS,
                found: gcps.len(),
            });
        }
        let pixels: Vec<(f64, f64)> = gcps.iter().map(|g| (g.pixel, g.line)).collect();
        let geos: Vec<(f64, f64)> = gcps.iter().map(|g| (g.x, g.y)).collect();
        Ok(Self {
            forward: Spline::fit(&pixels, &geos)?,
            inverse: Spline::fit(&geos, &pixels)?,
        })
    }

    pub fn pixel_to_geo(&self, px: f64, ln: f64) -> (f64, f64) {
        self.forward.eval(px, ln)
    }

    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        self.inverse.eval(x, y)
    }
}
