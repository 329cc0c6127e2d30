//! Small dense solvers for control point fitting.
//!
//! Systems here are tiny (at most a few hundred unknowns for thin plate
//! splines), so plain Gaussian elimination with partial pivoting is enough.

use ndarray::{Array1, Array2};

use crate::error::TransformError;

/// Solve `a · x = b` for every column of `b`.
///
/// Returns `None` when the matrix is numerically singular.
pub fn solve(mut a: Array2<f64>, mut b: Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.nrows() != n {
        return None;
    }
    let rhs = b.ncols();

    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if scale == 0.0 {
        return None;
    }
    let tiny = scale * 1e-13;

    for col in 0..n {
        // Find pivot
        let mut pivot = col;
        for row in col + 1..n {
            if a[(row, col)].abs() > a[(pivot, col)].abs() {
                pivot = row;
            }
        }
        if a[(pivot, col)].abs() <= tiny {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap((pivot, k), (col, k));
            }
            for k in 0..rhs {
                b.swap((pivot, k), (col, k));
            }
        }

        let diag = a[(col, col)];
        for row in col + 1..n {
            let factor = a[(row, col)] / diag;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[(row, k)] -= factor * a[(col, k)];
            }
            for k in 0..rhs {
                b[(row, k)] -= factor * b[(col, k)];
            }
        }
    }

    let mut x = Array2::zeros((n, rhs));
    for k in 0..rhs {
        for row in (0..n).rev() {
            let mut acc = b[(row, k)];
            for j in row + 1..n {
                acc -= a[(row, j)] * x[(j, k)];
            }
            x[(row, k)] = acc / a[(row, row)];
        }
    }
    Some(x)
}

/// Centre and scale applied to input coordinates before fitting.
///
/// Keeps the normal equations well conditioned when control points carry
/// large projected coordinates (hundreds of kilometres).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normalization {
    pub cu: f64,
    pub cv: f64,
    pub scale: f64,
}

impl Normalization {
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        let n = points.len().max(1) as f64;
        let cu = points.iter().map(|p| p.0).sum::<f64>() / n;
        let cv = points.iter().map(|p| p.1).sum::<f64>() / n;
        let spread = points
            .iter()
            .map(|p| (p.0 - cu).abs().max((p.1 - cv).abs()))
            .fold(0.0_f64, f64::max);
        Self {
            cu,
            cv,
            scale: if spread > 0.0 { spread } else { 1.0 },
        }
    }

    pub fn apply(&self, u: f64, v: f64) -> (f64, f64) {
        ((u - self.cu) / self.scale, (v - self.cv) / self.scale)
    }
}

/// Number of polynomial terms for a given order (1, 2 or 3).
pub fn term_count(order: u8) -> usize {
    let o = order as usize;
    (o + 1) * (o + 2) / 2
}

/// Monomials in the order [1, u, v, u², uv, v², u³, u²v, uv², v³].
fn terms(order: u8, u: f64, v: f64, out: &mut [f64]) {
    out[0] = 1.0;
    out[1] = u;
    out[2] = v;
    if order >= 2 {
        out[3] = u * u;
        out[4] = u * v;
        out[5] = v * v;
    }
    if order >= 3 {
        out[6] = u * u * u;
        out[7] = u * u * v;
        out[8] = u * v * v;
        out[9] = v * v * v;
    }
}

/// A bivariate polynomial fitted over normalized input coordinates.
#[derive(Clone, Debug)]
pub struct Polynomial {
    pub order: u8,
    pub norm: Normalization,
    pub coeffs: Array1<f64>,
}

impl Polynomial {
    pub fn eval(&self, u: f64, v: f64) -> f64 {
        let (nu, nv) = self.norm.apply(u, v);
        let mut t = [0.0_f64; 10];
        terms(self.order, nu, nv, &mut t);
        self.coeffs
            .iter()
            .zip(t.iter())
            .map(|(c, t)| c * t)
            .sum()
    }

    /// First order coefficients expanded to raw input space: (constant, du, dv).
    pub fn to_affine_row(&self) -> (f64, f64, f64) {
        let s = self.norm.scale;
        let du = self.coeffs[1] / s;
        let dv = self.coeffs[2] / s;
        let c0 = self.coeffs[0] - du * self.norm.cu - dv * self.norm.cv;
        (c0, du, dv)
    }
}

/// Least-squares fit of `values` as a polynomial of `points`.
pub fn fit_polynomial(
    points: &[(f64, f64)],
    values: &[f64],
    order: u8,
) -> Result<Polynomial, TransformError> {
    if !(1..=3).contains(&order) {
        return Err(TransformError::UnsupportedOrder(order));
    }
    let nterms = term_count(order);
    if points.len() < nterms {
        return Err(TransformError::InsufficientControlPoints {
            order,
            required: nterms,
            found: points.len(),
        });
    }

    let norm = Normalization::from_points(points);
    let mut design = Array2::zeros((points.len(), nterms));
    let mut t = [0.0_f64; 10];
    for (i, &(u, v)) in points.iter().enumerate() {
        let (nu, nv) = norm.apply(u, v);
        terms(order, nu, nv, &mut t);
        for k in 0..nterms {
            design[(i, k)] = t[k];
        }
    }
    let rhs = Array1::from(values.to_vec()).insert_axis(ndarray::Axis(1));

    let ata = design.t().dot(&design);
    let atb = design.t().dot(&rhs);
    let solution = solve(ata, atb).ok_or_else(|| {
        TransformError::DegenerateControlPoints(format!(
            "{} points do not determine an order {order} polynomial (collinear?)",
            points.len()
        ))
    })?;

    Ok(Polynomial {
        order,
        norm,
        coeffs: solution.column(0).to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_solve_2x2() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![[3.0], [5.0]];
        let x = solve(a, b).unwrap();
        assert_relative_eq!(x[(0, 0)], 0.8, epsilon = 1e-12);
        assert_relative_eq!(x[(1, 0)], 1.4, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_needs_pivoting() {
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        let b = array![[2.0, 4.0], [3.0, 5.0]];
        let x = solve(a, b).unwrap();
        assert_relative_eq!(x[(0, 0)], 3.0);
        assert_relative_eq!(x[(1, 0)], 2.0);
        assert_relative_eq!(x[(0, 1)], 5.0);
        assert_relative_eq!(x[(1, 1)], 4.0);
    }

    #[test]
    fn test_solve_singular() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let b = array![[1.0], [2.0]];
        assert!(solve(a, b).is_none());
    }

    #[test]
    fn test_term_count() {
        assert_eq!(term_count(1), 3);
        assert_eq!(term_count(2), 6);
        assert_eq!(term_count(3), 10);
    }

    #[test]
    fn test_fit_reproduces_quadratic() {
        let f = |u: f64, v: f64| 3.0 + 2.0 * u - v + 0.5 * u * u + 0.25 * u * v - 0.1 * v * v;
        let mut pts = Vec::new();
        let mut vals = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                let (u, v) = (i as f64 * 10.0, j as f64 * 7.0);
                pts.push((u, v));
                vals.push(f(u, v));
            }
        }
        let poly = fit_polynomial(&pts, &vals, 2).unwrap();
        assert_relative_eq!(poly.eval(12.5, 3.0), f(12.5, 3.0), epsilon = 1e-8);
    }

    #[test]
    fn test_fit_collinear_fails() {
        let pts = [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)];
        let vals = [0.0, 1.0, 2.0, 3.0];
        assert!(matches!(
            fit_polynomial(&pts, &vals, 1),
            Err(TransformError::DegenerateControlPoints(_))
        ));
    }

    #[test]
    fn test_fit_too_few_points() {
        let pts = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)];
        let vals = [0.0, 1.0, 2.0];
        assert!(matches!(
            fit_polynomial(&pts, &vals, 2),
            Err(TransformError::InsufficientControlPoints {
                required: 6,
                found: 3,
                ..
            })
        ));
    }
}
