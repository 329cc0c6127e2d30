//! Linear approximation for scanline transforms.
//!
//! Instead of transforming every destination pixel, computes exact source
//! coordinates at the segment ends and midpoint and linearly interpolates
//! between them, recursively subdividing while the midpoint error exceeds the
//! threshold (default 0.125 source pixels). A threshold of zero evaluates
//! every pixel exactly.

use crate::transform::{Direction, SpatialTransformer};

const MAX_DEPTH: usize = 20;

/// Scanline transformer wrapping an exact [`SpatialTransformer`].
pub struct ApproxTransformer<'a> {
    exact: &'a SpatialTransformer,
    /// Maximum interpolation error in source pixels.
    max_error: f64,
}

impl<'a> ApproxTransformer<'a> {
    pub fn new(exact: &'a SpatialTransformer, max_error: f64) -> Self {
        Self { exact, max_error }
    }

    pub fn max_error(&self) -> f64 {
        self.max_error
    }

    /// Source pixel coordinates for the destination pixel centres
    /// `(col0..col1, row)`.
    ///
    /// `out` and `valid` must hold `col1 - col0` entries. Pixels whose
    /// transform fails are flagged `false` in `valid`.
    pub fn transform_row(
        &self,
        row: usize,
        col0: usize,
        col1: usize,
        out: &mut [(f64, f64)],
        valid: &mut [bool],
    ) {
        let n = col1.saturating_sub(col0);
        debug_assert!(out.len() >= n && valid.len() >= n);
        if n == 0 {
            return;
        }
        let y = row as f64 + 0.5;
        let x_at = |i: usize| (col0 + i) as f64 + 0.5;

        if self.max_error <= 0.0 || n < 3 {
            self.exact_range(y, 0, n - 1, &x_at, out, valid);
            return;
        }

        let left = self.exact.transform_point(Direction::DstToSrc, x_at(0), y);
        let right = self.exact.transform_point(Direction::DstToSrc, x_at(n - 1), y);
        match (left, right) {
            (Some(l), Some(r)) => self.subdivide(y, 0, n - 1, l, r, &x_at, out, valid, 0),
            _ => self.exact_range(y, 0, n - 1, &x_at, out, valid),
        }
    }

    fn exact_range(
        &self,
        y: f64,
        lo: usize,
        hi: usize,
        x_at: &dyn Fn(usize) -> f64,
        out: &mut [(f64, f64)],
        valid: &mut [bool],
    ) {
        for i in lo..=hi {
            match self.exact.transform_point(Direction::DstToSrc, x_at(i), y) {
                Some(p) => {
                    out[i] = p;
                    valid[i] = true;
                }
                None => {
                    out[i] = (f64::NAN, f64::NAN);
                    valid[i] = false;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn subdivide(
        &self,
        y: f64,
        lo: usize,
        hi: usize,
        left: (f64, f64),
        right: (f64, f64),
        x_at: &dyn Fn(usize) -> f64,
        out: &mut [(f64, f64)],
        valid: &mut [bool],
        depth: usize,
    ) {
        out[lo] = left;
        valid[lo] = true;
        out[hi] = right;
        valid[hi] = true;
        if hi <= lo + 1 {
            return;
        }

        let mid = (lo + hi) / 2;
        let Some(exact_mid) = self.exact.transform_point(Direction::DstToSrc, x_at(mid), y) else {
            self.exact_range(y, lo + 1, hi - 1, x_at, out, valid);
            return;
        };

        let t = (mid - lo) as f64 / (hi - lo) as f64;
        let interp = (
            left.0 + t * (right.0 - left.0),
            left.1 + t * (right.1 - left.1),
        );
        let err = (exact_mid.0 - interp.0)
            .abs()
            .max((exact_mid.1 - interp.1).abs());

        if err > self.max_error && depth < MAX_DEPTH {
            self.subdivide(y, lo, mid, left, exact_mid, x_at, out, valid, depth + 1);
            self.subdivide(y, mid, hi, exact_mid, right, x_at, out, valid, depth + 1);
        } else {
            let span = (hi - lo) as f64;
            for i in lo + 1..hi {
                let t = (i - lo) as f64 / span;
                out[i] = (
                    left.0 + t * (right.0 - left.0),
                    left.1 + t * (right.1 - left.1),
                );
                valid[i] = true;
            }
            out[mid] = exact_mid;
        }
    }
}
