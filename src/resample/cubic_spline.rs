//! Cubic B-spline resampling kernel.
//!
//! Smooth approximating kernel over a 4×4 neighbourhood; unlike cubic
//! convolution it does not pass through the samples, so it never rings.

use super::Kernel;

pub fn weight(t: f64) -> f64 {
    let t = t.abs();
    if t < 1.0 {
        2.0 / 3.0 - t * t + 0.5 * t * t * t
    } else if t < 2.0 {
        let u = 2.0 - t;
        u * u * u / 6.0
    } else {
        0.0
    }
}

pub const KERNEL: Kernel = Kernel { radius: 2, weight };
