//! Cubic convolution resampling kernel (Keys 1981, a = -0.5).

use super::Kernel;

/// Cubic convolution weight function (Keys 1981, a = -0.5).
///
/// ```text
/// W(t) = (a+2)|t|³ - (a+3)|t|² + 1       for 0 ≤ |t| ≤ 1
/// W(t) = a|t|³ - 5a|t|² + 8a|t| - 4a     for 1 < |t| < 2
/// W(t) = 0                                 otherwise
/// ```
pub fn weight(t: f64) -> f64 {
    const A: f64 = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (A + 2.0) * t * t * t - (A + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        A * t * t * t - 5.0 * A * t * t + 8.0 * A * t - 4.0 * A
    } else {
        0.0
    }
}

pub const KERNEL: Kernel = Kernel { radius: 2, weight };
