//! Bilinear interpolation kernel (2×2 neighbourhood).

use super::Kernel;

/// Triangle weight: 1 - |t| inside the unit support.
pub fn weight(t: f64) -> f64 {
    let t = t.abs();
    if t < 1.0 {
        1.0 - t
    } else {
        0.0
    }
}

pub const KERNEL: Kernel = Kernel { radius: 1, weight };
