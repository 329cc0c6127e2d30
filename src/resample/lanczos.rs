//! Lanczos sinc-windowed resampling kernel (a = 3, 6×6 neighbourhood).

use super::Kernel;

const A: f64 = 3.0;

/// Normalized sinc function: sinc(x) = sin(πx) / (πx), sinc(0) = 1.
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

/// L(t) = sinc(t) · sinc(t/a) for |t| < a, else 0.
pub fn weight(t: f64) -> f64 {
    let t = t.abs();
    if t < A {
        sinc(t) * sinc(t / A)
    } else {
        0.0
    }
}

pub const KERNEL: Kernel = Kernel { radius: 3, weight };

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::convolve;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_weight_values() {
        assert_relative_eq!(weight(0.0), 1.0);
        assert_relative_eq!(weight(1.0), 0.0, epsilon = 1e-15);
        assert_relative_eq!(weight(2.0), 0.0, epsilon = 1e-15);
        assert_eq!(weight(3.0), 0.0);
        assert!(weight(1.5) < 0.0);
    }

    #[test]
    fn test_constant_preserved() {
        let arr = Array2::from_elem((10, 10), 5.0);
        let val = convolve(&arr.view(), 4.3, 5.7, None, &KERNEL).unwrap();
        assert_relative_eq!(val, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_symmetric_response() {
        let arr = Array2::from_shape_fn((10, 10), |(_, c)| c as f64);
        let view = arr.view();
        // Halfway between centres 4 and 5 of a linear ramp.
        let val = convolve(&view, 5.0, 5.5, None, &KERNEL).unwrap();
        assert_relative_eq!(val, 4.5, epsilon = 1e-10);
    }

    #[test]
    fn test_border_renormalized() {
        let arr = Array2::from_elem((3, 3), 9.0);
        let val = convolve(&arr.view(), 0.2, 0.2, None, &KERNEL).unwrap();
        assert_relative_eq!(val, 9.0, epsilon = 1e-12);
    }
}
