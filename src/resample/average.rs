//! Area-weighted average resampling kernel.
//!
//! Averages the source pixels under the destination pixel footprint,
//! weighting each by its overlap and skipping nodata/NaN pixels.

use ndarray::ArrayView2;
use num_traits::NumCast;

use super::is_nodata_value;

/// Sample a 2D array using area-weighted averaging.
///
/// `scale` is the source-to-destination pixel ratio `(sx, sy)`. The
/// footprint half-width is `max(scale / 2, 0.5)` on each axis.
///
/// Returns `None` when the footprint misses the array or holds only nodata.
pub fn sample<T>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
) -> Option<f64>
where
    T: Copy + NumCast + PartialEq,
{
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let hx = (scale.0 / 2.0).max(0.5);
    let hy = (scale.1 / 2.0).max(0.5);

    let (rows, cols) = (src.nrows() as isize, src.ncols() as isize);
    let x_min = ((x - hx).floor() as isize).max(0);
    let x_max = ((x + hx).ceil() as isize).min(cols);
    let y_min = ((y - hy).floor() as isize).max(0);
    let y_max = ((y + hy).ceil() as isize).min(rows);
    if x_min >= x_max || y_min >= y_max {
        return None;
    }

    let overlap = |i: isize, c: f64, h: f64| {
        let lo = (i as f64).max(c - h);
        let hi = ((i + 1) as f64).min(c + h);
        (hi - lo).max(0.0)
    };
    let ox: Vec<f64> = (x_min..x_max).map(|ix| overlap(ix, x, hx)).collect();

    let mut weighted_sum = 0.0_f64;
    let mut total_weight = 0.0_f64;
    for iy in y_min..y_max {
        let oy = overlap(iy, y, hy);
        if oy == 0.0 {
            continue;
        }
        for (k, ix) in (x_min..x_max).enumerate() {
            let val = src[(iy as usize, ix as usize)];
            if is_nodata_value(val, nodata) {
                continue;
            }
            let fval: f64 = NumCast::from(val)?;
            let w = ox[k] * oy;
            weighted_sum += w * fval;
            total_weight += w;
        }
    }

    if total_weight < 1e-15 {
        return None;
    }
    Some(weighted_sum / total_weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    #[test]
    fn test_uniform_downscale_2x() {
        let arr = Array2::from_elem((4, 4), 10.0_f64);
        let val = sample(&arr.view(), 1.5, 1.5, None, (2.0, 2.0)).unwrap();
        assert_relative_eq!(val, 10.0, epsilon = 1e-10);
    }

    #[test]
    fn test_known_2x_blocks() {
        let arr = array![
            [10.0, 20.0, 30.0, 40.0],
            [50.0, 60.0, 70.0, 80.0],
            [90.0, 100.0, 110.0, 120.0],
            [130.0, 140.0, 150.0, 160.0],
        ];
        let view = arr.view();
        let val = sample(&view, 1.0, 1.0, None, (2.0, 2.0)).unwrap();
        assert_relative_eq!(val, 35.0, epsilon = 1e-10);
        let val = sample(&view, 3.0, 3.0, None, (2.0, 2.0)).unwrap();
        assert_relative_eq!(val, 135.0, epsilon = 1e-10);
    }

    #[test]
    fn test_partial_overlap_weighting() {
        let arr = array![[0.0, 100.0], [0.0, 100.0]];
        // Footprint [0.5, 1.5] covers half of each column.
        let val = sample(&arr.view(), 1.0, 1.0, None, (1.0, 1.0)).unwrap();
        assert_relative_eq!(val, 50.0, epsilon = 1e-10);
    }

    #[test]
    fn test_nodata_skipped() {
        let mut arr = Array2::from_elem((6, 6), 100.0_f64);
        arr[(1, 1)] = -9999.0;
        arr[(0, 2)] = f64::NAN;
        let val = sample(&arr.view(), 1.5, 1.5, Some(-9999.0), (3.0, 3.0)).unwrap();
        assert_relative_eq!(val, 100.0, epsilon = 1e-10);
    }

    #[test]
    fn test_all_nodata() {
        let arr = Array2::from_elem((4, 4), -9999.0);
        assert!(sample(&arr.view(), 1.5, 1.5, Some(-9999.0), (2.0, 2.0)).is_none());
    }

    #[test]
    fn test_outside() {
        let arr = Array2::from_elem((4, 4), 1.0_f64);
        assert!(sample(&arr.view(), -5.0, -5.0, None, (1.0, 1.0)).is_none());
        assert!(sample(&arr.view(), 10.0, 10.0, None, (1.0, 1.0)).is_none());
    }

    #[test]
    fn test_integer_source() {
        let arr = Array2::from_elem((4, 4), 42_u8);
        let val = sample(&arr.view(), 2.0, 2.0, None, (2.0, 2.0)).unwrap();
        assert_relative_eq!(val, 42.0);
    }
}
