//! Nearest-neighbor resampling kernel.

use ndarray::ArrayView2;
use num_traits::NumCast;

use super::is_nodata_value;

/// Sample a 2D array using nearest-neighbor interpolation.
///
/// Pixel (0,0) has its upper-left corner at (0.0, 0.0) and its centre at
/// (0.5, 0.5), so the containing pixel is simply `floor()` of each axis.
///
/// Returns `None` outside the array or when the sampled value is nodata/NaN.
pub fn sample<T>(src: &ArrayView2<'_, T>, x: f64, y: f64, nodata: Option<T>) -> Option<T>
where
    T: Copy + NumCast + PartialEq,
{
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let col = x.floor() as isize;
    let row = y.floor() as isize;

    let (rows, cols) = (src.nrows() as isize, src.ncols() as isize);
    if col < 0 || col >= cols || row < 0 || row >= rows {
        return None;
    }

    let val = src[(row as usize, col as usize)];
    if is_nodata_value(val, nodata) {
        return None;
    }
    Some(val)
}
