//! Resampling kernels for the warp engine.
//!
//! Coordinates are GDAL pixel-corner based: pixel (0,0) spans [0,1)×[0,1)
//! and has its centre at (0.5, 0.5).
//!
//! Nodata policy, shared by every convolution kernel: neighbours that are
//! nodata, NaN or outside the source are dropped from the weighted sum and
//! the remaining weights are renormalized. When nothing valid remains, or
//! the remaining weight sum is ~0, the sample is nodata (`None`).

pub mod average;
pub mod bilinear;
pub mod cubic;
pub mod cubic_spline;
pub mod lanczos;
pub mod nearest;

use ndarray::ArrayView2;
use num_traits::NumCast;

/// Weight sums below this are treated as "no contribution".
const MIN_WEIGHT_SUM: f64 = 1e-10;

/// Available resampling methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResamplingMethod {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
}

impl ResamplingMethod {
    /// Parse from a string name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "nearest" | "near" => Some(Self::Nearest),
            "bilinear" => Some(Self::Bilinear),
            "cubic" => Some(Self::Cubic),
            "cubicspline" => Some(Self::CubicSpline),
            "lanczos" => Some(Self::Lanczos),
            "average" => Some(Self::Average),
            _ => None,
        }
    }

    /// Kernel radius in pixels (how far from center the kernel reaches).
    pub fn kernel_radius(&self) -> f64 {
        match self {
            Self::Nearest => 0.5,
            Self::Bilinear => 1.0,
            Self::Cubic | Self::CubicSpline => 2.0,
            Self::Lanczos => 3.0,
            Self::Average => 1.0,
        }
    }

    /// Separable weight table for the convolution kernels.
    pub fn kernel(&self) -> Option<Kernel> {
        match self {
            Self::Bilinear => Some(bilinear::KERNEL),
            Self::Cubic => Some(cubic::KERNEL),
            Self::CubicSpline => Some(cubic_spline::KERNEL),
            Self::Lanczos => Some(lanczos::KERNEL),
            Self::Nearest | Self::Average => None,
        }
    }
}

/// A separable convolution kernel: `radius` taps either side of the sample
/// point and a 1D weight function of the signed offset.
#[derive(Clone, Copy, Debug)]
pub struct Kernel {
    pub radius: isize,
    pub weight: fn(f64) -> f64,
}

/// True when `val` is NaN or equals the nodata sentinel.
pub fn is_nodata_value<T>(val: T, nodata: Option<T>) -> bool
where
    T: Copy + NumCast + PartialEq,
{
    if nodata == Some(val) {
        return true;
    }
    let f: Option<f64> = NumCast::from(val);
    f.map_or(true, f64::is_nan)
}

/// Apply `kernel` around the corner-based coordinate `(x, y)`.
///
/// Taps run over offsets `1 - radius ..= radius` from `floor(x - 0.5)`, so
/// bilinear reads 2×2, cubic 4×4 and Lanczos 6×6 neighbourhoods.
pub fn convolve<T>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    kernel: &Kernel,
) -> Option<f64>
where
    T: Copy + NumCast + PartialEq,
{
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let cx = x - 0.5;
    let cy = y - 0.5;
    let ix = cx.floor() as isize;
    let iy = cy.floor() as isize;
    let dx = cx - ix as f64;
    let dy = cy - iy as f64;

    let (rows, cols) = (src.nrows() as isize, src.ncols() as isize);
    let taps = (1 - kernel.radius)..=kernel.radius;

    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    let mut any_valid = false;
    for j in taps.clone() {
        let r = iy + j;
        if r < 0 || r >= rows {
            continue;
        }
        let wy = (kernel.weight)(dy - j as f64);
        for i in taps.clone() {
            let c = ix + i;
            if c < 0 || c >= cols {
                continue;
            }
            let val = src[(r as usize, c as usize)];
            if is_nodata_value(val, nodata) {
                continue;
            }
            let fval: f64 = NumCast::from(val)?;
            let w = wy * (kernel.weight)(dx - i as f64);
            sum += w * fval;
            weight_sum += w;
            any_valid = true;
        }
    }

    if !any_valid || weight_sum.abs() < MIN_WEIGHT_SUM {
        return None;
    }
    Some(sum / weight_sum)
}

/// Sample `src` at `(x, y)` with `method`.
///
/// `scale` is the source-pixels-per-destination-pixel ratio, used only by
/// [`ResamplingMethod::Average`].
pub fn sample<T>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    method: ResamplingMethod,
    scale: (f64, f64),
) -> Option<f64>
where
    T: Copy + NumCast + PartialEq,
{
    match method {
        ResamplingMethod::Nearest => {
            let v = nearest::sample(src, x, y, nodata)?;
            NumCast::from(v)
        }
        ResamplingMethod::Average => average::sample(src, x, y, nodata, scale),
        _ => method
            .kernel()
            .and_then(|kernel| convolve(src, x, y, nodata, &kernel)),
    }
}
