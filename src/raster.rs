//! In-memory raster model: bands, pixel types, georeferencing.

use ndarray::Array2;
use num_traits::{Bounded, NumCast, ToPrimitive};

use crate::affine::Affine;
use crate::error::WarpError;

/// Pixel storage type of a band.
///
/// Samples are held as `f64` in memory; the data type governs rounding and
/// clamping whenever values are written into the band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Parse from a string name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "byte" | "uint8" => Some(Self::Byte),
            "uint16" => Some(Self::UInt16),
            "int16" => Some(Self::Int16),
            "uint32" => Some(Self::UInt32),
            "int32" => Some(Self::Int32),
            "float32" => Some(Self::Float32),
            "float64" => Some(Self::Float64),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64)
    }

    /// Convert a computed sample to a value representable by this type.
    ///
    /// Integers round half away from zero and saturate at the type range;
    /// NaN becomes 0. Float32 goes through an `f32` round trip.
    pub fn coerce(&self, v: f64) -> f64 {
        match self {
            Self::Byte => clamp_round::<u8>(v),
            Self::UInt16 => clamp_round::<u16>(v),
            Self::Int16 => clamp_round::<i16>(v),
            Self::UInt32 => clamp_round::<u32>(v),
            Self::Int32 => clamp_round::<i32>(v),
            Self::Float32 => v as f32 as f64,
            Self::Float64 => v,
        }
    }
}

fn clamp_round<T>(v: f64) -> f64
where
    T: Bounded + NumCast + ToPrimitive,
{
    if v.is_nan() {
        return 0.0;
    }
    let lo = T::min_value().to_f64().unwrap_or(f64::MIN);
    let hi = T::max_value().to_f64().unwrap_or(f64::MAX);
    v.round().clamp(lo, hi)
}

/// Ground control point: a pixel/line position tied to a georeferenced location.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gcp {
    pub pixel: f64,
    pub line: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Gcp {
    pub fn new(pixel: f64, line: f64, x: f64, y: f64) -> Self {
        Self {
            pixel,
            line,
            x,
            y,
            z: 0.0,
        }
    }
}

/// Per-pixel georeferenced coordinates sampled on a regular sub-grid of the raster.
///
/// Sample `(i, j)` of `x`/`y` describes raster position
/// `(pixel_offset + j * pixel_step, line_offset + i * line_step)`.
#[derive(Clone, Debug)]
pub struct GeolocationArrays {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub pixel_offset: f64,
    pub pixel_step: f64,
    pub line_offset: f64,
    pub line_step: f64,
    pub srs: Option<String>,
}

impl GeolocationArrays {
    /// Arrays with one sample per pixel centre.
    pub fn per_pixel(x: Array2<f64>, y: Array2<f64>) -> Self {
        Self {
            x,
            y,
            pixel_offset: 0.5,
            pixel_step: 1.0,
            line_offset: 0.5,
            line_step: 1.0,
            srs: None,
        }
    }
}

/// One band of samples.
#[derive(Clone, Debug)]
pub struct Band {
    pub data: Array2<f64>,
    pub data_type: DataType,
    pub nodata: Option<f64>,
}

impl Band {
    pub fn new(width: usize, height: usize, data_type: DataType) -> Self {
        Self {
            data: Array2::zeros((height, width)),
            data_type,
            nodata: None,
        }
    }

    /// Wrap existing samples, coercing them to `data_type`.
    pub fn from_array(data: Array2<f64>, data_type: DataType) -> Self {
        let data = data.mapv(|v| data_type.coerce(v));
        Self {
            data,
            data_type,
            nodata: None,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn is_nodata(&self, v: f64) -> bool {
        v.is_nan() || self.nodata.is_some_and(|nd| nd == v)
    }

    pub fn fill(&mut self, v: f64) {
        let v = self.data_type.coerce(v);
        self.data.fill(v);
    }

    /// GDAL-compatible 16-bit checksum over all samples.
    ///
    /// Samples are taken row by row as 32-bit integers (floats are rounded,
    /// non-finite floats count as `i32::MIN`) and reduced modulo a cycling
    /// table of primes.
    pub fn checksum(&self) -> u32 {
        const PRIMES: [i32; 11] = [7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43];
        let mut sum: i32 = 0;
        let mut prime = 0usize;
        for &v in self.data.iter() {
            let iv = if self.data_type.is_integer() {
                v as i32
            } else if !v.is_finite() {
                i32::MIN
            } else {
                let r = (v + 0.5).floor();
                r.clamp(-2_147_483_647.0, 2_147_483_647.0) as i32
            };
            sum = sum.wrapping_add(iv % PRIMES[prime]);
            prime = (prime + 1) % PRIMES.len();
            sum &= 0xffff;
        }
        sum as u32
    }
}

/// A multi-band raster with optional georeferencing.
#[derive(Clone, Debug)]
pub struct Raster {
    width: usize,
    height: usize,
    pub bands: Vec<Band>,
    pub geotransform: Option<Affine>,
    pub srs: Option<String>,
    pub gcps: Vec<Gcp>,
    pub geolocation: Option<GeolocationArrays>,
}

impl Raster {
    pub fn new(
        width: usize,
        height: usize,
        band_count: usize,
        data_type: DataType,
    ) -> Result<Self, WarpError> {
        if width == 0 || height == 0 {
            return Err(WarpError::Configuration(format!(
                "raster size must be at least 1x1, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            bands: (0..band_count)
                .map(|_| Band::new(width, height, data_type))
                .collect(),
            geotransform: None,
            srs: None,
            gcps: Vec::new(),
            geolocation: None,
        })
    }

    /// Build a raster from pre-filled bands, which must all share one shape.
    pub fn from_bands(bands: Vec<Band>) -> Result<Self, WarpError> {
        let (height, width) = bands
            .first()
            .map(|b| b.data.dim())
            .ok_or_else(|| WarpError::Configuration("raster needs at least one band".into()))?;
        if width == 0 || height == 0 {
            return Err(WarpError::Configuration("raster size must be at least 1x1".into()));
        }
        if bands.iter().any(|b| b.data.dim() != (height, width)) {
            return Err(WarpError::Configuration("bands differ in size".into()));
        }
        Ok(Self {
            width,
            height,
            bands,
            geotransform: None,
            srs: None,
            gcps: Vec::new(),
            geolocation: None,
        })
    }

    pub fn with_geotransform(mut self, gt: Affine) -> Self {
        self.geotransform = Some(gt);
        self
    }

    pub fn with_srs(mut self, srs: &str) -> Self {
        self.srs = Some(srs.to_string());
        self
    }

    pub fn with_gcps(mut self, gcps: Vec<Gcp>) -> Self {
        self.gcps = gcps;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Band by 1-based index, the numbering used by raster tooling.
    pub fn band(&self, index: usize) -> Option<&Band> {
        index.checked_sub(1).and_then(|i| self.bands.get(i))
    }

    pub fn band_mut(&mut self, index: usize) -> Option<&mut Band> {
        index.checked_sub(1).and_then(move |i| self.bands.get_mut(i))
    }

    /// Copy a window `(col_off, row_off, width, height)` into a new raster,
    /// shifting the geotransform to the window origin.
    pub fn window(
        &self,
        col_off: usize,
        row_off: usize,
        width: usize,
        height: usize,
    ) -> Result<Raster, WarpError> {
        if col_off + width > self.width || row_off + height > self.height {
            return Err(WarpError::Configuration(format!(
                "window {col_off},{row_off} {width}x{height} exceeds raster {}x{}",
                self.width, self.height
            )));
        }
        let bands = self
            .bands
            .iter()
            .map(|b| Band {
                data: b
                    .data
                    .slice(ndarray::s![row_off..row_off + height, col_off..col_off + width])
                    .to_owned(),
                data_type: b.data_type,
                nodata: b.nodata,
            })
            .collect();
        let mut out = Raster::from_bands(bands)?;
        out.geotransform = self
            .geotransform
            .map(|gt| gt.shifted(col_off as f64, row_off as f64));
        out.srs = self.srs.clone();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_coerce_integer_types() {
        assert_eq!(DataType::Byte.coerce(12.5), 13.0);
        assert_eq!(DataType::Byte.coerce(-3.0), 0.0);
        assert_eq!(DataType::Byte.coerce(300.0), 255.0);
        assert_eq!(DataType::Int16.coerce(-2.5), -3.0);
        assert_eq!(DataType::Int16.coerce(40000.0), 32767.0);
        assert_eq!(DataType::UInt16.coerce(f64::NAN), 0.0);
        assert_eq!(DataType::Float32.coerce(0.1), 0.1_f32 as f64);
        assert_eq!(DataType::Float64.coerce(0.1), 0.1);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(DataType::from_name("Int16"), Some(DataType::Int16));
        assert_eq!(DataType::from_name("byte"), Some(DataType::Byte));
        assert_eq!(DataType::from_name("complex"), None);
    }

    #[test]
    fn test_checksum_small_band() {
        // 1 % 7 + 2 % 11 + 3 % 13 + 4 % 17 = 10
        let band = Band::from_array(array![[1.0, 2.0], [3.0, 4.0]], DataType::Byte);
        assert_eq!(band.checksum(), 10);
    }

    #[test]
    fn test_checksum_prime_cycle() {
        // 12 samples of value 50: primes cycle after 11 entries
        let band = Band::from_array(Array2::from_elem((1, 12), 50.0), DataType::Byte);
        let expected: i32 = [7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 7]
            .iter()
            .map(|p| 50 % p)
            .sum();
        assert_eq!(band.checksum(), expected as u32);
    }

    #[test]
    fn test_checksum_same_for_int16_and_byte() {
        let data = Array2::from_shape_fn((5, 5), |(r, c)| (r * 5 + c) as f64 * 7.0);
        let byte = Band::from_array(data.clone(), DataType::Byte);
        let int16 = Band::from_array(data, DataType::Int16);
        assert_eq!(byte.checksum(), int16.checksum());
    }

    #[test]
    fn test_checksum_float_rounding() {
        let band = Band::from_array(array![[1.4, 1.6]], DataType::Float64);
        // 1 % 7 + 2 % 11
        assert_eq!(band.checksum(), 3);
    }

    #[test]
    fn test_raster_rejects_empty() {
        assert!(Raster::new(0, 5, 1, DataType::Byte).is_err());
        assert!(Raster::new(5, 5, 1, DataType::Byte).is_ok());
    }

    #[test]
    fn test_band_index_is_one_based() {
        let r = Raster::new(2, 2, 3, DataType::Byte).unwrap();
        assert!(r.band(0).is_none());
        assert!(r.band(3).is_some());
        assert!(r.band(4).is_none());
    }

    #[test]
    fn test_window_shifts_geotransform() {
        let data = Array2::from_shape_fn((20, 20), |(r, c)| (r * 20 + c) as f64);
        let src = Raster::from_bands(vec![Band::from_array(data, DataType::Float64)])
            .unwrap()
            .with_geotransform(Affine::new(60.0, 0.0, 440720.0, 0.0, -60.0, 3751320.0));
        let win = src.window(10, 0, 10, 20).unwrap();
        assert_eq!(win.width(), 10);
        assert_eq!(win.height(), 20);
        assert_eq!(win.geotransform.unwrap().c, 441320.0);
        assert_eq!(win.bands[0].data[(0, 0)], 10.0);
        assert!(src.window(15, 0, 10, 20).is_err());
    }

    #[test]
    fn test_is_nodata() {
        let mut band = Band::new(1, 1, DataType::Float64);
        assert!(band.is_nodata(f64::NAN));
        assert!(!band.is_nodata(0.0));
        band.nodata = Some(0.0);
        assert!(band.is_nodata(0.0));
    }
}
