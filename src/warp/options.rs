//! Warp configuration.

use crate::cutline::Cutline;
use crate::error::WarpError;
use crate::raster::DataType;
use crate::resample::ResamplingMethod;
use crate::transform::TransformSpec;
use crate::vector::VectorSource;

/// Approximation tolerance in source pixels used unless overridden.
pub const DEFAULT_ERROR_THRESHOLD: f64 = 0.125;
pub const DEFAULT_BLOCK_SIZE: (usize, usize) = (256, 256);

/// Value written to destination pixels no source covers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InitDest {
    Value(f64),
    /// The destination nodata value (0 when there is none).
    NoData,
}

/// Vector datasource and layer holding the cutline polygons.
#[derive(Clone, Debug, PartialEq)]
pub struct CutlineSource {
    pub datasource: String,
    /// `None` takes the datasource's only layer.
    pub layer: Option<String>,
}

/// Options for one warp invocation. Read-only once the operation starts.
#[derive(Clone, Debug)]
pub struct WarpOptions {
    /// Output pixel type; `None` keeps the first source band's type.
    pub output_type: Option<DataType>,
    pub resampling: ResamplingMethod,
    /// `[minx, miny, maxx, maxy]` in the destination reference, or in
    /// `output_bounds_srs` when that is set.
    pub output_bounds: Option<[f64; 4]>,
    pub output_bounds_srs: Option<String>,
    /// `(xres, yres)`, both positive.
    pub resolution: Option<(f64, f64)>,
    /// `(width, height)`; a 0 dimension is derived from the other.
    pub size: Option<(usize, usize)>,
    pub target_aligned_pixels: bool,
    /// Maximum transform approximation error in source pixels; 0 is exact.
    pub error_threshold: f64,
    /// Overrides the sources' own nodata values.
    pub src_nodata: Option<f64>,
    /// Destination nodata; defaults to the first source's nodata.
    pub dst_nodata: Option<f64>,
    pub dst_alpha: bool,
    pub cutline: Option<Cutline>,
    /// Cutline still to be read through a [`VectorSource`], see
    /// [`load_cutline`](Self::load_cutline).
    pub cutline_source: Option<CutlineSource>,
    pub cutline_all_touched: bool,
    pub crop_to_cutline: bool,
    /// Source georeferencing; `None` uses whatever the source carries.
    pub transform: Option<TransformSpec>,
    /// Source reference override, applied to every source.
    pub src_srs: Option<String>,
    /// Destination reference; `None` keeps the first source's.
    pub dst_srs: Option<String>,
    /// Destination block `(width, height)`.
    pub block_size: (usize, usize),
    pub workers: usize,
    pub init_dest: Option<InitDest>,
}

impl Default for WarpOptions {
    fn default() -> Self {
        Self {
            output_type: None,
            resampling: ResamplingMethod::Nearest,
            output_bounds: None,
            output_bounds_srs: None,
            resolution: None,
            size: None,
            target_aligned_pixels: false,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            src_nodata: None,
            dst_nodata: None,
            dst_alpha: false,
            cutline: None,
            cutline_source: None,
            cutline_all_touched: false,
            crop_to_cutline: false,
            transform: None,
            src_srs: None,
            dst_srs: None,
            block_size: DEFAULT_BLOCK_SIZE,
            workers: available_workers(),
            init_dest: None,
        }
    }
}

fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, WarpError> {
    match value.to_uppercase().as_str() {
        "TRUE" | "YES" | "ON" | "1" => Ok(true),
        "FALSE" | "NO" | "OFF" | "0" => Ok(false),
        _ => Err(WarpError::Configuration(format!(
            "{key}: expected a boolean, got {value:?}"
        ))),
    }
}

impl WarpOptions {
    /// Apply a `KEY=VALUE` warp option.
    ///
    /// Recognised keys: `CUTLINE_ALL_TOUCHED`, `NUM_THREADS` (`ALL_CPUS` or a
    /// count) and `INIT_DEST` (a number or `NO_DATA`).
    pub fn set_warp_option(&mut self, option: &str) -> Result<(), WarpError> {
        let (key, value) = option.split_once('=').ok_or_else(|| {
            WarpError::Configuration(format!("warp option {option:?} is not KEY=VALUE"))
        })?;
        let key = key.trim().to_uppercase();
        let value = value.trim();
        match key.as_str() {
            "CUTLINE_ALL_TOUCHED" => self.cutline_all_touched = parse_bool(&key, value)?,
            "NUM_THREADS" => {
                self.workers = if value.eq_ignore_ascii_case("ALL_CPUS") {
                    available_workers()
                } else {
                    match value.parse::<usize>() {
                        Ok(n) if n > 0 => n,
                        _ => {
                            return Err(WarpError::Configuration(format!(
                                "NUM_THREADS: expected ALL_CPUS or a positive count, got {value:?}"
                            )))
                        }
                    }
                };
            }
            "INIT_DEST" => {
                self.init_dest = Some(if value.eq_ignore_ascii_case("NO_DATA") {
                    InitDest::NoData
                } else {
                    InitDest::Value(value.parse::<f64>().map_err(|_| {
                        WarpError::Configuration(format!(
                            "INIT_DEST: expected a number or NO_DATA, got {value:?}"
                        ))
                    })?)
                });
            }
            _ => {
                return Err(WarpError::Configuration(format!(
                    "unknown warp option {key}"
                )))
            }
        }
        Ok(())
    }

    /// Replace a pending [`CutlineSource`] with the cutline it names.
    pub fn load_cutline(&mut self, vectors: &dyn VectorSource) -> Result<(), WarpError> {
        let Some(source) = self.cutline_source.take() else {
            return Ok(());
        };
        if self.cutline.is_some() {
            return Err(WarpError::Configuration(format!(
                "cutline given both inline and as {}",
                source.datasource
            )));
        }
        let cutline = vectors.load_layer(&source.datasource, source.layer.as_deref())?;
        log::info!(
            "loaded cutline from {} (layer {})",
            source.datasource,
            source.layer.as_deref().unwrap_or("<default>")
        );
        self.cutline = Some(cutline);
        Ok(())
    }

    /// Reject option combinations that cannot describe one output grid.
    pub fn validate(&self) -> Result<(), WarpError> {
        if self.resolution.is_some() && self.size.is_some() {
            return Err(WarpError::Configuration(
                "resolution and size are mutually exclusive".into(),
            ));
        }
        if let Some((xres, yres)) = self.resolution {
            if !(xres > 0.0 && yres > 0.0) {
                return Err(WarpError::Configuration(format!(
                    "resolution must be positive, got ({xres}, {yres})"
                )));
            }
        }
        if self.target_aligned_pixels && self.resolution.is_none() {
            return Err(WarpError::Configuration(
                "target aligned pixels requires a resolution".into(),
            ));
        }
        if let Some(b) = self.output_bounds {
            if !(b[2] > b[0] && b[3] > b[1]) {
                return Err(WarpError::Configuration(format!(
                    "output bounds {b:?} are empty"
                )));
            }
        }
        if self.crop_to_cutline && self.cutline.is_none() && self.cutline_source.is_none() {
            return Err(WarpError::Configuration(
                "crop to cutline requires a cutline".into(),
            ));
        }
        if !(self.error_threshold >= 0.0) {
            return Err(WarpError::Configuration(format!(
                "error threshold must be >= 0, got {}",
                self.error_threshold
            )));
        }
        if self.block_size.0 == 0 || self.block_size.1 == 0 {
            return Err(WarpError::Configuration("block size must be > 0".into()));
        }
        if self.workers == 0 {
            return Err(WarpError::Configuration("worker count must be > 0".into()));
        }
        Ok(())
    }
}
