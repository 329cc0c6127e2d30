//! Output grid computation: destination size and geotransform from source
//! footprints and the requested bounds, resolution or size.

use crate::affine::Affine;
use crate::error::WarpError;
use crate::proj::pipeline::Pipeline;
use crate::raster::Raster;
use crate::transform::{Direction, SpatialTransformer};
use crate::warp::options::WarpOptions;

/// Samples taken along each edge when tracing a footprint.
pub const EDGE_SAMPLES: usize = 21;

/// Slack subtracted before rounding a span up to whole pixels.
const SIZE_EPSILON: f64 = 1e-6;

/// Largest accepted width or height.
const MAX_DIMENSION: f64 = i32::MAX as f64;

/// Destination raster grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputGrid {
    pub width: usize,
    pub height: usize,
    pub geotransform: Affine,
}

impl OutputGrid {
    /// `[minx, miny, maxx, maxy]` covered by the grid (north-up grids).
    pub fn bounds(&self) -> [f64; 4] {
        let (x0, y0) = self.geotransform.forward(0.0, 0.0);
        let (x1, y1) = self
            .geotransform
            .forward(self.width as f64, self.height as f64);
        [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
    }
}

/// Points along the border of the `[x0, x1] × [y0, y1]` rectangle.
fn edge_points(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<(f64, f64)> {
    let n = EDGE_SAMPLES - 1;
    let mut pts = Vec::with_capacity(4 * EDGE_SAMPLES);
    for i in 0..=n {
        let t = i as f64 / n as f64;
        let x = x0 + (x1 - x0) * t;
        let y = y0 + (y1 - y0) * t;
        pts.push((x, y0));
        pts.push((x, y1));
        pts.push((x0, y));
        pts.push((x1, y));
    }
    pts
}

fn extent_of(points: impl IntoIterator<Item = (f64, f64)>) -> Option<[f64; 4]> {
    let mut ext = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
    for (x, y) in points {
        ext[0] = ext[0].min(x);
        ext[1] = ext[1].min(y);
        ext[2] = ext[2].max(x);
        ext[3] = ext[3].max(y);
    }
    ext[0].is_finite().then_some(ext)
}

fn union(a: Option<[f64; 4]>, b: [f64; 4]) -> [f64; 4] {
    match a {
        None => b,
        Some(a) => [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])],
    }
}

/// Footprint of one source in destination georeferenced coordinates, plus
/// the resolution it suggests (destination diagonal over pixel diagonal).
///
/// `transformer` must still carry the identity destination geotransform.
fn source_footprint(source: &Raster, transformer: &SpatialTransformer) -> Option<([f64; 4], f64)> {
    let (w, h) = (source.width() as f64, source.height() as f64);
    let mut pts = edge_points(0.0, 0.0, w, h);
    let ok = transformer.transform_points(Direction::SrcToDst, &mut pts);
    let failed = ok.iter().filter(|v| !**v).count();
    if failed > 0 {
        log::warn!(
            "{failed} of {} edge samples of a {}x{} source failed to transform",
            pts.len(),
            source.width(),
            source.height()
        );
    }
    let ext = extent_of(pts.into_iter().zip(ok).filter(|(_, v)| *v).map(|(p, _)| p))?;
    let diag = (ext[2] - ext[0]).hypot(ext[3] - ext[1]);
    let res = diag / w.hypot(h);
    (res > 0.0).then_some((ext, res))
}

/// Pixel count along one axis, rejecting spans that do not fit a raster.
fn checked_dimension(pixels: f64, axis: &str) -> Result<usize, WarpError> {
    if !pixels.is_finite() || pixels > MAX_DIMENSION {
        return Err(WarpError::Configuration(format!(
            "output {axis} of {pixels} pixels is too large"
        )));
    }
    Ok((pixels as usize).max(1))
}

/// Reject grids whose cell count cannot be allocated as one band of samples.
fn check_area(width: usize, height: usize) -> Result<(), WarpError> {
    let max_cells = isize::MAX as usize / std::mem::size_of::<f64>();
    match width.checked_mul(height) {
        Some(cells) if cells <= max_cells => Ok(()),
        _ => Err(WarpError::Configuration(format!(
            "output grid {width}x{height} is too large"
        ))),
    }
}

/// Bounds given in `bounds_srs`, carried into `dst_srs` by edge sampling.
fn reproject_bounds(
    bounds: [f64; 4],
    bounds_srs: Option<&str>,
    dst_srs: Option<&str>,
) -> Result<[f64; 4], WarpError> {
    let pipeline = Pipeline::new(bounds_srs, dst_srs)?;
    if pipeline.is_identity() {
        return Ok(bounds);
    }
    let pts = edge_points(bounds[0], bounds[1], bounds[2], bounds[3]);
    let projected = pts
        .into_iter()
        .filter_map(|(x, y)| pipeline.transform_fwd(x, y).ok());
    extent_of(projected).ok_or_else(|| {
        WarpError::Configuration(format!(
            "output bounds {bounds:?} cannot be carried into the destination reference"
        ))
    })
}

/// Compute the destination grid.
///
/// `transformers` holds one transformer per source, built for `dst_srs` and
/// still carrying the identity destination geotransform.
pub fn compute(
    sources: &[Raster],
    transformers: &[SpatialTransformer],
    options: &WarpOptions,
    dst_srs: Option<&str>,
) -> Result<OutputGrid, WarpError> {
    let mut extent: Option<[f64; 4]> = None;
    let mut finest: Option<f64> = None;
    for (i, (source, t)) in sources.iter().zip(transformers).enumerate() {
        match source_footprint(source, t) {
            Some((ext, res)) => {
                extent = Some(union(extent, ext));
                finest = Some(finest.map_or(res, |f| f.min(res)));
            }
            None => log::warn!("source {i} has no footprint in the destination reference"),
        }
    }

    let bounds = if options.crop_to_cutline {
        let cutline = options.cutline.as_ref().ok_or_else(|| {
            WarpError::Configuration("crop to cutline requires a cutline".into())
        })?;
        cutline.extent_in(dst_srs)?
    } else if let Some(b) = options.output_bounds {
        reproject_bounds(b, options.output_bounds_srs.as_deref(), dst_srs)?
    } else if sources.is_empty() {
        return Err(WarpError::Configuration(
            "no source rasters: output bounds are required".into(),
        ));
    } else {
        extent.ok_or_else(|| {
            WarpError::Configuration("no source footprint could be computed".into())
        })?
    };
    let [mut minx, mut miny, mut maxx, mut maxy] = bounds;
    if !(maxx > minx && maxy > miny) {
        return Err(WarpError::Configuration(format!(
            "output extent {bounds:?} is empty"
        )));
    }

    let (width, height, xres, yres) = if let Some((xres, yres)) = options.resolution {
        if options.target_aligned_pixels {
            minx = (minx / xres).floor() * xres;
            maxx = (maxx / xres).ceil() * xres;
            miny = (miny / yres).floor() * yres;
            maxy = (maxy / yres).ceil() * yres;
        }
        let width = checked_dimension(((maxx - minx) / xres - SIZE_EPSILON).ceil(), "width")?;
        let height = checked_dimension(((maxy - miny) / yres - SIZE_EPSILON).ceil(), "height")?;
        (width, height, xres, yres)
    } else if let Some((w, h)) = options.size {
        let (sx, sy) = (maxx - minx, maxy - miny);
        let (w, h) = match (w, h) {
            (0, 0) => {
                return Err(WarpError::Configuration(
                    "output size needs at least one non-zero dimension".into(),
                ))
            }
            (0, h) => (checked_dimension((sx / sy * h as f64 + 0.5).floor(), "width")?, h),
            (w, 0) => (w, checked_dimension((sy / sx * w as f64 + 0.5).floor(), "height")?),
            (w, h) => (w, h),
        };
        (w, h, sx / w as f64, sy / h as f64)
    } else {
        if sources.is_empty() {
            return Err(WarpError::Configuration(
                "no source rasters: a resolution or size is required".into(),
            ));
        }
        let res = finest.ok_or_else(|| {
            WarpError::Configuration("no source resolution could be derived".into())
        })?;
        let width = checked_dimension(((maxx - minx) / res + 0.5).floor(), "width")?;
        let height = checked_dimension(((maxy - miny) / res + 0.5).floor(), "height")?;
        (
            width,
            height,
            (maxx - minx) / width as f64,
            (maxy - miny) / height as f64,
        )
    };

    check_area(width, height)?;

    let geotransform = Affine::new(xres, 0.0, minx, 0.0, -yres, maxy);
    log::debug!(
        "output grid {}x{} at ({}, {}) resolution ({}, {})",
        width,
        height,
        minx,
        maxy,
        xres,
        yres
    );
    Ok(OutputGrid {
        width,
        height,
        geotransform,
    })
}
