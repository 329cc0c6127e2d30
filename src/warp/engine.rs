//! Block-wise inverse-mapping warp engine.
//!
//! Every destination pixel is mapped back into each candidate source's
//! pixel space and sampled with the configured kernel. Blocks are computed
//! on a rayon pool and written to the destination by the calling thread,
//! which also drives progress reporting and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use ndarray::{s, Array2};

use crate::chunk::planner::{plan_blocks, BlockPlan};
use crate::cutline::CutlineMask;
use crate::error::WarpError;
use crate::raster::{Band, Raster};
use crate::resample::{self, ResamplingMethod};
use crate::store::RasterStore;
use crate::transform::approx::ApproxTransformer;
use crate::transform::{source_srs, Direction, SpatialTransformer};
use crate::vector::VectorSource;
use crate::warp::grid::{self, OutputGrid, EDGE_SAMPLES};
use crate::warp::options::{InitDest, WarpOptions};
use crate::warp::progress::ProgressSink;

/// Lifecycle of a [`WarpOperation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarpState {
    Configuring,
    GridComputed,
    Executing,
    Done,
    Failed,
}

/// One warp of a set of sources onto a single destination grid.
pub struct WarpOperation<'a> {
    sources: &'a [Raster],
    options: WarpOptions,
    state: WarpState,
    grid: Option<OutputGrid>,
}

/// Finished block, ready to be written by the coordinating thread.
struct BlockOutput {
    index: usize,
    row0: usize,
    col0: usize,
    /// Data bands followed by the alpha band when requested.
    bands: Vec<Array2<f64>>,
}

/// Everything a worker needs to warp one block. Shared read-only.
struct BlockContext<'s> {
    sources: &'s [Raster],
    transformers: &'s [SpatialTransformer],
    mask: Option<&'s CutlineMask>,
    /// Per source, per band nodata after applying the override.
    src_nodata: Vec<Vec<Option<f64>>>,
    /// Per source, source pixels per destination pixel.
    scales: Vec<(f64, f64)>,
    method: ResamplingMethod,
    error_threshold: f64,
    data_bands: usize,
    alpha: bool,
    init: f64,
}

impl BlockContext<'_> {
    fn warp_block(&self, plan: &BlockPlan) -> BlockOutput {
        let (row0, row1, col0, col1) = plan.dst_slice;
        let (rows, cols) = plan.dst_shape;
        let mut bands: Vec<Array2<f64>> = (0..self.data_bands)
            .map(|_| Array2::from_elem((rows, cols), self.init))
            .collect();
        if self.alpha {
            bands.push(Array2::zeros((rows, cols)));
        }

        let approx: Vec<ApproxTransformer<'_>> = plan
            .sources
            .iter()
            .map(|&i| ApproxTransformer::new(&self.transformers[i], self.error_threshold))
            .collect();
        let mut coords = vec![vec![(f64::NAN, f64::NAN); cols]; plan.sources.len()];
        let mut valid = vec![vec![false; cols]; plan.sources.len()];
        let mut values = vec![None; self.data_bands];

        for row in row0..row1 {
            for (k, t) in approx.iter().enumerate() {
                t.transform_row(row, col0, col1, &mut coords[k], &mut valid[k]);
            }
            let r = row - row0;
            for col in col0..col1 {
                if let Some(mask) = self.mask {
                    if !mask.contains(col, row) {
                        continue;
                    }
                }
                let c = col - col0;
                let hit = plan.sources.iter().enumerate().find_map(|(k, &i)| {
                    if !valid[k][c] {
                        return None;
                    }
                    let (x, y) = coords[k][c];
                    self.sample_source(i, x, y, &mut values).then_some(())
                });
                if hit.is_none() {
                    continue;
                }
                for (band, v) in bands.iter_mut().zip(&values) {
                    if let Some(v) = v {
                        band[(r, c)] = *v;
                    }
                }
                if self.alpha {
                    bands[self.data_bands][(r, c)] = 255.0;
                }
            }
        }

        BlockOutput {
            index: plan.index,
            row0,
            col0,
            bands,
        }
    }

    /// Sample every band of source `i` at `(x, y)` into `values`. False when
    /// the point lies outside the source or no band has a valid sample.
    fn sample_source(&self, i: usize, x: f64, y: f64, values: &mut [Option<f64>]) -> bool {
        let source = &self.sources[i];
        if !(x >= 0.0 && y >= 0.0 && x < source.width() as f64 && y < source.height() as f64) {
            return false;
        }
        let mut any = false;
        for (b, slot) in values.iter_mut().enumerate() {
            *slot = source.bands.get(b).and_then(|band| {
                resample::sample(
                    &band.data.view(),
                    x,
                    y,
                    self.src_nodata[i][b],
                    self.method,
                    self.scales[i],
                )
            });
            any |= slot.is_some();
        }
        any
    }
}

/// Source pixels covered by one destination pixel around the grid centre.
fn footprint_scale(t: &SpatialTransformer, grid: &OutputGrid) -> (f64, f64) {
    let (cx, cy) = (grid.width as f64 / 2.0, grid.height as f64 / 2.0);
    let centre = t.transform_point(Direction::DstToSrc, cx, cy);
    let right = t.transform_point(Direction::DstToSrc, cx + 1.0, cy);
    let down = t.transform_point(Direction::DstToSrc, cx, cy + 1.0);
    match (centre, right, down) {
        (Some(c), Some(r), Some(d)) => {
            let sx = (r.0 - c.0).hypot(r.1 - c.1);
            let sy = (d.0 - c.0).hypot(d.1 - c.1);
            if sx.is_finite() && sy.is_finite() && sx > 0.0 && sy > 0.0 {
                (sx, sy)
            } else {
                (1.0, 1.0)
            }
        }
        _ => (1.0, 1.0),
    }
}

fn write_block(dst: &mut Raster, block: &BlockOutput) {
    for (band, data) in dst.bands.iter_mut().zip(&block.bands) {
        let (rows, cols) = data.dim();
        let data_type = band.data_type;
        band.data
            .slice_mut(s![block.row0..block.row0 + rows, block.col0..block.col0 + cols])
            .zip_mut_with(data, |d, &v| *d = data_type.coerce(v));
    }
}

fn create_thread_pool(workers: usize) -> Result<rayon::ThreadPool, WarpError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| WarpError::Configuration(format!("failed to create thread pool: {e}")))
}

impl<'a> WarpOperation<'a> {
    /// Start configuring a warp of `sources`, in priority order.
    pub fn new(sources: &'a [Raster], options: WarpOptions) -> Result<Self, WarpError> {
        options.validate()?;
        if let Some(pending) = &options.cutline_source {
            return Err(WarpError::Configuration(format!(
                "cutline {} has not been loaded",
                pending.datasource
            )));
        }
        if let Some(cutline) = &options.cutline {
            cutline.validate()?;
        }
        Ok(Self {
            sources,
            options,
            state: WarpState::Configuring,
            grid: None,
        })
    }

    pub fn state(&self) -> WarpState {
        self.state
    }

    pub fn options(&self) -> &WarpOptions {
        &self.options
    }

    /// The computed output grid, once [`compute_grid`](Self::compute_grid) ran.
    pub fn grid(&self) -> Option<&OutputGrid> {
        self.grid.as_ref()
    }

    /// Destination reference: the requested one, else the source override,
    /// else the first source's own.
    pub fn dst_srs(&self) -> Option<&str> {
        self.options
            .dst_srs
            .as_deref()
            .or(self.options.src_srs.as_deref())
            .or_else(|| self.sources.first().and_then(source_srs))
    }

    fn build_transformers(&self) -> Result<Vec<SpatialTransformer>, WarpError> {
        let dst_srs = self.dst_srs();
        self.sources
            .iter()
            .map(|source| {
                SpatialTransformer::build(
                    source,
                    self.options.transform,
                    self.options.src_srs.as_deref(),
                    dst_srs,
                )
                .map_err(WarpError::from)
            })
            .collect()
    }

    /// Derive the destination grid from the sources and options.
    pub fn compute_grid(&mut self) -> Result<OutputGrid, WarpError> {
        if let Some(grid) = self.grid {
            return Ok(grid);
        }
        if self.state != WarpState::Configuring {
            return Err(WarpError::Configuration(format!(
                "cannot compute a grid in state {:?}",
                self.state
            )));
        }
        let result = self.build_transformers().and_then(|transformers| {
            grid::compute(self.sources, &transformers, &self.options, self.dst_srs())
        });
        match result {
            Ok(grid) => {
                self.grid = Some(grid);
                self.state = WarpState::GridComputed;
                Ok(grid)
            }
            Err(e) => {
                self.state = WarpState::Failed;
                Err(e)
            }
        }
    }

    /// Allocate a destination raster on the computed grid, filled with the
    /// initial value.
    pub fn create_destination(&mut self) -> Result<Raster, WarpError> {
        let grid = self.compute_grid()?;
        let first_band = self.sources.first().and_then(|s| s.band(1));
        let data_type = self
            .options
            .output_type
            .or(first_band.map(|b| b.data_type))
            .ok_or_else(|| {
                WarpError::Configuration("output type is required without sources".into())
            })?;
        let band_count = self.sources.first().map_or(1, |s| s.band_count().max(1));
        let nodata = self
            .options
            .dst_nodata
            .or_else(|| first_band.and_then(|b| self.options.src_nodata.or(b.nodata)));
        let init = self.init_value(nodata);

        let mut bands: Vec<Band> = (0..band_count)
            .map(|_| {
                let mut band = Band::new(grid.width, grid.height, data_type);
                band.nodata = nodata;
                band.fill(init);
                band
            })
            .collect();
        if self.options.dst_alpha {
            bands.push(Band::new(grid.width, grid.height, data_type));
        }
        let mut dst = Raster::from_bands(bands)?.with_geotransform(grid.geotransform);
        dst.srs = self.dst_srs().map(str::to_string);
        Ok(dst)
    }

    fn init_value(&self, dst_nodata: Option<f64>) -> f64 {
        match self.options.init_dest {
            Some(InitDest::Value(v)) => v,
            Some(InitDest::NoData) | None => dst_nodata.unwrap_or(0.0),
        }
    }

    /// Warp every source into `dst`.
    ///
    /// `dst` supplies the grid: its geotransform when it has one, the computed
    /// grid otherwise. On error or cancellation blocks already written stay.
    pub fn execute(
        &mut self,
        dst: &mut Raster,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), WarpError> {
        if !matches!(self.state, WarpState::Configuring | WarpState::GridComputed) {
            return Err(WarpError::Configuration(format!(
                "cannot execute in state {:?}",
                self.state
            )));
        }
        let gt = match dst.geotransform {
            Some(gt) => gt,
            None => {
                let gt = self.compute_grid()?.geotransform;
                dst.geotransform = Some(gt);
                gt
            }
        };
        let grid = OutputGrid {
            width: dst.width(),
            height: dst.height(),
            geotransform: gt,
        };
        self.grid = Some(grid);
        self.state = WarpState::Executing;

        match self.run(dst, &grid, progress) {
            Ok(()) => {
                self.state = WarpState::Done;
                Ok(())
            }
            Err(e) => {
                self.state = WarpState::Failed;
                if e.is_cancelled() {
                    log::info!("warp cancelled");
                } else {
                    log::warn!("warp failed: {e}");
                }
                Err(e)
            }
        }
    }

    fn run(
        &self,
        dst: &mut Raster,
        grid: &OutputGrid,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), WarpError> {
        let alpha = self.options.dst_alpha;
        let data_bands = dst.band_count().checked_sub(alpha as usize).ok_or_else(|| {
            WarpError::Configuration("destination has no band for alpha".into())
        })?;
        let dst_srs = self.dst_srs();

        let transformers = self
            .build_transformers()?
            .into_iter()
            .map(|t| t.with_destination_geotransform(grid.geotransform))
            .collect::<Result<Vec<_>, _>>()?;
        let mask = self
            .options
            .cutline
            .as_ref()
            .map(|cutline| {
                CutlineMask::build(
                    cutline,
                    &grid.geotransform,
                    grid.width,
                    grid.height,
                    dst_srs,
                    self.options.cutline_all_touched,
                )
            })
            .transpose()?;

        let shapes: Vec<(usize, usize)> = self
            .sources
            .iter()
            .map(|s| (s.height(), s.width()))
            .collect();
        let method = self.options.resampling;
        let (block_w, block_h) = self.options.block_size;
        let plans = plan_blocks(
            &transformers,
            &shapes,
            (grid.height, grid.width),
            (block_h, block_w),
            method.kernel_radius() + 1.0,
            EDGE_SAMPLES,
            mask.as_ref(),
        )?;

        let ctx = BlockContext {
            sources: self.sources,
            transformers: &transformers,
            mask: mask.as_ref(),
            src_nodata: self
                .sources
                .iter()
                .map(|s| {
                    s.bands
                        .iter()
                        .map(|b| self.options.src_nodata.or(b.nodata))
                        .collect()
                })
                .collect(),
            scales: transformers
                .iter()
                .map(|t| footprint_scale(t, grid))
                .collect(),
            method,
            error_threshold: self.options.error_threshold,
            data_bands,
            alpha,
            init: self.init_value(dst.band(1).and_then(|b| b.nodata)),
        };

        log::info!(
            "warping {} source(s) onto {}x{} in {} blocks ({:?}, {} workers)",
            self.sources.len(),
            grid.width,
            grid.height,
            plans.len(),
            method,
            self.options.workers
        );

        let total = plans.len();
        let mut done = 0usize;
        let cancel = AtomicBool::new(false);
        let mut on_block = |dst: &mut Raster, block: BlockOutput| {
            write_block(dst, &block);
            done += 1;
            log::debug!("block {} written ({done}/{total})", block.index);
            if !cancel.load(Ordering::Relaxed)
                && !progress.report(done as f64 / total as f64, "warping")
            {
                cancel.store(true, Ordering::Relaxed);
            }
        };

        if self.options.workers <= 1 {
            for plan in &plans {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                on_block(dst, ctx.warp_block(plan));
            }
        } else {
            // proj4rs is thread safe, workers share the transformers.
            let pool = create_thread_pool(self.options.workers)?;
            let (tx, rx) = mpsc::channel::<BlockOutput>();
            pool.in_place_scope(|scope| {
                for plan in &plans {
                    let tx = tx.clone();
                    let ctx = &ctx;
                    let cancel = &cancel;
                    scope.spawn(move |_| {
                        if cancel.load(Ordering::Relaxed) {
                            return;
                        }
                        // The receiver lives until the scope ends.
                        let _ = tx.send(ctx.warp_block(plan));
                    });
                }
                drop(tx);
                for block in rx {
                    on_block(dst, block);
                }
            });
        }

        if cancel.load(Ordering::Relaxed) {
            return Err(WarpError::UserCancelled);
        }
        log::info!("warp finished: {total} blocks");
        Ok(())
    }
}

/// Warp `sources` onto a freshly computed grid and return the result.
pub fn warp(
    sources: &[Raster],
    options: WarpOptions,
    progress: &mut dyn ProgressSink,
) -> Result<Raster, WarpError> {
    let mut op = WarpOperation::new(sources, options)?;
    let mut dst = op.create_destination()?;
    op.execute(&mut dst, progress)?;
    Ok(dst)
}

/// Open `src_paths` from `store`, warp them and write the result to `dst_path`.
///
/// A cutline named by datasource is read from `vectors` first.
pub fn warp_to_store(
    store: &mut dyn RasterStore,
    vectors: &dyn VectorSource,
    dst_path: &str,
    src_paths: &[&str],
    mut options: WarpOptions,
    progress: &mut dyn ProgressSink,
) -> Result<(), WarpError> {
    options.load_cutline(vectors)?;
    let sources = src_paths
        .iter()
        .map(|p| store.open(p))
        .collect::<Result<Vec<_>, _>>()?;
    let dst = warp(&sources, options, progress)?;

    let data_type = dst
        .band(1)
        .map(|b| b.data_type)
        .ok_or_else(|| WarpError::Configuration("warp produced no bands".into()))?;
    store.create(dst_path, dst.width(), dst.height(), dst.band_count(), data_type)?;
    store.write_metadata(dst_path, &dst)?;
    for (i, band) in dst.bands.iter().enumerate() {
        store.write_block(dst_path, i + 1, 0, 0, band.data.view())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::cutline::Cutline;
    use crate::proj::crs::CrsTransform;
    use crate::raster::{DataType, Gcp};
    use crate::store::MemoryRasterStore;
    use crate::transform::TransformSpec;
    use crate::vector::MemoryVectorSource;
    use crate::warp::options::CutlineSource;
    use crate::warp::progress::NoProgress;
    use approx::assert_relative_eq;

    const GT: [f64; 6] = [440720.0, 60.0, 0.0, 3751320.0, 0.0, -60.0];

    /// 20x20 byte raster with a varied, non-zero pattern.
    fn fixture() -> Raster {
        let data = Array2::from_shape_fn((20, 20), |(r, c)| ((r * 37 + c * 11) % 250 + 1) as f64);
        Raster::from_bands(vec![Band::from_array(data, DataType::Byte)])
            .unwrap()
            .with_geotransform(Affine::from_gdal(&GT))
            .with_srs("EPSG:26711")
    }

    fn checksum(r: &Raster) -> u32 {
        r.band(1).unwrap().checksum()
    }

    fn sequential() -> WarpOptions {
        WarpOptions {
            workers: 1,
            ..Default::default()
        }
    }

    fn assert_gt(r: &Raster, expected: [f64; 6]) {
        for (got, want) in r.geotransform.unwrap().to_gdal().iter().zip(expected) {
            assert_relative_eq!(*got, want, epsilon = 1e-9);
        }
    }

    #[test_log::test]
    fn test_identity_warp() {
        let src = fixture();
        let out = warp(std::slice::from_ref(&src), sequential(), &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (20, 20));
        assert_gt(&out, GT);
        assert_eq!(checksum(&out), checksum(&src));
        assert_eq!(out.band(1).unwrap().data, src.band(1).unwrap().data);
        assert_eq!(out.srs.as_deref(), Some("EPSG:26711"));
    }

    #[test_log::test]
    fn test_output_type_preserves_checksum() {
        let src = fixture();
        let opts = WarpOptions {
            output_type: Some(DataType::Int16),
            ..sequential()
        };
        let out = warp(std::slice::from_ref(&src), opts, &mut NoProgress).unwrap();
        assert_eq!(out.band(1).unwrap().data_type, DataType::Int16);
        assert_eq!(checksum(&out), checksum(&src));
    }

    #[test_log::test]
    fn test_explicit_resolution() {
        let opts = WarpOptions {
            resolution: Some((120.0, 120.0)),
            ..sequential()
        };
        let out = warp(&[fixture()], opts, &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (10, 10));
        assert_gt(&out, [440720.0, 120.0, 0.0, 3751320.0, 0.0, -120.0]);
    }

    #[test_log::test]
    fn test_explicit_size() {
        let opts = WarpOptions {
            size: Some((10, 10)),
            ..sequential()
        };
        let out = warp(&[fixture()], opts, &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (10, 10));
        assert_gt(&out, [440720.0, 120.0, 0.0, 3751320.0, 0.0, -120.0]);
    }

    #[test_log::test]
    fn test_output_bounds() {
        let src = fixture();
        let opts = WarpOptions {
            output_bounds: Some([440720.0, 3750720.0, 441320.0, 3751320.0]),
            ..sequential()
        };
        let out = warp(std::slice::from_ref(&src), opts, &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (10, 10));
        let expected = src.band(1).unwrap().data.slice(s![0..10, 0..10]).to_owned();
        assert_eq!(out.band(1).unwrap().data, expected);
    }

    #[test_log::test]
    fn test_target_aligned_pixels() {
        let opts = WarpOptions {
            resolution: Some((100.0, 50.0)),
            target_aligned_pixels: true,
            ..sequential()
        };
        let out = warp(&[fixture()], opts, &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (13, 25));
        assert_gt(&out, [440700.0, 100.0, 0.0, 3751350.0, 0.0, -50.0]);
    }

    #[test_log::test]
    fn test_mosaic_of_two_tiles() {
        let full = fixture();
        let tiles = [
            full.window(0, 0, 10, 20).unwrap(),
            full.window(10, 0, 10, 20).unwrap(),
        ];
        let out = warp(&tiles, sequential(), &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (20, 20));
        assert_gt(&out, GT);
        assert_eq!(checksum(&out), checksum(&full));
    }

    #[test_log::test]
    fn test_first_source_wins() {
        let full = fixture();
        let mut top = full.clone();
        top.bands[0].fill(200.0);
        let out = warp(&[top, full], sequential(), &mut NoProgress).unwrap();
        assert!(out.band(1).unwrap().data.iter().all(|&v| v == 200.0));
    }

    #[test_log::test]
    fn test_nodata_falls_through_to_next_source() {
        let full = fixture();
        let mut top = full.clone();
        top.bands[0].nodata = Some(0.0);
        top.bands[0].data.slice_mut(s![.., 0..10]).fill(0.0);
        top.bands[0].data.slice_mut(s![.., 10..]).fill(7.0);
        let out = warp(&[top, full.clone()], sequential(), &mut NoProgress).unwrap();
        let data = &out.band(1).unwrap().data;
        assert_eq!(data[(5, 3)], full.band(1).unwrap().data[(5, 3)]);
        assert_eq!(data[(5, 15)], 7.0);
    }

    #[test_log::test]
    fn test_dst_nodata_outside_footprint() {
        let opts = WarpOptions {
            output_bounds: Some([440120.0, 3750120.0, 441920.0, 3751320.0]),
            dst_nodata: Some(255.0),
            ..sequential()
        };
        let out = warp(&[fixture()], opts, &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (30, 20));
        let band = out.band(1).unwrap();
        assert_eq!(band.nodata(), Some(255.0));
        assert!(band.data.slice(s![.., 0..10]).iter().all(|&v| v == 255.0));
        assert!(band.data.slice(s![.., 10..]).iter().all(|&v| v != 255.0));
    }

    #[test_log::test]
    fn test_dst_alpha() {
        let opts = WarpOptions {
            output_bounds: Some([440120.0, 3750120.0, 441920.0, 3751320.0]),
            dst_alpha: true,
            ..sequential()
        };
        let out = warp(&[fixture()], opts, &mut NoProgress).unwrap();
        assert_eq!(out.band_count(), 2);
        let alpha = &out.band(2).unwrap().data;
        assert!(alpha.slice(s![.., 0..10]).iter().all(|&v| v == 0.0));
        assert!(alpha.slice(s![.., 10..]).iter().all(|&v| v == 255.0));
    }

    #[test_log::test]
    fn test_init_dest_value() {
        let mut opts = WarpOptions {
            output_bounds: Some([440120.0, 3750120.0, 441920.0, 3751320.0]),
            ..sequential()
        };
        opts.set_warp_option("INIT_DEST=9").unwrap();
        let out = warp(&[fixture()], opts, &mut NoProgress).unwrap();
        assert_eq!(out.band(1).unwrap().data[(0, 0)], 9.0);
    }

    #[test_log::test]
    fn test_cutline_all_touched() {
        let cutline = Cutline::from_exterior(&[
            (440900.0, 3750500.0),
            (441530.0, 3750700.0),
            (441300.0, 3751150.0),
        ]);
        let covered = |all_touched: bool| {
            let opts = WarpOptions {
                cutline: Some(cutline.clone()),
                cutline_all_touched: all_touched,
                ..sequential()
            };
            let out = warp(&[fixture()], opts, &mut NoProgress).unwrap();
            let band = out.band(1).unwrap();
            (band.data.iter().filter(|&&v| v != 0.0).count(), band.checksum())
        };
        let (centre, centre_sum) = covered(false);
        let (touched, touched_sum) = covered(true);
        assert!(centre > 0);
        assert!(touched > centre, "{touched} vs {centre}");
        assert_ne!(centre_sum, touched_sum);
        assert_eq!(covered(true), (touched, touched_sum));
    }

    #[test_log::test]
    fn test_invalid_cutline_rejected() {
        let opts = WarpOptions {
            cutline: Some(Cutline::from_exterior(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)])),
            ..sequential()
        };
        let sources = [fixture()];
        assert!(matches!(
            WarpOperation::new(&sources, opts),
            Err(WarpError::Geometry(_))
        ));
    }

    #[test_log::test]
    fn test_progress_ends_at_one() {
        let mut fractions = Vec::new();
        let opts = WarpOptions {
            block_size: (8, 8),
            ..sequential()
        };
        let mut sink = |f: f64, _: &str| {
            fractions.push(f);
            true
        };
        warp(&[fixture()], opts, &mut sink).unwrap();
        assert_eq!(fractions.len(), 9);
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[test_log::test]
    fn test_cancel() {
        let sources = [fixture()];
        let opts = WarpOptions {
            block_size: (8, 8),
            ..sequential()
        };
        let mut op = WarpOperation::new(&sources, opts).unwrap();
        let mut dst = op.create_destination().unwrap();
        let mut calls = 0;
        let mut sink = |_: f64, _: &str| {
            calls += 1;
            false
        };
        let err = op.execute(&mut dst, &mut sink).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls, 1);
        assert_eq!(op.state(), WarpState::Failed);
        // The first block was written before cancelling.
        assert_eq!(dst.band(1).unwrap().data[(0, 0)], sources[0].band(1).unwrap().data[(0, 0)]);
        assert_eq!(dst.band(1).unwrap().data[(19, 19)], 0.0);
    }

    #[test_log::test]
    fn test_cancel_parallel() {
        let sources = [fixture()];
        let opts = WarpOptions {
            block_size: (8, 8),
            workers: 4,
            ..Default::default()
        };
        let mut op = WarpOperation::new(&sources, opts).unwrap();
        let mut dst = op.create_destination().unwrap();
        let mut calls = 0;
        let mut sink = |_: f64, _: &str| {
            calls += 1;
            false
        };
        let err = op.execute(&mut dst, &mut sink).unwrap_err();
        assert!(matches!(err, WarpError::UserCancelled));
        assert_eq!(calls, 1);
        assert_eq!(op.state(), WarpState::Failed);
    }

    #[test_log::test]
    fn test_state_machine() {
        let sources = [fixture()];
        let mut op = WarpOperation::new(&sources, sequential()).unwrap();
        assert_eq!(op.state(), WarpState::Configuring);
        op.compute_grid().unwrap();
        assert_eq!(op.state(), WarpState::GridComputed);
        let mut dst = op.create_destination().unwrap();
        op.execute(&mut dst, &mut NoProgress).unwrap();
        assert_eq!(op.state(), WarpState::Done);
        assert!(op.execute(&mut dst, &mut NoProgress).is_err());
    }

    #[test_log::test]
    fn test_no_sources_needs_bounds() {
        let sources: Vec<Raster> = Vec::new();
        let mut op = WarpOperation::new(&sources, sequential()).unwrap();
        assert!(matches!(op.compute_grid(), Err(WarpError::Configuration(_))));
        assert_eq!(op.state(), WarpState::Failed);
    }

    #[test_log::test]
    fn test_tiny_resolution_rejected() {
        let opts = WarpOptions {
            resolution: Some((1e-9, 1e-9)),
            ..sequential()
        };
        let err = warp(&[fixture()], opts, &mut NoProgress).unwrap_err();
        assert!(matches!(err, WarpError::Configuration(_)));
    }

    #[test_log::test]
    fn test_nad27_to_wgs84_utm() {
        let src = fixture();
        let opts = WarpOptions {
            dst_srs: Some("EPSG:32611".into()),
            ..sequential()
        };
        let out = warp(std::slice::from_ref(&src), opts, &mut NoProgress).unwrap();
        assert_eq!(out.srs.as_deref(), Some("EPSG:32611"));
        assert!((19..=22).contains(&out.width()), "width {}", out.width());
        assert!((19..=22).contains(&out.height()), "height {}", out.height());
        let gt = out.geotransform.unwrap().to_gdal();
        // The datum shift moves the footprint by a few hundred metres at most.
        assert!((gt[0] - GT[0]).abs() < 300.0, "{gt:?}");
        assert!((gt[3] - GT[3]).abs() < 300.0, "{gt:?}");
        assert_relative_eq!(gt[1], 60.0, epsilon = 1.0);
        let band = out.band(1).unwrap();
        let filled = band.data.iter().filter(|&&v| v != 0.0).count();
        assert!(filled * 10 > band.data.len() * 8, "{filled} of {} filled", band.data.len());
    }

    #[test_log::test]
    fn test_output_bounds_in_nad27_geographic() {
        let ct = CrsTransform::new("EPSG:26711", "EPSG:4267").unwrap();
        let (minx, miny) = ct.transform_fwd(440720.0, 3750120.0).unwrap();
        let (maxx, maxy) = ct.transform_fwd(441920.0, 3751320.0).unwrap();
        let opts = WarpOptions {
            output_bounds: Some([minx, miny, maxx, maxy]),
            output_bounds_srs: Some("EPSG:4267".into()),
            resolution: Some((60.0, 60.0)),
            ..sequential()
        };
        let out = warp(&[fixture()], opts, &mut NoProgress).unwrap();
        assert_eq!(out.srs.as_deref(), Some("EPSG:26711"));
        assert!((20..=22).contains(&out.width()), "width {}", out.width());
        assert!((20..=22).contains(&out.height()), "height {}", out.height());
        let gt = out.geotransform.unwrap().to_gdal();
        assert!((gt[0] - GT[0]).abs() < 60.0, "{gt:?}");
        assert!((gt[3] - GT[3]).abs() < 60.0, "{gt:?}");
        let band = out.band(1).unwrap();
        let filled = band.data.iter().filter(|&&v| v != 0.0).count();
        assert!(filled * 10 > band.data.len() * 8, "{filled} of {} filled", band.data.len());
    }

    #[test_log::test]
    fn test_zero_threshold_matches_exact() {
        let src = fixture();
        let run = |threshold: f64| {
            let opts = WarpOptions {
                dst_srs: Some("EPSG:4326".into()),
                error_threshold: threshold,
                resampling: ResamplingMethod::Bilinear,
                ..sequential()
            };
            warp(std::slice::from_ref(&src), opts, &mut NoProgress).unwrap()
        };
        let exact = run(0.0);
        let again = run(0.0);
        assert_eq!(exact.band(1).unwrap().data, again.band(1).unwrap().data);

        // Exact reference: sample every pixel through the transformer directly.
        let gt = exact.geotransform.unwrap();
        let t = SpatialTransformer::build(&src, None, None, Some("EPSG:4326"))
            .unwrap()
            .with_destination_geotransform(gt)
            .unwrap();
        let band = src.band(1).unwrap();
        for row in 0..exact.height() {
            for col in 0..exact.width() {
                let expected = t
                    .transform_point(Direction::DstToSrc, col as f64 + 0.5, row as f64 + 0.5)
                    .filter(|&(x, y)| x >= 0.0 && y >= 0.0 && x < 20.0 && y < 20.0)
                    .and_then(|(x, y)| {
                        resample::sample(&band.data.view(), x, y, None, ResamplingMethod::Bilinear, (1.0, 1.0))
                    })
                    .map_or(0.0, |v| DataType::Byte.coerce(v));
                assert_eq!(exact.band(1).unwrap().data[(row, col)], expected, "pixel ({col}, {row})");
            }
        }
    }

    #[test_log::test]
    fn test_reprojection_close_to_exact() {
        let src = fixture();
        let run = |threshold: f64| {
            let opts = WarpOptions {
                dst_srs: Some("EPSG:4326".into()),
                error_threshold: threshold,
                ..sequential()
            };
            warp(std::slice::from_ref(&src), opts, &mut NoProgress).unwrap()
        };
        let exact = run(0.0);
        let approx = run(0.125);
        assert_eq!(exact.geotransform, approx.geotransform);
        let a = &exact.band(1).unwrap().data;
        let b = &approx.band(1).unwrap().data;
        let differing = a.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
        assert!(differing * 20 < a.len(), "{differing} of {} pixels differ", a.len());
    }

    fn corner_gcps() -> Vec<Gcp> {
        let gt = Affine::from_gdal(&GT);
        [(0.0, 0.0), (20.0, 0.0), (0.0, 20.0), (20.0, 20.0), (10.0, 10.0)]
            .iter()
            .map(|&(p, l)| {
                let (x, y) = gt.forward(p, l);
                Gcp::new(p, l, x, y)
            })
            .collect()
    }

    #[test_log::test]
    fn test_gcp_polynomial() {
        let reference = fixture();
        let mut src = reference.clone().with_gcps(corner_gcps());
        src.geotransform = None;
        let opts = WarpOptions {
            transform: Some(TransformSpec::GcpPolynomial { order: 1 }),
            ..sequential()
        };
        let out = warp(&[src], opts, &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (20, 20));
        for (got, want) in out.geotransform.unwrap().to_gdal().iter().zip(GT) {
            assert_relative_eq!(*got, want, epsilon = 1e-6);
        }
        assert_eq!(checksum(&out), checksum(&reference));
    }

    #[test_log::test]
    fn test_gcp_thin_plate_spline() {
        let reference = fixture();
        let mut src = reference.clone().with_gcps(corner_gcps());
        src.geotransform = None;
        let opts = WarpOptions {
            transform: Some(TransformSpec::GcpThinPlateSpline),
            ..sequential()
        };
        let out = warp(&[src], opts, &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (20, 20));
        let got = &out.band(1).unwrap().data;
        let want = &reference.band(1).unwrap().data;
        for r in 2..18 {
            for c in 2..18 {
                assert_eq!(got[(r, c)], want[(r, c)], "pixel ({c}, {r})");
            }
        }
    }

    #[test_log::test]
    fn test_insufficient_gcps() {
        let mut src = fixture().with_gcps(corner_gcps()[..2].to_vec());
        src.geotransform = None;
        let opts = WarpOptions {
            transform: Some(TransformSpec::GcpPolynomial { order: 1 }),
            ..sequential()
        };
        let err = warp(&[src], opts, &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            WarpError::Transform(crate::error::TransformError::InsufficientControlPoints { .. })
        ));
    }

    #[test_log::test]
    fn test_parallel_matches_sequential() {
        let src = fixture();
        let run = |workers: usize| {
            let opts = WarpOptions {
                dst_srs: Some("EPSG:4326".into()),
                resampling: ResamplingMethod::Cubic,
                block_size: (7, 5),
                workers,
                ..Default::default()
            };
            let mut fractions = Vec::new();
            let mut sink = |f: f64, _: &str| {
                fractions.push(f);
                true
            };
            let out = warp(std::slice::from_ref(&src), opts, &mut sink).unwrap();
            assert_eq!(*fractions.last().unwrap(), 1.0);
            assert!(fractions.windows(2).all(|w| w[0] < w[1]));
            out
        };
        let seq = run(1);
        let par = run(4);
        assert_eq!(seq.band(1).unwrap().data, par.band(1).unwrap().data);
    }

    #[test_log::test]
    fn test_average_downsample() {
        let data = Array2::from_shape_fn((20, 20), |(r, c)| ((r / 2 + c / 2) % 2 * 100) as f64);
        let src = Raster::from_bands(vec![Band::from_array(data, DataType::Float32)])
            .unwrap()
            .with_geotransform(Affine::from_gdal(&GT));
        let opts = WarpOptions {
            resolution: Some((240.0, 240.0)),
            resampling: ResamplingMethod::Average,
            ..sequential()
        };
        let out = warp(&[src], opts, &mut NoProgress).unwrap();
        assert_eq!((out.width(), out.height()), (5, 5));
        for &v in out.band(1).unwrap().data.iter() {
            assert_relative_eq!(v, 50.0, epsilon = 1e-6);
        }
    }

    #[test_log::test]
    fn test_warp_to_store() {
        let mut store = MemoryRasterStore::new();
        let vectors = MemoryVectorSource::new();
        store.insert("src.tif", fixture());
        warp_to_store(&mut store, &vectors, "out.tif", &["src.tif"], sequential(), &mut NoProgress)
            .unwrap();
        let out = store.open("out.tif").unwrap();
        assert_eq!(checksum(&out), checksum(&fixture()));
        assert_gt(&out, GT);

        let missing = warp_to_store(
            &mut store,
            &vectors,
            "x.tif",
            &["nope.tif"],
            sequential(),
            &mut NoProgress,
        );
        assert!(matches!(missing, Err(WarpError::Io(_))));
    }

    fn cutline_source(layer: &str) -> WarpOptions {
        WarpOptions {
            cutline_source: Some(CutlineSource {
                datasource: "cutline.gpkg".into(),
                layer: Some(layer.into()),
            }),
            ..sequential()
        }
    }

    #[test_log::test]
    fn test_cutline_from_vector_source() {
        // Left half of the fixture.
        let half = Cutline::from_exterior(&[
            (440700.0, 3750100.0),
            (441320.0, 3750100.0),
            (441320.0, 3751340.0),
            (440700.0, 3751340.0),
        ])
        .with_srs("EPSG:26711");
        let mut vectors = MemoryVectorSource::new();
        vectors.add_layer("cutline.gpkg", "left", half.clone());
        vectors.add_layer("cutline.gpkg", "other", half);

        let mut store = MemoryRasterStore::new();
        store.insert("src.tif", fixture());
        warp_to_store(&mut store, &vectors, "out.tif", &["src.tif"], cutline_source("left"), &mut NoProgress)
            .unwrap();
        let out = store.open("out.tif").unwrap();
        let data = &out.band(1).unwrap().data;
        let src = fixture();
        assert_eq!(data.slice(s![.., 0..10]), src.band(1).unwrap().data.slice(s![.., 0..10]));
        assert!(data.slice(s![.., 10..]).iter().all(|&v| v == 0.0));

        let unknown = warp_to_store(
            &mut store,
            &vectors,
            "y.tif",
            &["src.tif"],
            cutline_source("missing"),
            &mut NoProgress,
        );
        assert!(matches!(unknown, Err(WarpError::Io(_))));

        // The operation itself refuses a cutline that was never read.
        let sources = [fixture()];
        assert!(matches!(
            WarpOperation::new(&sources, cutline_source("left")),
            Err(WarpError::Configuration(_))
        ));
    }
}
