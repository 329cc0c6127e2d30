//! Block planner: tiles the destination grid and finds, per block, which
//! sources can contribute.

use crate::cutline::CutlineMask;
use crate::error::WarpError;
use crate::transform::{Direction, SpatialTransformer};

/// A plan for warping a single destination block.
#[derive(Clone, Debug)]
pub struct BlockPlan {
    pub index: usize,
    /// Destination block bounds (row_start, row_end, col_start, col_end), end-exclusive.
    pub dst_slice: (usize, usize, usize, usize),
    /// Shape of this destination block (rows, cols).
    pub dst_shape: (usize, usize),
    /// Indices of the candidate sources in input order; empty when nothing
    /// can contribute.
    pub sources: Vec<usize>,
}

impl BlockPlan {
    pub fn has_data(&self) -> bool {
        !self.sources.is_empty()
    }
}

/// Generate sample points along the boundary of a rectangular block.
///
/// Returns (col, row) pairs at pixel centers along all 4 edges.
fn block_boundary_points(
    row0: usize,
    row1: usize,
    col0: usize,
    col1: usize,
    pts_per_edge: usize,
) -> Vec<(f64, f64)> {
    let pts = pts_per_edge.max(2);
    let mut points = Vec::with_capacity(pts * 4);

    let r0 = row0 as f64 + 0.5;
    let r1 = (row1 as f64 - 0.5).max(r0);
    let c0 = col0 as f64 + 0.5;
    let c1 = (col1 as f64 - 0.5).max(c0);
    let row_step = (r1 - r0) / (pts - 1) as f64;
    let col_step = (c1 - c0) / (pts - 1) as f64;

    for i in 0..pts {
        let c = (c0 + col_step * i as f64).min(c1);
        points.push((c, r0));
        points.push((c, r1));
    }
    for i in 1..pts - 1 {
        let r = r0 + row_step * i as f64;
        points.push((c0, r));
        points.push((c1, r));
    }
    points
}

/// Plan block-level warping from every source onto the destination grid.
///
/// Each transformer must already carry the destination geotransform.
/// `halo` widens the source area a block maps onto by the resampling
/// kernel's reach. A source whose block boundary fails to transform entirely
/// is kept as a candidate, since only per-pixel evaluation can tell whether
/// it covers the block.
pub fn plan_blocks(
    transformers: &[SpatialTransformer],
    src_shapes: &[(usize, usize)],
    dst_shape: (usize, usize),
    block_size: (usize, usize),
    halo: f64,
    pts_per_edge: usize,
    cutline: Option<&CutlineMask>,
) -> Result<Vec<BlockPlan>, WarpError> {
    let (dst_rows, dst_cols) = dst_shape;
    let (block_h, block_w) = block_size;
    if block_h == 0 || block_w == 0 {
        return Err(WarpError::Configuration("block size must be > 0".into()));
    }
    if transformers.len() != src_shapes.len() {
        return Err(WarpError::Configuration(format!(
            "{} transformers for {} sources",
            transformers.len(),
            src_shapes.len()
        )));
    }

    let mut plans = Vec::new();
    let mut row0 = 0;
    while row0 < dst_rows {
        let row1 = (row0 + block_h).min(dst_rows);
        let mut col0 = 0;
        while col0 < dst_cols {
            let col1 = (col0 + block_w).min(dst_cols);

            let masked_out = cutline
                .map(|m| m.window_is_empty(col0, row0, col1 - col0, row1 - row0))
                .unwrap_or(false);
            let sources = if masked_out {
                Vec::new()
            } else {
                let boundary = block_boundary_points(row0, row1, col0, col1, pts_per_edge);
                transformers
                    .iter()
                    .zip(src_shapes)
                    .enumerate()
                    .filter(|(_, (t, shape))| touches_source(t, **shape, &boundary, halo))
                    .map(|(i, _)| i)
                    .collect()
            };

            plans.push(BlockPlan {
                index: plans.len(),
                dst_slice: (row0, row1, col0, col1),
                dst_shape: (row1 - row0, col1 - col0),
                sources,
            });
            col0 = col1;
        }
        row0 = row1;
    }

    log::debug!(
        "planned {} blocks of {}x{} over {}x{} ({} with data)",
        plans.len(),
        block_w,
        block_h,
        dst_cols,
        dst_rows,
        plans.iter().filter(|p| p.has_data()).count()
    );
    Ok(plans)
}

/// True when the block boundary, mapped into source pixels and widened by
/// `halo`, overlaps the source.
fn touches_source(
    transformer: &SpatialTransformer,
    src_shape: (usize, usize),
    boundary: &[(f64, f64)],
    halo: f64,
) -> bool {
    let (src_rows, src_cols) = src_shape;
    let mut pts = boundary.to_vec();
    let ok = transformer.transform_points(Direction::DstToSrc, &mut pts);

    let mut min_col = f64::INFINITY;
    let mut max_col = f64::NEG_INFINITY;
    let mut min_row = f64::INFINITY;
    let mut max_row = f64::NEG_INFINITY;
    for (&(c, r), &valid) in pts.iter().zip(&ok) {
        if !valid {
            continue;
        }
        min_col = min_col.min(c);
        max_col = max_col.max(c);
        min_row = min_row.min(r);
        max_row = max_row.max(r);
    }

    if !min_col.is_finite() {
        return true;
    }

    let lo = |v: f64, n: usize| (v - halo).floor().clamp(0.0, n as f64);
    let hi = |v: f64, n: usize| ((v + halo).ceil() + 1.0).clamp(0.0, n as f64);
    hi(max_row, src_rows) > lo(min_row, src_rows) && hi(max_col, src_cols) > lo(min_col, src_cols)
}
