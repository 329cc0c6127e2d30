//! Cutline polygons and their rasterized destination masks.
//!
//! Rings are filled with the even-odd rule along each destination row at
//! pixel-centre height. With `all_touched` every pixel crossed by a ring
//! edge is added as well, so partially covered pixels are kept.

use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use ndarray::Array2;

use crate::affine::Affine;
use crate::error::{GeometryError, WarpError};
use crate::proj::pipeline::Pipeline;

/// A polygon (or multipolygon) used to clip the warp output.
#[derive(Clone, Debug)]
pub struct Cutline {
    pub geometry: MultiPolygon<f64>,
    /// Reference of the vertex coordinates; `None` means the destination's.
    pub srs: Option<String>,
}

impl Cutline {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self {
            geometry,
            srs: None,
        }
    }

    pub fn from_polygon(polygon: Polygon<f64>) -> Self {
        Self::new(MultiPolygon::new(vec![polygon]))
    }

    /// Single-ring cutline from `(x, y)` vertices.
    pub fn from_exterior(points: &[(f64, f64)]) -> Self {
        let ring: LineString<f64> = points.iter().map(|&(x, y)| Coord { x, y }).collect();
        Self::from_polygon(Polygon::new(ring, vec![]))
    }

    pub fn with_srs(mut self, srs: &str) -> Self {
        self.srs = Some(srs.to_string());
        self
    }

    /// Check every ring: at least three distinct vertices, non-zero area and
    /// no crossing edges.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.geometry.0.is_empty() {
            return Err(GeometryError::Empty);
        }
        for (p, polygon) in self.geometry.0.iter().enumerate() {
            for (r, ring) in rings(polygon).enumerate() {
                let pts = open_ring(ring);
                let label = format!("polygon {p} ring {r}");
                if pts.len() < 3 {
                    return Err(GeometryError::InvalidGeometry(format!(
                        "{label} has fewer than 3 distinct vertices"
                    )));
                }
                if shoelace(&pts).abs() <= f64::EPSILON {
                    return Err(GeometryError::InvalidGeometry(format!("{label} has zero area")));
                }
                if let Some((a, b)) = first_self_intersection(&pts) {
                    return Err(GeometryError::InvalidGeometry(format!(
                        "{label} self-intersects between edges {a} and {b}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Vertex rings carried into `dst_srs`.
    fn rings_in(&self, dst_srs: Option<&str>) -> Result<Vec<Vec<(f64, f64)>>, WarpError> {
        let pipeline = Pipeline::new(self.srs.as_deref(), dst_srs)?;
        let mut out = Vec::new();
        for polygon in &self.geometry.0 {
            for ring in rings(polygon) {
                let pts = open_ring(ring)
                    .into_iter()
                    .map(|(x, y)| pipeline.transform_fwd(x, y))
                    .collect::<Result<Vec<_>, _>>()?;
                out.push(pts);
            }
        }
        Ok(out)
    }

    /// Bounding box `[minx, miny, maxx, maxy]` of the cutline in `dst_srs`.
    pub fn extent_in(&self, dst_srs: Option<&str>) -> Result<[f64; 4], WarpError> {
        let mut ext = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
        for ring in self.rings_in(dst_srs)? {
            for (x, y) in ring {
                ext[0] = ext[0].min(x);
                ext[1] = ext[1].min(y);
                ext[2] = ext[2].max(x);
                ext[3] = ext[3].max(y);
            }
        }
        if !ext[0].is_finite() {
            return Err(GeometryError::Empty.into());
        }
        Ok(ext)
    }
}

fn rings(polygon: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.interiors().iter())
}

/// Ring vertices without the closing repeat and without consecutive duplicates.
fn open_ring(ring: &LineString<f64>) -> Vec<(f64, f64)> {
    let mut pts: Vec<(f64, f64)> = Vec::with_capacity(ring.0.len());
    for c in ring.coords() {
        if pts.last() != Some(&(c.x, c.y)) {
            pts.push((c.x, c.y));
        }
    }
    while pts.len() > 1 && pts.first() == pts.last() {
        pts.pop();
    }
    pts
}

fn shoelace(pts: &[(f64, f64)]) -> f64 {
    let n = pts.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = pts[i];
            let (x1, y1) = pts[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum::<f64>()
        / 2.0
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

fn on_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> bool {
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

fn segments_intersect(p1: (f64, f64), p2: (f64, f64), q1: (f64, f64), q2: (f64, f64)) -> bool {
    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(p1, q1, q2))
        || (d2 == 0.0 && on_segment(p2, q1, q2))
        || (d3 == 0.0 && on_segment(q1, p1, p2))
        || (d4 == 0.0 && on_segment(q2, p1, p2))
}

/// First pair of non-adjacent edges that touch or cross.
fn first_self_intersection(pts: &[(f64, f64)]) -> Option<(usize, usize)> {
    let n = pts.len();
    for i in 0..n {
        let (a0, a1) = (pts[i], pts[(i + 1) % n]);
        for j in i + 2..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            let (b0, b1) = (pts[j], pts[(j + 1) % n]);
            if segments_intersect(a0, a1, b0, b1) {
                return Some((i, j));
            }
        }
    }
    None
}

/// Per-pixel inclusion mask over a destination grid.
#[derive(Clone, Debug)]
pub struct CutlineMask {
    mask: Array2<bool>,
}

impl CutlineMask {
    /// Rasterize `cutline` onto the `width`×`height` grid described by `dst_gt`
    /// in `dst_srs`.
    pub fn build(
        cutline: &Cutline,
        dst_gt: &Affine,
        width: usize,
        height: usize,
        dst_srs: Option<&str>,
        all_touched: bool,
    ) -> Result<Self, WarpError> {
        cutline.validate()?;
        let inv = dst_gt.inverse()?;
        let rings: Vec<Vec<(f64, f64)>> = cutline
            .rings_in(dst_srs)?
            .into_iter()
            .map(|ring| ring.into_iter().map(|(x, y)| inv.forward(x, y)).collect())
            .collect();

        let mut mask = Array2::from_elem((height, width), false);
        fill_centres(&rings, &mut mask);
        if all_touched {
            for ring in &rings {
                let n = ring.len();
                for i in 0..n {
                    mark_segment(ring[i], ring[(i + 1) % n], &mut mask);
                }
            }
        }

        let out = Self { mask };
        log::debug!(
            "cutline mask {}x{}: {} pixels included (all_touched={})",
            width,
            height,
            out.included_count(),
            all_touched
        );
        Ok(out)
    }

    /// Whether destination pixel `(col, row)` is inside the cutline.
    pub fn contains(&self, col: usize, row: usize) -> bool {
        self.mask.get((row, col)).copied().unwrap_or(false)
    }

    pub fn included_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// True when no pixel of the window is inside.
    pub fn window_is_empty(&self, col0: usize, row0: usize, width: usize, height: usize) -> bool {
        let (rows, cols) = self.mask.dim();
        let r1 = (row0 + height).min(rows);
        let c1 = (col0 + width).min(cols);
        if row0 >= r1 || col0 >= c1 {
            return true;
        }
        !self
            .mask
            .slice(ndarray::s![row0..r1, col0..c1])
            .iter()
            .any(|&m| m)
    }
}

/// Even-odd fill of pixel centres, one scanline per row.
fn fill_centres(rings: &[Vec<(f64, f64)>], mask: &mut Array2<bool>) {
    let (rows, cols) = mask.dim();
    let mut crossings = Vec::new();
    for r in 0..rows {
        let y = r as f64 + 0.5;
        crossings.clear();
        for ring in rings {
            let n = ring.len();
            for i in 0..n {
                let (x0, y0) = ring[i];
                let (x1, y1) = ring[(i + 1) % n];
                if (y0 > y) != (y1 > y) {
                    crossings.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
                }
            }
        }
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            // Columns whose centre c + 0.5 lies in [xa, xb).
            let c0 = (pair[0] - 0.5).ceil().max(0.0);
            let c1 = (pair[1] - 0.5).ceil().min(cols as f64);
            if c1 <= c0 {
                continue;
            }
            for c in c0 as usize..c1 as usize {
                mask[(r, c)] = true;
            }
        }
    }
}

/// Clip segment `a`-`b` to `[0, cols] × [0, rows]` (Liang-Barsky).
fn clip_segment(
    a: (f64, f64),
    b: (f64, f64),
    cols: f64,
    rows: f64,
) -> Option<((f64, f64), (f64, f64))> {
    if !(a.0.is_finite() && a.1.is_finite() && b.0.is_finite() && b.1.is_finite()) {
        return None;
    }
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, a.0), (dx, cols - a.0), (-dy, a.1), (dy, rows - a.1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else if p < 0.0 {
            t0 = t0.max(q / p);
        } else {
            t1 = t1.min(q / p);
        }
    }
    (t0 <= t1).then(|| {
        (
            (a.0 + t0 * dx, a.1 + t0 * dy),
            (a.0 + t1 * dx, a.1 + t1 * dy),
        )
    })
}

/// Mark every pixel the segment passes through (grid traversal), walking
/// only the part that lies on the grid.
fn mark_segment(a: (f64, f64), b: (f64, f64), mask: &mut Array2<bool>) {
    let (rows, cols) = mask.dim();
    let Some((a, b)) = clip_segment(a, b, cols as f64, rows as f64) else {
        return;
    };
    let mut set = |cx: i64, cy: i64| {
        if cx >= 0 && cy >= 0 && (cx as usize) < cols && (cy as usize) < rows {
            mask[(cy as usize, cx as usize)] = true;
        }
    };

    let (mut cx, mut cy) = (a.0.floor() as i64, a.1.floor() as i64);
    let (ex, ey) = (b.0.floor() as i64, b.1.floor() as i64);
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let step_x: i64 = if dx > 0.0 { 1 } else { -1 };
    let step_y: i64 = if dy > 0.0 { 1 } else { -1 };

    let t_delta_x = if dx != 0.0 { (1.0 / dx).abs() } else { f64::INFINITY };
    let t_delta_y = if dy != 0.0 { (1.0 / dy).abs() } else { f64::INFINITY };
    let mut t_max_x = if dx > 0.0 {
        ((cx + 1) as f64 - a.0) / dx
    } else if dx < 0.0 {
        (cx as f64 - a.0) / dx
    } else {
        f64::INFINITY
    };
    let mut t_max_y = if dy > 0.0 {
        ((cy + 1) as f64 - a.1) / dy
    } else if dy < 0.0 {
        (cy as f64 - a.1) / dy
    } else {
        f64::INFINITY
    };

    set(cx, cy);
    let steps = (ex - cx).abs() + (ey - cy).abs();
    for _ in 0..steps {
        if t_max_x < t_max_y {
            cx += step_x;
            t_max_x += t_delta_x;
        } else {
            cy += step_y;
            t_max_y += t_delta_y;
        }
        set(cx, cy);
    }
}
