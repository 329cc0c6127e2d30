//! Georeferencing through per-sample geolocation arrays.
//!
//! Forward lookups interpolate the arrays bilinearly. Inverse lookups start
//! from a coarse backmap (geo cell → array index) built once, then refine
//! with Newton iterations on the bilinear surface.

use ndarray::Array2;

use crate::error::TransformError;
use crate::raster::GeolocationArrays;

const NEWTON_ITERATIONS: usize = 20;
const NEWTON_TOLERANCE: f64 = 1e-9;
const HOLE_FILL_PASSES: usize = 8;

#[derive(Clone, Debug)]
struct BackMap {
    min_x: f64,
    max_y: f64,
    cell_w: f64,
    cell_h: f64,
    /// Array index (column, row) seeded for each backmap cell; NaN when unknown.
    seeds: Array2<(f64, f64)>,
}

#[derive(Clone, Debug)]
pub struct GeolocationTransform {
    arrays: GeolocationArrays,
    backmap: BackMap,
}

/// Bilinear surface value and its partial derivatives at fractional index (j, i).
struct Sample {
    x: f64,
    y: f64,
    dx_dj: f64,
    dx_di: f64,
    dy_dj: f64,
    dy_di: f64,
}

impl GeolocationTransform {
    pub fn new(arrays: GeolocationArrays) -> Result<Self, TransformError> {
        let (rows, cols) = arrays.x.dim();
        if arrays.y.dim() != (rows, cols) {
            return Err(TransformError::InvalidGeolocation(
                "x and y arrays differ in shape".into(),
            ));
        }
        if rows < 2 || cols < 2 {
            return Err(TransformError::InvalidGeolocation(format!(
                "arrays must be at least 2x2, got {cols}x{rows}"
            )));
        }
        if arrays.pixel_step == 0.0 || arrays.line_step == 0.0 {
            return Err(TransformError::InvalidGeolocation("zero sample step".into()));
        }
        let backmap = build_backmap(&arrays)?;
        Ok(Self { arrays, backmap })
    }

    pub fn srs(&self) -> Option<&str> {
        self.arrays.srs.as_deref()
    }

    pub fn pixel_to_geo(&self, px: f64, ln: f64) -> Option<(f64, f64)> {
        let j = (px - self.arrays.pixel_offset) / self.arrays.pixel_step;
        let i = (ln - self.arrays.line_offset) / self.arrays.line_step;
        self.sample(j, i).map(|s| (s.x, s.y))
    }

    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (mut j, mut i) = self.seed(x, y)?;
        let (rows, cols) = self.arrays.x.dim();

        let mut converged = false;
        for _ in 0..NEWTON_ITERATIONS {
            let s = self.sample(j, i)?;
            let rx = x - s.x;
            let ry = y - s.y;
            let det = s.dx_dj * s.dy_di - s.dx_di * s.dy_dj;
            if det.abs() < f64::MIN_POSITIVE {
                return None;
            }
            let dj = (rx * s.dy_di - ry * s.dx_di) / det;
            let di = (ry * s.dx_dj - rx * s.dy_dj) / det;
            j += dj;
            i += di;
            if dj.abs() < NEWTON_TOLERANCE && di.abs() < NEWTON_TOLERANCE {
                converged = true;
                break;
            }
        }
        if !converged {
            return None;
        }
        // Allow one sample of extrapolation past the array border.
        if j < -1.0 || i < -1.0 || j > cols as f64 || i > rows as f64 {
            return None;
        }
        Some((
            self.arrays.pixel_offset + j * self.arrays.pixel_step,
            self.arrays.line_offset + i * self.arrays.line_step,
        ))
    }

    fn seed(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let bm = &self.backmap;
        let (rows, cols) = bm.seeds.dim();
        let c = ((x - bm.min_x) / bm.cell_w).floor();
        let r = ((bm.max_y - y) / bm.cell_h).floor();
        if c < -1.0 || r < -1.0 || c > cols as f64 || r > rows as f64 {
            return None;
        }
        let c = (c.max(0.0) as usize).min(cols - 1);
        let r = (r.max(0.0) as usize).min(rows - 1);
        let seed = bm.seeds[(r, c)];
        if seed.0.is_nan() {
            None
        } else {
            Some(seed)
        }
    }

    /// Bilinear evaluation; positions outside the array extrapolate from the edge cell.
    fn sample(&self, j: f64, i: f64) -> Option<Sample> {
        if !j.is_finite() || !i.is_finite() {
            return None;
        }
        let (rows, cols) = self.arrays.x.dim();
        let j0 = (j.floor().max(0.0) as usize).min(cols - 2);
        let i0 = (i.floor().max(0.0) as usize).min(rows - 2);
        let tj = j - j0 as f64;
        let ti = i - i0 as f64;

        let corner = |a: &Array2<f64>| {
            [
                a[(i0, j0)],
                a[(i0, j0 + 1)],
                a[(i0 + 1, j0)],
                a[(i0 + 1, j0 + 1)],
            ]
        };
        let xs = corner(&self.arrays.x);
        let ys = corner(&self.arrays.y);
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return None;
        }

        let eval = |f: [f64; 4]| {
            let v = (1.0 - tj) * (1.0 - ti) * f[0]
                + tj * (1.0 - ti) * f[1]
                + (1.0 - tj) * ti * f[2]
                + tj * ti * f[3];
            let dj = (1.0 - ti) * (f[1] - f[0]) + ti * (f[3] - f[2]);
            let di = (1.0 - tj) * (f[2] - f[0]) + tj * (f[3] - f[1]);
            (v, dj, di)
        };
        let (x, dx_dj, dx_di) = eval(xs);
        let (y, dy_dj, dy_di) = eval(ys);
        Some(Sample {
            x,
            y,
            dx_dj,
            dx_di,
            dy_dj,
            dy_di,
        })
    }
}

fn build_backmap(arrays: &GeolocationArrays) -> Result<BackMap, TransformError> {
    let (rows, cols) = arrays.x.dim();
    let mut min_x = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for (&x, &y) in arrays.x.iter().zip(arrays.y.iter()) {
        if x.is_finite() && y.is_finite() {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }
    if !min_x.is_finite() {
        return Err(TransformError::InvalidGeolocation(
            "arrays contain no valid samples".into(),
        ));
    }

    // Same cell count as the arrays; degenerate extents get a unit cell.
    let cell_w = match (max_x - min_x) / cols as f64 {
        w if w > 0.0 => w,
        _ => 1.0,
    };
    let cell_h = match (max_y - min_y) / rows as f64 {
        h if h > 0.0 => h,
        _ => 1.0,
    };

    let mut sums = Array2::<(f64, f64, f64)>::from_elem((rows, cols), (0.0, 0.0, 0.0));
    for ((i, j), &x) in arrays.x.indexed_iter() {
        let y = arrays.y[(i, j)];
        if !x.is_finite() || !y.is_finite() {
            continue;
        }
        let c = (((x - min_x) / cell_w) as usize).min(cols - 1);
        let r = (((max_y - y) / cell_h) as usize).min(rows - 1);
        let cell = &mut sums[(r, c)];
        cell.0 += j as f64;
        cell.1 += i as f64;
        cell.2 += 1.0;
    }

    let mut seeds = sums.mapv(|(sj, si, n)| {
        if n > 0.0 {
            (sj / n, si / n)
        } else {
            (f64::NAN, f64::NAN)
        }
    });

    for _ in 0..HOLE_FILL_PASSES {
        let snapshot = seeds.clone();
        let mut filled_any = false;
        for ((r, c), seed) in seeds.indexed_iter_mut() {
            if !seed.0.is_nan() {
                continue;
            }
            let mut acc = (0.0, 0.0, 0.0);
            for dr in -1i64..=1 {
                for dc in -1i64..=1 {
                    let rr = r as i64 + dr;
                    let cc = c as i64 + dc;
                    if rr < 0 || cc < 0 || rr >= rows as i64 || cc >= cols as i64 {
                        continue;
                    }
                    let n = snapshot[(rr as usize, cc as usize)];
                    if !n.0.is_nan() {
                        acc.0 += n.0;
                        acc.1 += n.1;
                        acc.2 += 1.0;
                    }
                }
            }
            if acc.2 > 0.0 {
                *seed = (acc.0 / acc.2, acc.1 / acc.2);
                filled_any = true;
            }
        }
        if !filled_any {
            break;
        }
    }

    Ok(BackMap {
        min_x,
        max_y,
        cell_w,
        cell_h,
        seeds,
    })
}
