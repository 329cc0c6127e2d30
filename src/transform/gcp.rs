//! Polynomial georeferencing fitted to ground control points.

use crate::error::TransformError;
use crate::raster::Gcp;
use crate::transform::linalg::{self, Polynomial};

/// Forward (pixel → geo) and inverse (geo → pixel) polynomials fitted
/// independently by least squares.
#[derive(Clone, Debug)]
pub struct PolynomialTransform {
    order: u8,
    to_geo_x: Polynomial,
    to_geo_y: Polynomial,
    to_pixel_x: Polynomial,
    to_pixel_y: Polynomial,
}

/// Order picked when the caller passes 0.
pub fn auto_order(gcp_count: usize) -> u8 {
    if gcp_count >= 10 {
        2
    } else {
        1
    }
}

impl PolynomialTransform {
    /// Fit a transform of `order` (1..=3, or 0 for automatic) to `gcps`.
    pub fn new(gcps: &[Gcp], order: u8) -> Result<Self, TransformError> {
        let order = if order == 0 {
            auto_order(gcps.len())
        } else {
            order
        };
        if !(1..=3).contains(&order) {
            return Err(TransformError::UnsupportedOrder(order));
        }
        let required = linalg::term_count(order);
        if gcps.len() < required {
            return Err(TransformError::InsufficientControlPoints {
                order,
                required,
                found: gcps.len(),
            });
        }

        let pixels: Vec<(f64, f64)> = gcps.iter().map(|g| (g.pixel, g.line)).collect();
        let geos: Vec<(f64, f64)> = gcps.iter().map(|g| (g.x, g.y)).collect();
        let xs: Vec<f64> = geos.iter().map(|g| g.0).collect();
        let ys: Vec<f64> = geos.iter().map(|g| g.1).collect();
        let cols: Vec<f64> = pixels.iter().map(|p| p.0).collect();
        let rows: Vec<f64> = pixels.iter().map(|p| p.1).collect();

        Ok(Self {
            order,
            to_geo_x: linalg::fit_polynomial(&pixels, &xs, order)?,
            to_geo_y: linalg::fit_polynomial(&pixels, &ys, order)?,
            to_pixel_x: linalg::fit_polynomial(&geos, &cols, order)?,
            to_pixel_y: linalg::fit_polynomial(&geos, &rows, order)?,
        })
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    pub fn pixel_to_geo(&self, px: f64, ln: f64) -> (f64, f64) {
        (self.to_geo_x.eval(px, ln), self.to_geo_y.eval(px, ln))
    }

    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (self.to_pixel_x.eval(x, y), self.to_pixel_y.eval(x, y))
    }
}
