//! Raster storage collaborator.
//!
//! The warp core never touches files itself; drivers implement
//! [`RasterStore`] and hand rasters in and out.

use std::collections::HashMap;

use ndarray::{s, Array2, ArrayView2};

use crate::error::WarpError;
use crate::raster::{DataType, Raster};

pub trait RasterStore {
    /// Read a whole raster, bands and georeferencing included.
    fn open(&self, path: &str) -> Result<Raster, WarpError>;

    /// Create an empty raster, replacing anything stored at `path`.
    fn create(
        &mut self,
        path: &str,
        width: usize,
        height: usize,
        bands: usize,
        data_type: DataType,
    ) -> Result<(), WarpError>;

    /// Store georeferencing and per-band nodata alongside the pixels.
    fn write_metadata(&mut self, path: &str, template: &Raster) -> Result<(), WarpError>;

    /// Read a `(width, height)` window of 1-based `band` at `(col_off, row_off)`.
    fn read_block(
        &self,
        path: &str,
        band: usize,
        col_off: usize,
        row_off: usize,
        width: usize,
        height: usize,
    ) -> Result<Array2<f64>, WarpError>;

    fn write_block(
        &mut self,
        path: &str,
        band: usize,
        col_off: usize,
        row_off: usize,
        data: ArrayView2<'_, f64>,
    ) -> Result<(), WarpError>;
}

/// Rasters kept in a map keyed by path.
#[derive(Default)]
pub struct MemoryRasterStore {
    rasters: HashMap<String, Raster>,
}

impl MemoryRasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, raster: Raster) {
        self.rasters.insert(path.to_string(), raster);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.rasters.contains_key(path)
    }

    fn get(&self, path: &str) -> Result<&Raster, WarpError> {
        self.rasters
            .get(path)
            .ok_or_else(|| WarpError::Io(format!("{path}: no such raster")))
    }

    fn get_mut(&mut self, path: &str) -> Result<&mut Raster, WarpError> {
        self.rasters
            .get_mut(path)
            .ok_or_else(|| WarpError::Io(format!("{path}: no such raster")))
    }
}

fn check_window(
    raster: &Raster,
    path: &str,
    band: usize,
    col_off: usize,
    row_off: usize,
    width: usize,
    height: usize,
) -> Result<(), WarpError> {
    if band == 0 || band > raster.band_count() {
        return Err(WarpError::Io(format!(
            "{path}: band {band} out of range 1..={}",
            raster.band_count()
        )));
    }
    if col_off + width > raster.width() || row_off + height > raster.height() {
        return Err(WarpError::Io(format!(
            "{path}: window {col_off},{row_off} {width}x{height} outside {}x{}",
            raster.width(),
            raster.height()
        )));
    }
    Ok(())
}

impl RasterStore for MemoryRasterStore {
    fn open(&self, path: &str) -> Result<Raster, WarpError> {
        self.get(path).cloned()
    }

    fn create(
        &mut self,
        path: &str,
        width: usize,
        height: usize,
        bands: usize,
        data_type: DataType,
    ) -> Result<(), WarpError> {
        let raster = Raster::new(width, height, bands, data_type)?;
        self.rasters.insert(path.to_string(), raster);
        Ok(())
    }

    fn write_metadata(&mut self, path: &str, template: &Raster) -> Result<(), WarpError> {
        let raster = self.get_mut(path)?;
        raster.geotransform = template.geotransform;
        raster.srs = template.srs.clone();
        for (dst, src) in raster.bands.iter_mut().zip(&template.bands) {
            dst.nodata = src.nodata;
        }
        Ok(())
    }

    fn read_block(
        &self,
        path: &str,
        band: usize,
        col_off: usize,
        row_off: usize,
        width: usize,
        height: usize,
    ) -> Result<Array2<f64>, WarpError> {
        let raster = self.get(path)?;
        check_window(raster, path, band, col_off, row_off, width, height)?;
        let data = &raster.bands[band - 1].data;
        Ok(data
            .slice(s![row_off..row_off + height, col_off..col_off + width])
            .to_owned())
    }

    fn write_block(
        &mut self,
        path: &str,
        band: usize,
        col_off: usize,
        row_off: usize,
        data: ArrayView2<'_, f64>,
    ) -> Result<(), WarpError> {
        let (height, width) = data.dim();
        let raster = self.get_mut(path)?;
        check_window(raster, path, band, col_off, row_off, width, height)?;
        let target = &mut raster.bands[band - 1];
        let data_type = target.data_type;
        target
            .data
            .slice_mut(s![row_off..row_off + height, col_off..col_off + width])
            .zip_mut_with(&data, |dst, &v| *dst = data_type.coerce(v));
        Ok(())
    }
}
