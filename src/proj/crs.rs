use crate::error::ProjError;
use log::warn;
use proj4rs::errors::Error as Proj4Error;
use proj4rs::Proj;

/// Grid-free stand-ins for datums that proj4rs only knows through shift grids.
const DATUM_FALLBACKS: &[(&str, &str)] = &[(
    "+datum=NAD27",
    "+ellps=clrk66 +towgs84=-8,160,176,0,0,0,0",
)];

/// Thin wrapper around proj4rs that handles radians/degrees conversion transparently.
///
/// proj4rs uses radians for geographic CRS, but our affine transforms produce
/// degrees for EPSG:4326-like CRS. This wrapper auto-converts.
pub struct CrsTransform {
    src: Proj,
    dst: Proj,
    src_is_geo: bool,
    dst_is_geo: bool,
}

/// Resolve a CRS string (EPSG code or PROJ string) into a proj4rs definition.
///
/// Datums whose shift grids are not bundled fall back to a three-parameter
/// `+towgs84` shift.
pub fn resolve(crs: &str) -> Result<Proj, ProjError> {
    let crs = crs.trim();
    match Proj::from_user_string(crs) {
        Ok(proj) => Ok(proj),
        Err(Proj4Error::NadGridNotAvailable) => resolve_without_grids(crs),
        Err(e) => Err(ProjError::UnknownCrs(format!("{crs}: {e}"))),
    }
}

fn proj_string(crs: &str) -> Option<String> {
    if crs.starts_with('+') {
        return Some(crs.to_string());
    }
    let (auth, code) = crs.split_once(':')?;
    if !auth.trim().eq_ignore_ascii_case("EPSG") {
        return None;
    }
    let code = code.trim().parse::<u16>().ok()?;
    crs_definitions::from_code(code).map(|def| def.proj4.to_string())
}

fn resolve_without_grids(crs: &str) -> Result<Proj, ProjError> {
    let missing = || ProjError::UnknownCrs(format!("{crs}: {}", Proj4Error::NadGridNotAvailable));
    let definition = proj_string(crs).ok_or_else(missing)?;
    let (datum, shift) = DATUM_FALLBACKS
        .iter()
        .find(|(datum, _)| definition.split_whitespace().any(|p| p == *datum))
        .ok_or_else(missing)?;
    let replaced = definition
        .split_whitespace()
        .map(|p| if p == *datum { *shift } else { p })
        .collect::<Vec<_>>()
        .join(" ");
    warn!("{crs}: datum shift grid unavailable, using {shift}");
    Proj::from_proj_string(&replaced).map_err(|e| ProjError::UnknownCrs(format!("{crs}: {e}")))
}

impl CrsTransform {
    /// Create a new CRS transform from source and destination CRS strings.
    ///
    /// Accepts EPSG codes ("EPSG:4326") or PROJ strings ("+proj=utm +zone=33 ...").
    pub fn new(src_crs: &str, dst_crs: &str) -> Result<Self, ProjError> {
        let src = resolve(src_crs)?;
        let dst = resolve(dst_crs)?;
        let src_is_geo = src.is_latlong();
        let dst_is_geo = dst.is_latlong();
        Ok(Self {
            src,
            dst,
            src_is_geo,
            dst_is_geo,
        })
    }

    /// Transform a single point from destination CRS to source CRS.
    ///
    /// This is the direction the warp engine needs: given an output pixel
    /// coordinate in dst CRS, find the corresponding source CRS coordinate.
    pub fn transform_inv(&self, x: f64, y: f64) -> Result<(f64, f64), ProjError> {
        convert(&self.dst, self.dst_is_geo, &self.src, self.src_is_geo, x, y)
    }

    /// Transform a single point from source CRS to destination CRS.
    pub fn transform_fwd(&self, x: f64, y: f64) -> Result<(f64, f64), ProjError> {
        convert(&self.src, self.src_is_geo, &self.dst, self.dst_is_geo, x, y)
    }
}

/// Input/output coordinates are in CRS native units (degrees for geographic,
/// metres for projected). The radians conversion is handled here.
fn convert(
    from: &Proj,
    from_is_geo: bool,
    to: &Proj,
    to_is_geo: bool,
    x: f64,
    y: f64,
) -> Result<(f64, f64), ProjError> {
    let mut point = if from_is_geo {
        (x.to_radians(), y.to_radians())
    } else {
        (x, y)
    };

    proj4rs::transform::transform(from, to, &mut point)
        .map_err(|e| ProjError::TransformFailed(e.to_string()))?;

    let out = if to_is_geo {
        (point.0.to_degrees(), point.1.to_degrees())
    } else {
        (point.0, point.1)
    };
    if out.0.is_finite() && out.1.is_finite() {
        Ok(out)
    } else {
        Err(ProjError::TransformFailed(format!(
            "({x}, {y}) has no finite image"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_roundtrip_4326_to_32611() {
        // Southern California, inside UTM zone 11
        let ct = CrsTransform::new("EPSG:4326", "EPSG:32611").unwrap();

        let (e, n) = ct.transform_fwd(-117.63, 33.90).unwrap();
        assert!(e > 400_000.0 && e < 500_000.0, "easting out of range: {e}");
        assert!(n > 3_700_000.0 && n < 3_800_000.0, "northing out of range: {n}");

        let (lon, lat) = ct.transform_inv(e, n).unwrap();
        assert_relative_eq!(lon, -117.63, epsilon = 1e-8);
        assert_relative_eq!(lat, 33.90, epsilon = 1e-8);
    }

    #[test]
    fn test_invalid_crs() {
        let result = CrsTransform::new("EPSG:99999", "EPSG:4326");
        assert!(matches!(result, Err(ProjError::UnknownCrs(_))));
    }

    #[test]
    fn test_nad27_without_grids() {
        let geographic = resolve("EPSG:4267").unwrap();
        assert!(geographic.is_latlong());
        resolve("EPSG:26711").unwrap();
        resolve("+proj=utm +zone=11 +datum=NAD27 +units=m +no_defs").unwrap();
    }

    #[test]
    fn test_nad27_utm_close_to_wgs84_utm() {
        // The NAD27 to WGS84 shift in southern California is a few hundred metres
        let ct = CrsTransform::new("EPSG:26711", "EPSG:32611").unwrap();
        let (e, n) = ct.transform_fwd(441000.0, 3750000.0).unwrap();
        assert!((e - 441000.0).abs() < 300.0, "easting shift too large: {e}");
        assert!((n - 3750000.0).abs() < 300.0, "northing shift too large: {n}");
        let (x, y) = ct.transform_inv(e, n).unwrap();
        assert_relative_eq!(x, 441000.0, epsilon = 1e-4);
        assert_relative_eq!(y, 3750000.0, epsilon = 1e-4);
    }

    #[test]
    fn test_projected_to_projected() {
        // UTM 11N to Web Mercator (both projected, no degree conversion)
        let ct = CrsTransform::new("EPSG:32611", "EPSG:3857").unwrap();
        let (x, y) = ct.transform_fwd(441000.0, 3750000.0).unwrap();
        assert!(x.abs() < 20_000_000.0, "x out of range: {x}");
        assert!(y.abs() < 20_000_000.0, "y out of range: {y}");
    }
}
