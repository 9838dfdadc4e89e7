use crate::types::{GeoPos, GeoTransform, RefineError, RefineResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// How a product maps pixels to geographic positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeocodingKind {
    /// Per-pixel latitude/longitude rasters
    PixelGrid,
    /// Sub-sampled tie-point grids
    TiePoint,
    /// Affine map projection
    Crs,
    Other,
}

/// Pixel to geographic position lookup
pub trait Geocoding: Send + Sync {
    fn kind(&self) -> GeocodingKind;

    /// Position of the fractional pixel coordinate (x, y), `None` if unknown
    fn pixel_to_geo(&self, x: f64, y: f64) -> Option<GeoPos>;

    /// Latitude at the centre of pixel (x, y)
    fn latitude(&self, x: usize, y: usize) -> Option<f64> {
        self.pixel_to_geo(x as f64 + 0.5, y as f64 + 0.5).map(|p| p.lat)
    }
}

/// Geographic (lat/lon) grid described by an affine transform
#[derive(Debug, Clone)]
pub struct CrsGeocoding {
    transform: GeoTransform,
}

impl CrsGeocoding {
    /// `transform` maps pixels to (lon, lat) in degrees
    pub fn new(transform: GeoTransform) -> Self {
        Self { transform }
    }

    /// North-up grid starting at the upper-left corner
    pub fn north_up(upper_left: GeoPos, pixel_size_deg: f64) -> Self {
        Self::new(GeoTransform {
            top_left_x: upper_left.lon,
            pixel_width: pixel_size_deg,
            rotation_x: 0.0,
            top_left_y: upper_left.lat,
            rotation_y: 0.0,
            pixel_height: -pixel_size_deg,
        })
    }
}

impl Geocoding for CrsGeocoding {
    fn kind(&self) -> GeocodingKind {
        GeocodingKind::Crs
    }

    fn pixel_to_geo(&self, x: f64, y: f64) -> Option<GeoPos> {
        let (lon, lat) = self.transform.apply(x, y);
        if lat.is_finite() && lon.is_finite() {
            Some(GeoPos { lat, lon })
        } else {
            None
        }
    }
}

/// Latitude/longitude grids sampled every `step` pixels, bilinearly interpolated
#[derive(Debug, Clone)]
pub struct TiePointGeocoding {
    lat: Array2<f32>,
    lon: Array2<f32>,
    step_x: f64,
    step_y: f64,
}

impl TiePointGeocoding {
    pub fn new(lat: Array2<f32>, lon: Array2<f32>, step_x: f64, step_y: f64) -> RefineResult<Self> {
        if lat.dim() != lon.dim() {
            return Err(RefineError::ShapeMismatch {
                band: "tie-point longitude".to_string(),
                expected: lat.dim(),
                actual: lon.dim(),
            });
        }
        if lat.is_empty() || step_x <= 0.0 || step_y <= 0.0 {
            return Err(RefineError::InvalidConfig(
                "tie-point grid needs samples and positive steps".to_string(),
            ));
        }
        Ok(Self { lat, lon, step_x, step_y })
    }

    fn interpolate(grid: &Array2<f32>, gx: f64, gy: f64) -> f64 {
        let (rows, cols) = grid.dim();
        let gx = gx.clamp(0.0, (cols - 1) as f64);
        let gy = gy.clamp(0.0, (rows - 1) as f64);
        let j0 = gx.floor() as usize;
        let i0 = gy.floor() as usize;
        let j1 = (j0 + 1).min(cols - 1);
        let i1 = (i0 + 1).min(rows - 1);
        let fx = gx - j0 as f64;
        let fy = gy - i0 as f64;

        let top = grid[[i0, j0]] as f64 * (1.0 - fx) + grid[[i0, j1]] as f64 * fx;
        let bottom = grid[[i1, j0]] as f64 * (1.0 - fx) + grid[[i1, j1]] as f64 * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

impl Geocoding for TiePointGeocoding {
    fn kind(&self) -> GeocodingKind {
        GeocodingKind::TiePoint
    }

    fn pixel_to_geo(&self, x: f64, y: f64) -> Option<GeoPos> {
        let gx = x / self.step_x;
        let gy = y / self.step_y;
        let lat = Self::interpolate(&self.lat, gx, gy);
        let lon = Self::interpolate(&self.lon, gx, gy);
        if lat.is_finite() && lon.is_finite() {
            Some(GeoPos { lat, lon })
        } else {
            None
        }
    }
}

/// Full-resolution latitude/longitude rasters
#[derive(Debug, Clone)]
pub struct PixelGeocoding {
    lat: Array2<f32>,
    lon: Array2<f32>,
}

impl PixelGeocoding {
    pub fn new(lat: Array2<f32>, lon: Array2<f32>) -> RefineResult<Self> {
        if lat.dim() != lon.dim() {
            return Err(RefineError::ShapeMismatch {
                band: "pixel longitude".to_string(),
                expected: lat.dim(),
                actual: lon.dim(),
            });
        }
        Ok(Self { lat, lon })
    }
}

impl Geocoding for PixelGeocoding {
    fn kind(&self) -> GeocodingKind {
        GeocodingKind::PixelGrid
    }

    fn pixel_to_geo(&self, x: f64, y: f64) -> Option<GeoPos> {
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let lat = *self.lat.get([y as usize, x as usize])? as f64;
        let lon = *self.lon.get([y as usize, x as usize])? as f64;
        if lat.is_nan() || lon.is_nan() {
            return None;
        }
        Some(GeoPos { lat, lon })
    }
}
