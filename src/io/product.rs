use crate::io::geocoding::Geocoding;
use crate::types::{FlagValue, RasterTile, Rect, RefineError, RefineResult};
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::Arc;

/// Floating-point input rasters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Band {
    /// Water fraction in percent, values above 100 are no-data
    WaterFraction,
    SunZenith,
    SunAzimuth,
    /// Terrain altitude in meters
    Altitude,
    Latitude,
    Longitude,
    /// Cloud-top pressure in hPa
    CloudTopPressure,
    /// Reflectance band used for shadow clustering (band A)
    ReflectancePrimary,
    /// Reflectance band used for shadow clustering (band B)
    ReflectanceSecondary,
    Named(String),
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Band::WaterFraction => write!(f, "water_fraction"),
            Band::SunZenith => write!(f, "sun_zenith"),
            Band::SunAzimuth => write!(f, "sun_azimuth"),
            Band::Altitude => write!(f, "altitude"),
            Band::Latitude => write!(f, "latitude"),
            Band::Longitude => write!(f, "longitude"),
            Band::CloudTopPressure => write!(f, "cloud_top_pressure"),
            Band::ReflectancePrimary => write!(f, "reflectance_a"),
            Band::ReflectanceSecondary => write!(f, "reflectance_b"),
            Band::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Integer flag rasters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagBand {
    /// Preliminary classification
    Classification,
    /// Buffer flags produced by an earlier buffering stage
    CloudBuffer,
}

impl std::fmt::Display for FlagBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagBand::Classification => write!(f, "pixel_classif_flags"),
            FlagBand::CloudBuffer => write!(f, "cloud_buffer_flags"),
        }
    }
}

/// Read access to the rasters of a scene
pub trait RasterSource: Send + Sync {
    /// Scene (width, height)
    fn scene_size(&self) -> (usize, usize);

    fn has_band(&self, band: &Band) -> bool;

    fn has_flag_band(&self, band: FlagBand) -> bool;

    fn fetch_samples(&self, band: &Band, rect: Rect) -> RefineResult<RasterTile<f32>>;

    fn fetch_flags(&self, band: FlagBand, rect: Rect) -> RefineResult<RasterTile<FlagValue>>;

    fn geocoding(&self) -> Option<&dyn Geocoding>;

    fn scene_rect(&self) -> Rect {
        let (width, height) = self.scene_size();
        Rect::scene(width, height)
    }

    /// Fetch when present, `None` otherwise
    fn fetch_optional(&self, band: &Band, rect: Rect) -> RefineResult<Option<RasterTile<f32>>> {
        if self.has_band(band) {
            self.fetch_samples(band, rect).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Scene held entirely in memory
#[derive(Clone)]
pub struct MemoryProduct {
    width: usize,
    height: usize,
    bands: HashMap<Band, Array2<f32>>,
    flags: HashMap<FlagBand, Array2<FlagValue>>,
    geocoding: Option<Arc<dyn Geocoding>>,
}

impl MemoryProduct {
    /// Product built around its classification flags
    pub fn new(classification: Array2<FlagValue>) -> Self {
        let (height, width) = classification.dim();
        let mut flags = HashMap::new();
        flags.insert(FlagBand::Classification, classification);
        Self {
            width,
            height,
            bands: HashMap::new(),
            flags,
            geocoding: None,
        }
    }

    fn check_shape(&self, name: String, dim: (usize, usize)) -> RefineResult<()> {
        if dim != (self.height, self.width) {
            return Err(RefineError::ShapeMismatch {
                band: name,
                expected: (self.height, self.width),
                actual: dim,
            });
        }
        Ok(())
    }

    pub fn with_band(mut self, band: Band, data: Array2<f32>) -> RefineResult<Self> {
        self.check_shape(band.to_string(), data.dim())?;
        self.bands.insert(band, data);
        Ok(self)
    }

    pub fn with_flag_band(mut self, band: FlagBand, data: Array2<FlagValue>) -> RefineResult<Self> {
        self.check_shape(band.to_string(), data.dim())?;
        self.flags.insert(band, data);
        Ok(self)
    }

    pub fn with_geocoding(mut self, geocoding: Arc<dyn Geocoding>) -> Self {
        self.geocoding = Some(geocoding);
        self
    }

    fn window<T: Clone>(&self, name: String, data: &Array2<T>, rect: Rect) -> RefineResult<RasterTile<T>> {
        if !self.scene_rect().contains_rect(&rect) {
            return Err(RefineError::Processing(format!(
                "Window {:?} of band {} outside scene {}x{}",
                rect, name, self.width, self.height
            )));
        }
        let view = data.slice(ndarray::s![rect.y..rect.bottom(), rect.x..rect.right()]);
        RasterTile::new(rect, view.to_owned(), &name)
    }
}

impl RasterSource for MemoryProduct {
    fn scene_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn has_band(&self, band: &Band) -> bool {
        self.bands.contains_key(band)
    }

    fn has_flag_band(&self, band: FlagBand) -> bool {
        self.flags.contains_key(&band)
    }

    fn fetch_samples(&self, band: &Band, rect: Rect) -> RefineResult<RasterTile<f32>> {
        let data = self
            .bands
            .get(band)
            .ok_or_else(|| RefineError::MissingBand(band.to_string()))?;
        self.window(band.to_string(), data, rect)
    }

    fn fetch_flags(&self, band: FlagBand, rect: Rect) -> RefineResult<RasterTile<FlagValue>> {
        let data = self
            .flags
            .get(&band)
            .ok_or_else(|| RefineError::MissingBand(band.to_string()))?;
        self.window(band.to_string(), data, rect)
    }

    fn geocoding(&self) -> Option<&dyn Geocoding> {
        self.geocoding.as_deref()
    }
}
