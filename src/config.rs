//! Refinement configuration
//!
//! All parameters are passed explicitly to the processors; nothing is read
//! from global state. Configurations can be loaded from partial JSON documents,
//! missing fields take their defaults.

use crate::types::{RefineError, RefineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Band combination used to validate cloud-shadow candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusteringMode {
    /// Land pixels clustered on band A, water pixels on band B
    LandWater,
    /// Bands A and B clustered together
    MultiBand,
    /// Band A only
    SingleBand,
}

/// Parameters for cast-shadow geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowParams {
    /// Ground sampling distance in meters
    pub spatial_resolution: f64,
    /// Stretch the sun zenith angle toward the horizon for terrain shadows
    pub adapt_sun_zenith: bool,
    /// Highest terrain assumed when sizing the search path (m)
    pub max_terrain_height: f64,
    /// Half-width of the window giving a path pixel's vertical extent
    pub extent_window_radius: usize,
    /// Lowest cloud top considered without pressure data (m)
    pub min_cloud_height: f64,
    /// Highest cloud top considered (m)
    pub max_cloud_height: f64,
    /// Accepted deviation from the pressure-derived cloud height (m)
    pub ctp_height_tolerance: f64,
}

impl Default for ShadowParams {
    fn default() -> Self {
        Self {
            spatial_resolution: 10.0,    // Sentinel-2 10 m bands
            adapt_sun_zenith: true,
            max_terrain_height: 8850.0,  // Mount Everest
            extent_window_radius: 1,     // 3x3 window
            min_cloud_height: 200.0,
            max_cloud_height: 8000.0,
            ctp_height_tolerance: 500.0,
        }
    }
}

/// Parameters for the per-tile flag consolidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Buffer radius in pixels around cloud pixels
    pub cloud_buffer_width: usize,
    pub compute_cloud_buffer: bool,
    pub compute_cloud_shadow: bool,
    /// Only used when cloud shadows are computed
    pub compute_mountain_shadow: bool,
    pub refine_near_coastlines: bool,
    pub mode: ClusteringMode,
    /// Number of k-means clusters for shadow validation
    pub cluster_count: usize,
    pub max_cluster_iterations: usize,
    /// Half-width of the coastline proximity window
    pub coastline_window: usize,
    /// Border added around each tile before fetching inputs
    pub tile_padding: usize,
    pub shadow: ShadowParams,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            cloud_buffer_width: 2,
            compute_cloud_buffer: true,
            compute_cloud_shadow: false,
            compute_mountain_shadow: true,
            refine_near_coastlines: true,
            mode: ClusteringMode::LandWater,
            cluster_count: 3,
            max_cluster_iterations: 100,
            coastline_window: 1,
            tile_padding: 64,
            shadow: ShadowParams::default(),
        }
    }
}

impl RefinementConfig {
    pub fn from_json_str(json: &str) -> RefineResult<Self> {
        let config: RefinementConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> RefineResult<Self> {
        log::info!("Reading refinement configuration: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> RefineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject parameter combinations the processors cannot work with
    pub fn validate(&self) -> RefineResult<()> {
        if self.cluster_count == 0 {
            return Err(RefineError::InvalidConfig(
                "cluster_count must be at least 1".to_string(),
            ));
        }
        if self.max_cluster_iterations == 0 {
            return Err(RefineError::InvalidConfig(
                "max_cluster_iterations must be at least 1".to_string(),
            ));
        }
        let shadow = &self.shadow;
        if !(shadow.spatial_resolution.is_finite() && shadow.spatial_resolution > 0.0) {
            return Err(RefineError::InvalidConfig(format!(
                "spatial_resolution must be positive, got {}",
                shadow.spatial_resolution
            )));
        }
        if !shadow.max_terrain_height.is_finite() {
            return Err(RefineError::InvalidConfig(
                "max_terrain_height must be finite".to_string(),
            ));
        }
        if !(shadow.min_cloud_height >= 0.0 && shadow.min_cloud_height <= shadow.max_cloud_height)
        {
            return Err(RefineError::InvalidConfig(format!(
                "cloud height range [{}, {}] is not ordered",
                shadow.min_cloud_height, shadow.max_cloud_height
            )));
        }
        if !(shadow.ctp_height_tolerance >= 0.0) {
            return Err(RefineError::InvalidConfig(
                "ctp_height_tolerance must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
