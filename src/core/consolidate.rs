//! Per-tile flag consolidation
//!
//! A tile is refined in five passes: combine, coastline refinement, CLOUD
//! derivation, cloud buffering and cast shadows. Inputs are read once for the
//! tile padded by `tile_padding` pixels so that clouds just outside the tile
//! still buffer and shadow into it.

use crate::config::RefinementConfig;
use crate::core::buffer::{consolidate_cloud_and_buffer, BufferDilator};
use crate::core::cloud_shadow::{ShadowCaster, ShadowInputs};
use crate::core::coastline::CoastlineRefiner;
use crate::core::flags::{combine, is_set, set_flag, CloudCategory, Flag, SensorProfile};
use crate::core::terrain_shadow::TerrainRasters;
use crate::io::geocoding::{Geocoding, GeocodingKind};
use crate::io::product::{Band, FlagBand, RasterSource};
use crate::types::{CancelToken, FlagValue, RasterTile, Rect, RefineError, RefineResult};
use ndarray::{s, Array2};

/// All rasters of one tile, covering the extended rectangle
#[derive(Debug, Clone)]
pub struct TileInputs {
    pub target: Rect,
    pub extended: Rect,
    pub geocoding_kind: GeocodingKind,
    pub source_flags: RasterTile<FlagValue>,
    pub upstream_buffer_flags: Option<RasterTile<FlagValue>>,
    pub water_fraction: Option<RasterTile<f32>>,
    pub latitude: Option<RasterTile<f32>>,
    pub longitude: Option<RasterTile<f32>>,
    pub altitude: Option<RasterTile<f32>>,
    pub sun_zenith: Option<RasterTile<f32>>,
    pub sun_azimuth: Option<RasterTile<f32>>,
    pub cloud_top_pressure: Option<RasterTile<f32>>,
    pub reflectance_a: Option<RasterTile<f32>>,
    pub reflectance_b: Option<RasterTile<f32>>,
}

/// Geographic coordinate rasters computed from a geocoding
fn geo_tiles(geocoding: &dyn Geocoding, rect: Rect) -> (RasterTile<f32>, RasterTile<f32>) {
    let mut lat = RasterTile::filled(rect, f32::NAN);
    let mut lon = RasterTile::filled(rect, f32::NAN);
    for (x, y) in rect.pixels() {
        if let Some(pos) = geocoding.pixel_to_geo(x as f64 + 0.5, y as f64 + 0.5) {
            lat.set(x, y, pos.lat as f32);
            lon.set(x, y, pos.lon as f32);
        }
    }
    (lat, lon)
}

impl TileInputs {
    /// Inputs holding only the classification flags of the extended tile
    pub fn new(target: Rect, source_flags: RasterTile<FlagValue>) -> Self {
        Self {
            target,
            extended: source_flags.rect,
            geocoding_kind: GeocodingKind::Other,
            source_flags,
            upstream_buffer_flags: None,
            water_fraction: None,
            latitude: None,
            longitude: None,
            altitude: None,
            sun_zenith: None,
            sun_azimuth: None,
            cloud_top_pressure: None,
            reflectance_a: None,
            reflectance_b: None,
        }
    }

    /// Read every raster the configuration needs for `target`
    pub fn fetch(source: &dyn RasterSource, target: Rect, config: &RefinementConfig) -> RefineResult<Self> {
        let scene = source.scene_rect();
        if !scene.contains_rect(&target) || target.is_empty() {
            return Err(RefineError::Processing(format!(
                "Tile {:?} is not inside scene {:?}",
                target, scene
            )));
        }
        let extended = target.extend(config.tile_padding, &scene);
        log::debug!("Fetching inputs for tile {:?} (extended {:?})", target, extended);

        let mut inputs = TileInputs::new(target, source.fetch_flags(FlagBand::Classification, extended)?);
        if source.has_flag_band(FlagBand::CloudBuffer) {
            inputs.upstream_buffer_flags = Some(source.fetch_flags(FlagBand::CloudBuffer, extended)?);
        }

        let geocoding = source.geocoding();
        inputs.geocoding_kind = geocoding.map(|g| g.kind()).unwrap_or(GeocodingKind::Other);

        let shadows = config.compute_cloud_shadow;
        let mountains = shadows && config.compute_mountain_shadow;
        let needs_water = config.refine_near_coastlines || shadows;
        let needs_geo = config.refine_near_coastlines || mountains;

        if needs_water {
            inputs.water_fraction = source.fetch_optional(&Band::WaterFraction, extended)?;
        }
        if needs_geo {
            inputs.latitude = source.fetch_optional(&Band::Latitude, extended)?;
            inputs.longitude = source.fetch_optional(&Band::Longitude, extended)?;
            if inputs.latitude.is_none() || inputs.longitude.is_none() {
                if let Some(geocoding) = geocoding {
                    let (lat, lon) = geo_tiles(geocoding, extended);
                    inputs.latitude.get_or_insert(lat);
                    inputs.longitude.get_or_insert(lon);
                }
            }
        }
        if mountains {
            inputs.altitude = source.fetch_optional(&Band::Altitude, extended)?;
        }
        if shadows {
            inputs.sun_zenith = source.fetch_optional(&Band::SunZenith, extended)?;
            inputs.sun_azimuth = source.fetch_optional(&Band::SunAzimuth, extended)?;
            inputs.cloud_top_pressure = source.fetch_optional(&Band::CloudTopPressure, extended)?;
            inputs.reflectance_a = source.fetch_optional(&Band::ReflectancePrimary, extended)?;
            inputs.reflectance_b = source.fetch_optional(&Band::ReflectanceSecondary, extended)?;
        }
        Ok(inputs)
    }

    fn optional_tiles(&self) -> [(&'static str, Option<&RasterTile<f32>>); 9] {
        [
            ("water_fraction", self.water_fraction.as_ref()),
            ("latitude", self.latitude.as_ref()),
            ("longitude", self.longitude.as_ref()),
            ("altitude", self.altitude.as_ref()),
            ("sun_zenith", self.sun_zenith.as_ref()),
            ("sun_azimuth", self.sun_azimuth.as_ref()),
            ("cloud_top_pressure", self.cloud_top_pressure.as_ref()),
            ("reflectance_a", self.reflectance_a.as_ref()),
            ("reflectance_b", self.reflectance_b.as_ref()),
        ]
    }

    /// Check shapes and the presence of every raster `config` requires
    pub fn validate(&self, config: &RefinementConfig) -> RefineResult<()> {
        if !self.extended.contains_rect(&self.target) || self.target.is_empty() {
            return Err(RefineError::Processing(format!(
                "Tile {:?} is not inside its extended rectangle {:?}",
                self.target, self.extended
            )));
        }
        self.source_flags.expect_rect(&self.extended, "pixel_classif_flags")?;
        if let Some(upstream) = &self.upstream_buffer_flags {
            upstream.expect_rect(&self.extended, "cloud_buffer_flags")?;
        }
        for (name, tile) in self.optional_tiles() {
            if let Some(tile) = tile {
                tile.expect_rect(&self.extended, name)?;
            }
        }

        let mut required: Vec<(&str, bool)> = Vec::new();
        if config.refine_near_coastlines {
            required.push(("water_fraction", self.water_fraction.is_some()));
        }
        if config.compute_cloud_shadow {
            required.push(("sun_zenith", self.sun_zenith.is_some()));
            required.push(("sun_azimuth", self.sun_azimuth.is_some()));
            required.push(("reflectance_a", self.reflectance_a.is_some()));
            if config.compute_mountain_shadow {
                required.push(("altitude", self.altitude.is_some()));
                required.push(("latitude", self.latitude.is_some()));
                required.push(("longitude", self.longitude.is_some()));
            }
        }
        match required.into_iter().find(|(_, present)| !present) {
            Some((name, _)) => Err(RefineError::MissingBand(name.to_string())),
            None => Ok(()),
        }
    }
}

fn required<'a, T>(tile: Option<&'a RasterTile<T>>, name: &str) -> RefineResult<&'a RasterTile<T>> {
    tile.ok_or_else(|| RefineError::MissingBand(name.to_string()))
}

/// Counters reported per tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationStats {
    pub coastline: usize,
    pub cleared_clouds: usize,
    pub buffer_seeds: usize,
    pub cloud_shadow: usize,
    pub mountain_shadow: usize,
}

/// Per-tile driver of the refinement passes
pub struct FlagConsolidator {
    config: RefinementConfig,
    profile: SensorProfile,
}

impl FlagConsolidator {
    pub fn new(config: RefinementConfig, profile: SensorProfile) -> RefineResult<Self> {
        config.validate()?;
        Ok(Self { config, profile })
    }

    /// Default configuration for the given sensor
    pub fn standard(profile: SensorProfile) -> Self {
        Self {
            config: RefinementConfig::default(),
            profile,
        }
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    pub fn profile(&self) -> &SensorProfile {
        &self.profile
    }

    /// Refine one tile
    pub fn consolidate(&self, inputs: &TileInputs, cancel: &CancelToken) -> RefineResult<RasterTile<FlagValue>> {
        self.consolidate_with_stats(inputs, cancel).map(|(tile, _)| tile)
    }

    /// Refine one tile and report what changed
    pub fn consolidate_with_stats(
        &self,
        inputs: &TileInputs,
        cancel: &CancelToken,
    ) -> RefineResult<(RasterTile<FlagValue>, ConsolidationStats)> {
        inputs.validate(&self.config)?;
        let config = &self.config;
        let rect = inputs.target;
        let source = &inputs.source_flags;
        let mut stats = ConsolidationStats::default();

        // combine
        let mut target = source.subset(rect)?;
        if let Some(upstream) = &inputs.upstream_buffer_flags {
            for (x, y) in rect.pixels() {
                target.set(x, y, combine(target.get(x, y), upstream.get(x, y)));
            }
        }
        let invalid: Vec<((usize, usize), FlagValue)> = rect
            .pixels()
            .filter_map(|(x, y)| {
                let value = target.get(x, y);
                is_set(value, Flag::Invalid).then_some(((x, y), value))
            })
            .collect();

        // coastline refinement
        let categories = self.profile.refined_categories();
        let refiner = match (&inputs.water_fraction, config.refine_near_coastlines) {
            (Some(water), true) => Some(CoastlineRefiner::new(
                water,
                inputs.latitude.as_ref(),
                inputs.geocoding_kind,
                config.coastline_window,
            )),
            _ => None,
        };
        for y in rect.y..rect.bottom() {
            cancel.check()?;
            for x in rect.x..rect.right() {
                if is_set(target.get(x, y), Flag::Invalid) {
                    continue;
                }
                if let Some(refiner) = &refiner {
                    let outcome = refiner.refine_pixel(x, y, &categories, source, &mut target);
                    stats.coastline += outcome.near_coastline as usize;
                    stats.cleared_clouds += outcome.cleared;
                }
                let cell = target.get_mut(x, y);
                if categories.iter().any(|c| is_set(*cell, c.cloud)) {
                    set_flag(cell, Flag::SnowIce, false);
                }
            }
        }

        // CLOUD derivation
        for value in target.data.iter_mut() {
            if !is_set(*value, Flag::Invalid) {
                *value = self.profile.derive_cloud(*value);
            }
        }

        // cloud buffer
        let buffered = self.profile.buffered_categories();
        if config.compute_cloud_buffer {
            let dilator = BufferDilator::new(config.cloud_buffer_width);
            for category in &buffered {
                let seeds = self.buffer_seeds(*category, source, &target);
                stats.buffer_seeds +=
                    dilator.dilate(&inputs.extended, |x, y| seeds.get(x, y), category.buffer, &mut target);
            }
        }
        for category in &buffered {
            consolidate_cloud_and_buffer(&mut target, *category);
        }

        // cast shadows
        if config.compute_cloud_shadow {
            let shadow_inputs = ShadowInputs {
                sun_zenith: required(inputs.sun_zenith.as_ref(), "sun_zenith")?,
                sun_azimuth: required(inputs.sun_azimuth.as_ref(), "sun_azimuth")?,
                reflectance_a: required(inputs.reflectance_a.as_ref(), "reflectance_a")?,
                reflectance_b: inputs.reflectance_b.as_ref(),
                water_fraction: inputs.water_fraction.as_ref(),
                cloud_top_pressure: inputs.cloud_top_pressure.as_ref(),
                terrain: match (&inputs.altitude, &inputs.latitude, &inputs.longitude) {
                    (Some(altitude), Some(latitude), Some(longitude)) => Some(TerrainRasters {
                        altitude,
                        latitude,
                        longitude,
                    }),
                    _ => None,
                },
            };
            let caster = ShadowCaster::new(config, &self.profile, shadow_inputs);
            let (shadows, shadow_stats) = caster.cast(source, &target, cancel)?;
            stats.mountain_shadow = shadow_stats.mountain_shadow;
            for (x, y) in rect.pixels() {
                let found = shadows.get(x, y);
                let cell = target.get_mut(x, y);
                if is_set(*cell, Flag::Invalid) {
                    continue;
                }
                let cloud = is_set(*cell, Flag::Cloud);
                if is_set(found, Flag::CloudShadow) {
                    if !cloud {
                        set_flag(cell, Flag::CloudShadow, true);
                        stats.cloud_shadow += 1;
                    }
                } else if is_set(found, Flag::CloudBuffer) && !cloud {
                    set_flag(cell, Flag::CloudBuffer, true);
                }
                if is_set(found, Flag::MountainShadow) {
                    set_flag(cell, Flag::MountainShadow, true);
                }
            }
        }

        for ((x, y), value) in invalid {
            target.set(x, y, value);
        }

        log::debug!("Tile {:?} consolidated: {:?}", rect, stats);
        Ok((target, stats))
    }

    /// Seed mask for one category over the extended tile
    fn buffer_seeds(
        &self,
        category: CloudCategory,
        source: &RasterTile<FlagValue>,
        target: &RasterTile<FlagValue>,
    ) -> RasterTile<bool> {
        let mut seeds = RasterTile::filled(source.rect, false);
        for (x, y) in source.rect.pixels() {
            let seed = match target.try_get(x, y) {
                Some(value) => !is_set(value, Flag::Invalid) && is_set(value, category.cloud),
                None => {
                    let value = source.get(x, y);
                    let cloud = if category == CloudCategory::OVERALL {
                        is_set(value, Flag::Cloud) || self.profile.is_cloud(value)
                    } else {
                        is_set(value, category.cloud)
                    };
                    !is_set(value, Flag::Invalid) && cloud
                }
            };
            seeds.set(x, y, seed);
        }
        seeds
    }

    /// Fetch the inputs of `target` from `source` and refine them
    pub fn consolidate_tile(
        &self,
        source: &dyn RasterSource,
        target: Rect,
        cancel: &CancelToken,
    ) -> RefineResult<RasterTile<FlagValue>> {
        cancel.check()?;
        let inputs = TileInputs::fetch(source, target, &self.config)?;
        self.consolidate(&inputs, cancel)
    }

    /// Refine a whole scene tile by tile
    pub fn process_scene(
        &self,
        source: &dyn RasterSource,
        tile_size: usize,
        cancel: &CancelToken,
    ) -> RefineResult<Array2<FlagValue>> {
        let scene = source.scene_rect();
        let tiles = scene.tiles(tile_size, tile_size);
        log::info!(
            "Consolidating flags of {}x{} scene in {} tiles ({})",
            scene.width,
            scene.height,
            tiles.len(),
            self.profile.name
        );

        #[cfg(feature = "parallel")]
        let results: Vec<RasterTile<FlagValue>> = {
            use rayon::prelude::*;
            tiles
                .par_iter()
                .map(|tile| self.consolidate_tile(source, *tile, cancel))
                .collect::<RefineResult<Vec<_>>>()?
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<RasterTile<FlagValue>> = tiles
            .iter()
            .map(|tile| self.consolidate_tile(source, *tile, cancel))
            .collect::<RefineResult<Vec<_>>>()?;

        let mut output = Array2::<FlagValue>::zeros(scene.shape());
        for tile in results {
            let r = tile.rect;
            output
                .slice_mut(s![r.y..r.bottom(), r.x..r.right()])
                .assign(&tile.data);
        }
        log::info!("Flag consolidation complete");
        Ok(output)
    }
}
