//! Cloud shadow, shadow buffer and mountain shadow for one tile
//!
//! Every cloud pixel projects a shadow path away from the sun. Pixels on that
//! path whose implied cloud height is plausible become shadow candidates, and
//! k-means over their reflectance keeps only the darkest cluster.

use crate::config::{ClusteringMode, RefinementConfig};
use crate::core::buffer::BufferDilator;
use crate::core::flags::{is_set, set_flag, Flag, SensorProfile};
use crate::core::kmeans::{ClusterParams, SpectralClusterer};
use crate::core::sun_path::{SearchPath, SunDirection, MAX_ADAPTED_ZENITH};
use crate::core::terrain_shadow::{TerrainOcclusionCaster, TerrainRasters};
use crate::types::{CancelToken, FlagValue, RasterTile, Rect, RefineError, RefineResult};

/// Standard sea-level pressure (hPa)
const SEA_LEVEL_PRESSURE: f64 = 1013.25;

/// Smallest usable tangent of the sun zenith
const MIN_ZENITH_TAN: f64 = 1e-6;

/// Height (m) of a pressure level in the international standard atmosphere
pub fn pressure_to_height(pressure_hpa: f64) -> f64 {
    44330.77 * (1.0 - (pressure_hpa / SEA_LEVEL_PRESSURE).powf(0.190263))
}

/// Rasters needed by the shadow caster, covering the extended tile
pub struct ShadowInputs<'a> {
    pub sun_zenith: &'a RasterTile<f32>,
    pub sun_azimuth: &'a RasterTile<f32>,
    pub reflectance_a: &'a RasterTile<f32>,
    pub reflectance_b: Option<&'a RasterTile<f32>>,
    pub water_fraction: Option<&'a RasterTile<f32>>,
    pub cloud_top_pressure: Option<&'a RasterTile<f32>>,
    pub terrain: Option<TerrainRasters<'a>>,
}

/// Pixel counts reported after casting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShadowStats {
    pub candidates: usize,
    pub cloud_shadow: usize,
    pub buffer: usize,
    pub mountain_shadow: usize,
}

/// Samples of one clustering group with their positions
struct SampleGroup {
    name: &'static str,
    positions: Vec<(usize, usize)>,
    primary: Vec<f64>,
    secondary: Vec<f64>,
}

impl SampleGroup {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            positions: Vec::new(),
            primary: Vec::new(),
            secondary: Vec::new(),
        }
    }
}

/// Cloud and mountain shadow detection for one tile
pub struct ShadowCaster<'a> {
    config: &'a RefinementConfig,
    profile: &'a SensorProfile,
    inputs: ShadowInputs<'a>,
}

impl<'a> ShadowCaster<'a> {
    pub fn new(config: &'a RefinementConfig, profile: &'a SensorProfile, inputs: ShadowInputs<'a>) -> Self {
        Self {
            config,
            profile,
            inputs,
        }
    }

    fn check_inputs(&self) -> RefineResult<()> {
        if matches!(self.config.mode, ClusteringMode::LandWater | ClusteringMode::MultiBand)
            && self.inputs.reflectance_b.is_none()
        {
            return Err(RefineError::MissingBand(format!(
                "reflectance_b (required by {:?} clustering)",
                self.config.mode
            )));
        }
        Ok(())
    }

    /// Compute shadow flags for the target tile
    ///
    /// `source` holds the classification of the extended tile and `flags` the
    /// refined classification of the target tile. The returned tile carries
    /// only CLOUD_SHADOW, CLOUD_BUFFER and MOUNTAIN_SHADOW bits.
    pub fn cast(
        &self,
        source: &RasterTile<FlagValue>,
        flags: &RasterTile<FlagValue>,
        cancel: &CancelToken,
    ) -> RefineResult<(RasterTile<FlagValue>, ShadowStats)> {
        self.check_inputs()?;
        let target = flags.rect;
        let mut out = RasterTile::filled(target, 0 as FlagValue);
        let mut stats = ShadowStats::default();

        let is_cloud = |x: usize, y: usize| -> bool {
            match flags.try_get(x, y) {
                Some(v) => is_set(v, Flag::Cloud),
                None => {
                    let v = source.get(x, y);
                    is_set(v, Flag::Cloud) || self.profile.is_cloud(v)
                }
            }
        };

        let sun = SunDirection::at_tile_centre(self.inputs.sun_zenith, self.inputs.sun_azimuth, &target);
        match sun {
            Some(sun) => {
                let candidates = self.find_candidates(sun, source, flags, &is_cloud, cancel)?;
                stats.candidates = candidates.data.iter().filter(|c| **c).count();
                stats.cloud_shadow = self.validate_candidates(&candidates, flags, &mut out)?;
            }
            None => log::warn!("Cloud shadow: no usable sun angles at the centre of {:?}", target),
        }

        stats.buffer = self.buffer_clouds(source.rect, flags, &is_cloud, &mut out);

        if self.config.compute_mountain_shadow {
            match (sun, self.inputs.terrain) {
                (Some(sun), Some(terrain)) => {
                    let caster = TerrainOcclusionCaster::new(&self.config.shadow, terrain, sun, &target);
                    let shadow = caster.cast(&target, cancel)?;
                    for (x, y) in target.pixels() {
                        if shadow.get(x, y) && !is_set(flags.get(x, y), Flag::Invalid) {
                            set_flag(out.get_mut(x, y), Flag::MountainShadow, true);
                            stats.mountain_shadow += 1;
                        }
                    }
                }
                (_, None) => return Err(RefineError::MissingBand("altitude".to_string())),
                (None, _) => {}
            }
        }

        log::debug!(
            "Cloud shadow: {} candidates, {} shadow, {} buffer, {} mountain shadow pixels",
            stats.candidates,
            stats.cloud_shadow,
            stats.buffer,
            stats.mountain_shadow
        );
        Ok((out, stats))
    }

    /// Plausible cloud height for a shadow point
    fn height_accepted(&self, implied_height: f64, cloud_height: Option<f64>) -> bool {
        let params = &self.config.shadow;
        match cloud_height {
            Some(h) => (implied_height - h).abs() <= params.ctp_height_tolerance,
            None => implied_height >= params.min_cloud_height && implied_height <= params.max_cloud_height,
        }
    }

    fn cloud_height(&self, x: usize, y: usize) -> Option<f64> {
        let pressure = self.inputs.cloud_top_pressure?.try_get(x, y)?;
        if pressure.is_finite() && pressure > 0.0 {
            Some(pressure_to_height(pressure as f64))
        } else {
            None
        }
    }

    fn find_candidates<F>(
        &self,
        sun: SunDirection,
        source: &RasterTile<FlagValue>,
        flags: &RasterTile<FlagValue>,
        is_cloud: &F,
        cancel: &CancelToken,
    ) -> RefineResult<RasterTile<bool>>
    where
        F: Fn(usize, usize) -> bool,
    {
        let target = flags.rect;
        let extended = source.rect;
        let mut candidates = RasterTile::filled(target, false);

        let zenith_tan = sun.zenith_deg.to_radians().tan();
        if sun.zenith_deg > MAX_ADAPTED_ZENITH || !(zenith_tan.is_finite() && zenith_tan > MIN_ZENITH_TAN) {
            log::debug!("Cloud shadow: sun zenith {:.3} casts no usable shadow", sun.zenith_deg);
            return Ok(candidates);
        }

        let params = &self.config.shadow;
        let reach = params.max_cloud_height + params.ctp_height_tolerance;
        let centre = (target.x + target.width / 2, target.y + target.height / 2);
        let path = SearchPath::build(
            (centre.0 as isize, centre.1 as isize),
            sun.displacement_away(reach, params.spatial_resolution),
            &extended,
        );
        if path.is_degenerate() {
            log::debug!("Cloud shadow: zero-length shadow path in {:?}", target);
            return Ok(candidates);
        }
        let heights: Vec<f64> = path
            .beyond_origin()
            .iter()
            .map(|(dx, dy)| {
                let distance = ((dx * dx + dy * dy) as f64).sqrt() * params.spatial_resolution;
                distance / zenith_tan
            })
            .collect();

        for y in extended.y..extended.bottom() {
            cancel.check()?;
            for x in extended.x..extended.right() {
                if !is_cloud(x, y) {
                    continue;
                }
                let cloud_height = self.cloud_height(x, y);
                for (&(dx, dy), &height) in path.beyond_origin().iter().zip(heights.iter()) {
                    let px = x as isize + dx;
                    let py = y as isize + dy;
                    if !target.contains_signed(px, py) {
                        continue;
                    }
                    let (px, py) = (px as usize, py as usize);
                    if !self.height_accepted(height, cloud_height) {
                        continue;
                    }
                    let value = flags.get(px, py);
                    if is_set(value, Flag::Invalid) || is_cloud(px, py) {
                        continue;
                    }
                    candidates.set(px, py, true);
                }
            }
        }
        Ok(candidates)
    }

    fn is_water(&self, x: usize, y: usize, flags: &RasterTile<FlagValue>) -> bool {
        let fraction = self
            .inputs
            .water_fraction
            .and_then(|wf| wf.try_get(x, y))
            .filter(|wf| wf.is_finite() && *wf <= 100.0);
        match fraction {
            Some(wf) => wf >= 50.0,
            None => !is_set(flags.get(x, y), Flag::Land),
        }
    }

    fn validate_candidates(
        &self,
        candidates: &RasterTile<bool>,
        flags: &RasterTile<FlagValue>,
        out: &mut RasterTile<FlagValue>,
    ) -> RefineResult<usize> {
        let mode = self.config.mode;
        let mut groups = match mode {
            ClusteringMode::LandWater => vec![SampleGroup::new("land"), SampleGroup::new("water")],
            _ => vec![SampleGroup::new("all")],
        };

        for (x, y) in candidates.rect.pixels() {
            if !candidates.get(x, y) {
                continue;
            }
            let a = self.inputs.reflectance_a.get(x, y) as f64;
            let b = self.inputs.reflectance_b.map(|band| band.get(x, y) as f64);
            match mode {
                ClusteringMode::SingleBand => {
                    if a.is_finite() {
                        groups[0].positions.push((x, y));
                        groups[0].primary.push(a);
                    }
                }
                ClusteringMode::MultiBand => {
                    if let Some(b) = b.filter(|b| b.is_finite() && a.is_finite()) {
                        groups[0].positions.push((x, y));
                        groups[0].primary.push(a);
                        groups[0].secondary.push(b);
                    }
                }
                ClusteringMode::LandWater => {
                    let (index, value) = if self.is_water(x, y, flags) {
                        (1, b.unwrap_or(f64::NAN))
                    } else {
                        (0, a)
                    };
                    if value.is_finite() {
                        groups[index].positions.push((x, y));
                        groups[index].primary.push(value);
                    }
                }
            }
        }

        let clusterer = SpectralClusterer::with_params(ClusterParams {
            cluster_count: self.config.cluster_count,
            max_iterations: self.config.max_cluster_iterations,
        });

        let mut shadowed = 0;
        for group in &groups {
            if group.positions.len() < self.config.cluster_count {
                if !group.positions.is_empty() {
                    log::warn!(
                        "Cloud shadow: {} {} samples are too few for {} clusters",
                        group.positions.len(),
                        group.name,
                        self.config.cluster_count
                    );
                }
                continue;
            }
            let result = if group.secondary.is_empty() {
                clusterer.cluster_single(&group.primary)?
            } else {
                clusterer.cluster_dual(&group.primary, &group.secondary)?
            };
            let darkest = result.darkest_cluster();
            for (&(x, y), &cluster) in group.positions.iter().zip(result.assignments.iter()) {
                if cluster == darkest {
                    set_flag(out.get_mut(x, y), Flag::CloudShadow, true);
                    shadowed += 1;
                }
            }
        }
        Ok(shadowed)
    }

    /// Buffer around clouds and shadows onto the remaining valid pixels
    fn buffer_clouds<F>(
        &self,
        extended: Rect,
        flags: &RasterTile<FlagValue>,
        is_cloud: &F,
        out: &mut RasterTile<FlagValue>,
    ) -> usize
    where
        F: Fn(usize, usize) -> bool,
    {
        let dilator = BufferDilator::new(self.config.cloud_buffer_width);
        let mut buffer = RasterTile::filled(flags.rect, 0 as FlagValue);
        {
            let shadows = &*out;
            dilator.dilate(
                &extended,
                |x, y| {
                    is_cloud(x, y)
                        || matches!(shadows.try_get(x, y), Some(v) if is_set(v, Flag::CloudShadow))
                },
                Flag::CloudBuffer,
                &mut buffer,
            );
        }

        let mut count = 0;
        for (x, y) in flags.rect.pixels() {
            if !is_set(buffer.get(x, y), Flag::CloudBuffer) {
                continue;
            }
            let value = flags.get(x, y);
            let cell = out.get_mut(x, y);
            if is_set(value, Flag::Invalid) || is_set(value, Flag::Cloud) || is_set(*cell, Flag::CloudShadow) {
                continue;
            }
            set_flag(cell, Flag::CloudBuffer, true);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    struct Scene {
        flags: RasterTile<FlagValue>,
        zenith: RasterTile<f32>,
        azimuth: RasterTile<f32>,
        band_a: RasterTile<f32>,
    }

    /// 40x40 scene, 3x3 cloud at (5..=7, 5..=7), sun from the north
    fn scene(zenith: f32) -> Scene {
        let rect = Rect::scene(40, 40);
        let mut flags = RasterTile::filled(rect, Flag::Land.mask());
        for y in 5..=7 {
            for x in 5..=7 {
                flags.set(x, y, Flag::Land.mask() | Flag::Cloud.mask() | Flag::CloudSure.mask());
            }
        }
        let band_a = RasterTile {
            rect,
            data: Array2::from_shape_fn(rect.shape(), |(y, _)| if (15..=18).contains(&y) { 0.02 } else { 0.3 }),
        };
        Scene {
            flags,
            zenith: RasterTile::filled(rect, zenith),
            azimuth: RasterTile::filled(rect, 0.0),
            band_a,
        }
    }

    fn config() -> RefinementConfig {
        let mut config = RefinementConfig::default();
        config.mode = ClusteringMode::SingleBand;
        config.compute_mountain_shadow = false;
        config.cloud_buffer_width = 1;
        config.shadow.min_cloud_height = 95.0;
        config.shadow.max_cloud_height = 155.0;
        config.shadow.ctp_height_tolerance = 0.0;
        config
    }

    fn inputs(s: &Scene) -> ShadowInputs<'_> {
        ShadowInputs {
            sun_zenith: &s.zenith,
            sun_azimuth: &s.azimuth,
            reflectance_a: &s.band_a,
            reflectance_b: None,
            water_fraction: None,
            cloud_top_pressure: None,
            terrain: None,
        }
    }

    #[test]
    fn test_pressure_to_height() {
        assert_abs_diff_eq!(pressure_to_height(1013.25), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pressure_to_height(500.0), 5574.43, epsilon = 0.01);
    }

    #[test]
    fn test_dark_candidates_become_shadow() {
        let s = scene(45.0);
        let config = config();
        let profile = SensorProfile::landsat8();
        let caster = ShadowCaster::new(&config, &profile, inputs(&s));
        let (out, stats) = caster.cast(&s.flags, &s.flags, &CancelToken::new()).unwrap();

        // shadow points 10..=15 pixels south of each cloud pixel
        assert_eq!(stats.candidates, 24);
        assert_eq!(stats.cloud_shadow, 12);
        assert!(is_set(out.get(6, 16), Flag::CloudShadow));
        assert!(is_set(out.get(5, 18), Flag::CloudShadow));
        assert!(!is_set(out.get(6, 20), Flag::CloudShadow));
        assert!(!is_set(out.get(6, 11), Flag::CloudShadow));
        assert!(!is_set(out.get(9, 16), Flag::CloudShadow));

        // buffer rings clouds and shadows but never covers them
        assert!(is_set(out.get(4, 5), Flag::CloudBuffer));
        assert!(is_set(out.get(6, 14), Flag::CloudBuffer));
        assert!(!is_set(out.get(6, 6), Flag::CloudBuffer));
        assert!(!is_set(out.get(6, 16), Flag::CloudBuffer));
        assert_eq!(out.get(20, 25), 0);
    }

    #[test]
    fn test_overhead_sun_casts_nothing() {
        let s = scene(0.0);
        let config = config();
        let profile = SensorProfile::landsat8();
        let caster = ShadowCaster::new(&config, &profile, inputs(&s));
        let (out, stats) = caster.cast(&s.flags, &s.flags, &CancelToken::new()).unwrap();
        assert_eq!(stats.candidates, 0);
        assert!(out.data.iter().all(|v| !is_set(*v, Flag::CloudShadow)));
    }

    #[test]
    fn test_grazing_sun_casts_no_cloud_shadow() {
        let s = scene(90.0);
        let config = config();
        let profile = SensorProfile::landsat8();
        let caster = ShadowCaster::new(&config, &profile, inputs(&s));
        let (out, stats) = caster.cast(&s.flags, &s.flags, &CancelToken::new()).unwrap();
        assert_eq!(stats.candidates, 0);
        assert_eq!(stats.cloud_shadow, 0);
        assert!(out.data.iter().all(|v| !is_set(*v, Flag::CloudShadow)));
        // the cloud buffer does not depend on the sun
        assert!(is_set(out.get(4, 5), Flag::CloudBuffer));
    }

    #[test]
    fn test_land_and_water_are_clustered_apart() {
        let s = scene(45.0);
        let mut config = config();
        config.mode = ClusteringMode::LandWater;
        let rect = s.flags.rect;
        // column 7 is water, dark in the second band only on rows 19..=22
        let water = RasterTile {
            rect,
            data: Array2::from_shape_fn(rect.shape(), |(_, x)| if x == 7 { 100.0 } else { 0.0 }),
        };
        let band_b = RasterTile {
            rect,
            data: Array2::from_shape_fn(rect.shape(), |(y, _)| if (19..=22).contains(&y) { 0.01 } else { 0.2 }),
        };
        let profile = SensorProfile::landsat8();
        let mut shadow_inputs = inputs(&s);
        shadow_inputs.reflectance_b = Some(&band_b);
        shadow_inputs.water_fraction = Some(&water);
        let caster = ShadowCaster::new(&config, &profile, shadow_inputs);
        let (out, stats) = caster.cast(&s.flags, &s.flags, &CancelToken::new()).unwrap();

        assert_eq!(stats.candidates, 24);
        // 8 land pixels from the first band, 4 water pixels from the second
        assert_eq!(stats.cloud_shadow, 12);
        assert!(is_set(out.get(5, 16), Flag::CloudShadow));
        assert!(!is_set(out.get(5, 20), Flag::CloudShadow));
        assert!(is_set(out.get(7, 20), Flag::CloudShadow));
        assert!(!is_set(out.get(7, 16), Flag::CloudShadow));
    }

    #[test]
    fn test_two_band_clustering() {
        let s = scene(45.0);
        let mut config = config();
        config.mode = ClusteringMode::MultiBand;
        let rect = s.flags.rect;
        let band_b = RasterTile {
            rect,
            data: Array2::from_shape_fn(rect.shape(), |(y, _)| if (15..=18).contains(&y) { 0.05 } else { 0.25 }),
        };
        let profile = SensorProfile::landsat8();
        let mut shadow_inputs = inputs(&s);
        shadow_inputs.reflectance_b = Some(&band_b);
        let caster = ShadowCaster::new(&config, &profile, shadow_inputs);
        let (out, stats) = caster.cast(&s.flags, &s.flags, &CancelToken::new()).unwrap();

        assert_eq!(stats.candidates, 24);
        assert_eq!(stats.cloud_shadow, 12);
        for y in 15..=18 {
            assert!(is_set(out.get(6, y), Flag::CloudShadow));
        }
        assert!(!is_set(out.get(6, 19), Flag::CloudShadow));
    }

    #[test]
    fn test_pressure_height_restricts_candidates() {
        let s = scene(45.0);
        let mut config = config();
        config.shadow.max_cloud_height = 1000.0;
        config.shadow.ctp_height_tolerance = 15.0;
        // 120 m cloud top: shadow 105..135 m away
        let pressure = RasterTile::filled(s.flags.rect, 1013.25 * (1.0f32 - 120.0 / 44330.77).powf(1.0 / 0.190263));
        let profile = SensorProfile::landsat8();
        let mut shadow_inputs = inputs(&s);
        shadow_inputs.cloud_top_pressure = Some(&pressure);
        let caster = ShadowCaster::new(&config, &profile, shadow_inputs);
        let (_, stats) = caster.cast(&s.flags, &s.flags, &CancelToken::new()).unwrap();
        // 11..=13 pixels south of the cloud rows: rows 16..=20
        assert_eq!(stats.candidates, 3 * 5);
    }

    #[test]
    fn test_missing_secondary_band_is_an_error() {
        let s = scene(45.0);
        let mut config = config();
        config.mode = ClusteringMode::MultiBand;
        let profile = SensorProfile::landsat8();
        let caster = ShadowCaster::new(&config, &profile, inputs(&s));
        assert!(matches!(
            caster.cast(&s.flags, &s.flags, &CancelToken::new()),
            Err(RefineError::MissingBand(_))
        ));
    }

    #[test]
    fn test_too_few_samples_yield_no_shadow() {
        let s = scene(45.0);
        let mut config = config();
        config.cluster_count = 50;
        let profile = SensorProfile::landsat8();
        let caster = ShadowCaster::new(&config, &profile, inputs(&s));
        let (_, stats) = caster.cast(&s.flags, &s.flags, &CancelToken::new()).unwrap();
        assert_eq!(stats.candidates, 24);
        assert_eq!(stats.cloud_shadow, 0);
    }
}
