//! Mountain (terrain) shadow detection
//!
//! For every pixel, the terrain along the line toward the sun is searched for
//! a slope that rises above the sun ray. One search path is computed at the
//! tile centre and reused for every pixel of the tile.

use crate::config::ShadowParams;
use crate::core::sun_path::{SearchPath, SunDirection};
use crate::types::{CancelToken, RasterTile, Rect, RefineResult};

/// Mean earth radius in meters
pub const MEAN_EARTH_RADIUS: f64 = 6_372_000.0;

/// Central angle between two positions (radians)
///
/// Spherical law of cosines in its atan2 form, which stays accurate for
/// neighbouring pixels a few meters apart.
pub fn central_angle(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (sin1, cos1) = lat1.to_radians().sin_cos();
    let (sin2, cos2) = lat2.to_radians().sin_cos();
    let (sin_delta, cos_delta) = (lon2 - lon1).to_radians().sin_cos();

    let a = cos2 * sin_delta;
    let b = cos1 * sin2 - sin1 * cos2 * cos_delta;
    let y = (a * a + b * b).sqrt();
    let x = sin1 * sin2 + cos1 * cos2 * cos_delta;
    y.atan2(x)
}

/// Great-circle distance at `altitude` above the mean sphere (meters)
pub fn great_circle_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64, altitude: f64) -> f64 {
    central_angle(lat1, lon1, lat2, lon2) * (MEAN_EARTH_RADIUS + altitude)
}

/// Lowest and highest terrain altitude in a square window, `None` if there is none
///
/// Non-finite and non-positive altitudes are no-data and ignored.
pub fn vertical_extent(altitude: &RasterTile<f32>, x: usize, y: usize, radius: usize) -> Option<(f64, f64)> {
    let left = x.saturating_sub(radius);
    let top = y.saturating_sub(radius);
    let window = Rect::new(left, top, x + radius + 1 - left, y + radius + 1 - top)
        .intersection(&altitude.rect);

    let mut extent: Option<(f64, f64)> = None;
    for (i, j) in window.pixels() {
        let Some(value) = surface_altitude(altitude, i, j) else {
            continue;
        };
        extent = Some(match extent {
            Some((base, peak)) => (base.min(value), peak.max(value)),
            None => (value, value),
        });
    }
    extent
}

/// Terrain altitude usable as a shadow receiver
fn surface_altitude(altitude: &RasterTile<f32>, x: usize, y: usize) -> Option<f64> {
    altitude
        .try_get(x, y)
        .filter(|a| a.is_finite() && *a > 0.0)
        .map(|a| a as f64)
}

/// Terrain inputs covering the extended tile
#[derive(Clone, Copy)]
pub struct TerrainRasters<'a> {
    pub altitude: &'a RasterTile<f32>,
    pub latitude: &'a RasterTile<f32>,
    pub longitude: &'a RasterTile<f32>,
}

/// Mountain-shadow caster for one tile
pub struct TerrainOcclusionCaster<'a> {
    params: &'a ShadowParams,
    terrain: TerrainRasters<'a>,
    sun: SunDirection,
    path: SearchPath,
}

impl<'a> TerrainOcclusionCaster<'a> {
    /// Build the tile's search path from the sun position at the target centre
    pub fn new(
        params: &'a ShadowParams,
        terrain: TerrainRasters<'a>,
        sun: SunDirection,
        target: &Rect,
    ) -> Self {
        let sun = if params.adapt_sun_zenith { sun.adapted() } else { sun };
        let centre = (target.x + target.width / 2, target.y + target.height / 2);
        let centre_altitude = surface_altitude(terrain.altitude, centre.0, centre.1).unwrap_or(0.0);
        let delta = sun.displacement_toward(
            params.max_terrain_height - centre_altitude,
            params.spatial_resolution,
        );
        let path = SearchPath::build(
            (centre.0 as isize, centre.1 as isize),
            delta,
            &terrain.altitude.rect,
        );
        log::debug!(
            "Mountain shadow: sun zenith {:.2} (effective), azimuth {:.2}, path of {} pixels",
            sun.zenith_deg,
            sun.azimuth_deg,
            path.len()
        );
        Self {
            params,
            terrain,
            sun,
            path,
        }
    }

    pub fn path(&self) -> &SearchPath {
        &self.path
    }

    /// Effective sun direction after zenith adaptation
    pub fn sun(&self) -> SunDirection {
        self.sun
    }

    /// Whether terrain along the sun path hides the sun from (x, y)
    pub fn is_shadowed(&self, x: usize, y: usize) -> bool {
        let Some(origin_altitude) = surface_altitude(self.terrain.altitude, x, y) else {
            return false;
        };
        let bounds = self.terrain.altitude.rect;
        let elevation_tan = (std::f64::consts::FRAC_PI_2 - self.sun.zenith_deg.to_radians()).tan();
        let lat0 = self.terrain.latitude.get(x, y) as f64;
        let lon0 = self.terrain.longitude.get(x, y) as f64;

        for &(dx, dy) in self.path.interior() {
            let px = x as isize + dx;
            let py = y as isize + dy;
            if !bounds.contains_signed(px, py) {
                continue;
            }
            let (px, py) = (px as usize, py as usize);
            let Some(path_altitude) = surface_altitude(self.terrain.altitude, px, py) else {
                continue;
            };
            let Some((base, peak)) =
                vertical_extent(self.terrain.altitude, px, py, self.params.extent_window_radius)
            else {
                continue;
            };
            let min_altitude = origin_altitude.min(path_altitude);
            let lat = self.terrain.latitude.get(px, py) as f64;
            let lon = self.terrain.longitude.get(px, py) as f64;
            let distance = great_circle_distance(lat0, lon0, lat, lon, min_altitude);
            if !distance.is_finite() {
                continue;
            }
            let ray_height = distance * elevation_tan + (origin_altitude - min_altitude);
            // the ray height is relative to the lower endpoint, so both bounds are too
            if base - min_altitude <= ray_height && ray_height <= peak - min_altitude {
                return true;
            }
        }
        false
    }

    /// Shadow mask over `target`
    pub fn cast(&self, target: &Rect, cancel: &CancelToken) -> RefineResult<RasterTile<bool>> {
        let mut shadow = RasterTile::filled(*target, false);
        if self.path.interior().is_empty() {
            log::debug!("Mountain shadow: search path too short, nothing to test");
            return Ok(shadow);
        }
        let mut count = 0;
        for y in target.y..target.bottom() {
            cancel.check()?;
            for x in target.x..target.right() {
                if self.is_shadowed(x, y) {
                    shadow.set(x, y, true);
                    count += 1;
                }
            }
        }
        log::debug!("Mountain shadow: {} pixels in {:?}", count, target);
        Ok(shadow)
    }
}
