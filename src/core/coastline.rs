//! Coastline proximity and cloud correction along coastlines
//!
//! Bright surf and mixed land/water pixels are often misclassified as cloud
//! or snow. Near a coastline, a cloud bit is kept only when it is backed by
//! cloud pixels away from the coast.

use crate::core::flags::{clear_flags, is_set, set_flag, CloudCategory, Flag, CLOUD_AGGREGATE_MASK};
use crate::io::geocoding::GeocodingKind;
use crate::types::{FlagValue, RasterTile, Rect};

/// Coastline tests are not applied south of this latitude (Antarctic ice shelf)
pub const COASTLINE_MIN_LATITUDE: f64 = -58.0;

/// Water-fraction values above this are no-data
pub const MAX_WATER_FRACTION: f32 = 100.0;

/// Proximity test selected from the product's geocoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoastlineStrategy {
    /// A window pixel with a water fraction different from the centre
    WaterContrast,
    /// A window pixel with a partial water fraction, outside the far south
    FractionalWater,
}

impl CoastlineStrategy {
    pub fn for_geocoding(kind: GeocodingKind) -> Self {
        match kind {
            GeocodingKind::TiePoint | GeocodingKind::Crs => CoastlineStrategy::FractionalWater,
            GeocodingKind::PixelGrid | GeocodingKind::Other => CoastlineStrategy::WaterContrast,
        }
    }
}

/// Result of refining one pixel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelOutcome {
    pub near_coastline: bool,
    /// Categories whose cloud bit was removed
    pub cleared: usize,
}

/// Coastline refinement over one extended tile
pub struct CoastlineRefiner<'a> {
    water_fraction: &'a RasterTile<f32>,
    latitude: Option<&'a RasterTile<f32>>,
    strategy: CoastlineStrategy,
    window: usize,
}

impl<'a> CoastlineRefiner<'a> {
    /// `water_fraction` and `latitude` must cover the extended tile
    pub fn new(
        water_fraction: &'a RasterTile<f32>,
        latitude: Option<&'a RasterTile<f32>>,
        kind: GeocodingKind,
        window: usize,
    ) -> Self {
        Self {
            water_fraction,
            latitude,
            strategy: CoastlineStrategy::for_geocoding(kind),
            window,
        }
    }

    pub fn strategy(&self) -> CoastlineStrategy {
        self.strategy
    }

    fn fraction(&self, x: usize, y: usize) -> Option<f32> {
        self.water_fraction
            .try_get(x, y)
            .filter(|v| v.is_finite() && *v >= 0.0 && *v <= MAX_WATER_FRACTION)
    }

    fn window_rect(&self, x: usize, y: usize, radius: usize) -> Rect {
        let left = x.saturating_sub(radius);
        let top = y.saturating_sub(radius);
        Rect::new(left, top, x + radius + 1 - left, y + radius + 1 - top)
            .intersection(&self.water_fraction.rect)
    }

    /// Partial water cover outside the far south
    pub fn is_coastline_pixel(&self, x: usize, y: usize) -> bool {
        let partial = matches!(self.fraction(x, y), Some(wf) if wf > 0.0 && wf < MAX_WATER_FRACTION);
        if !partial {
            return false;
        }
        match self.latitude.and_then(|lat| lat.try_get(x, y)) {
            Some(lat) if lat.is_finite() => lat as f64 > COASTLINE_MIN_LATITUDE,
            _ => true,
        }
    }

    pub fn is_near_coastline(&self, x: usize, y: usize) -> bool {
        let window = self.window_rect(x, y, self.window);
        match self.strategy {
            CoastlineStrategy::FractionalWater => {
                window.pixels().any(|(i, j)| self.is_coastline_pixel(i, j))
            }
            CoastlineStrategy::WaterContrast => {
                let Some(centre) = self.fraction(x, y) else {
                    return false;
                };
                window
                    .pixels()
                    .any(|(i, j)| matches!(self.fraction(i, j), Some(wf) if wf != centre))
            }
        }
    }

    /// Whether every 8-neighbour carries `flag` in `source`
    pub fn is_surrounded(x: usize, y: usize, flag: Flag, source: &RasterTile<FlagValue>) -> bool {
        if x == 0 || y == 0 {
            return false;
        }
        for j in y - 1..=y + 1 {
            for i in x - 1..=x + 1 {
                if i == x && j == y {
                    continue;
                }
                match source.try_get(i, j) {
                    Some(v) if is_set(v, flag) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Whether a cloud pixel next to the coast is supported by its surroundings
    ///
    /// The 3x3 neighbourhood is clipped to the extended tile only, so the
    /// outcome does not depend on where tile borders fall.
    pub fn keeps_cloud(&self, x: usize, y: usize, flag: Flag, source: &RasterTile<FlagValue>) -> bool {
        if Self::is_surrounded(x, y, flag, source) {
            return true;
        }
        self.window_rect(x, y, 1).pixels().any(|(i, j)| {
            matches!(source.try_get(i, j), Some(v) if is_set(v, flag)) && !self.is_near_coastline(i, j)
        })
    }

    /// Apply the coastline correction for every category at (x, y)
    pub fn refine_pixel(
        &self,
        x: usize,
        y: usize,
        categories: &[CloudCategory],
        source: &RasterTile<FlagValue>,
        target: &mut RasterTile<FlagValue>,
    ) -> PixelOutcome {
        if !self.is_near_coastline(x, y) {
            return PixelOutcome::default();
        }
        let source_value = source.get(x, y);
        let cell = target.get_mut(x, y);
        set_flag(cell, Flag::Coastline, true);
        if is_set(source_value, Flag::SnowIce) {
            set_flag(cell, Flag::SnowIce, false);
        }

        let mut cleared = 0;
        for category in categories {
            if !is_set(source_value, category.cloud) {
                continue;
            }
            if !self.keeps_cloud(x, y, category.cloud, source) {
                clear_flags(cell, category.cloud.mask() | CLOUD_AGGREGATE_MASK);
                cleared += 1;
            }
        }
        PixelOutcome {
            near_coastline: true,
            cleared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn water(rect: Rect, f: impl Fn(usize, usize) -> f32) -> RasterTile<f32> {
        RasterTile {
            rect,
            data: Array2::from_shape_fn(rect.shape(), |(i, j)| f(rect.x + j, rect.y + i)),
        }
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            CoastlineStrategy::for_geocoding(GeocodingKind::Crs),
            CoastlineStrategy::FractionalWater
        );
        assert_eq!(
            CoastlineStrategy::for_geocoding(GeocodingKind::PixelGrid),
            CoastlineStrategy::WaterContrast
        );
    }

    #[test]
    fn test_fractional_water_respects_latitude() {
        let rect = Rect::scene(5, 5);
        let wf = water(rect, |x, _| if x == 2 { 45.0 } else { 100.0 });
        let tropics = RasterTile::filled(rect, -10.0f32);
        let antarctic = RasterTile::filled(rect, -70.0f32);

        let refiner = CoastlineRefiner::new(&wf, Some(&tropics), GeocodingKind::Crs, 1);
        assert!(refiner.is_near_coastline(3, 2));
        assert!(!refiner.is_near_coastline(0, 2));

        let refiner = CoastlineRefiner::new(&wf, Some(&antarctic), GeocodingKind::Crs, 1);
        assert!(rect.pixels().all(|(x, y)| !refiner.is_near_coastline(x, y)));
    }

    #[test]
    fn test_water_contrast() {
        let rect = Rect::scene(4, 4);
        let wf = water(rect, |x, _| if x < 2 { 0.0 } else { 100.0 });
        let refiner = CoastlineRefiner::new(&wf, None, GeocodingKind::PixelGrid, 1);
        assert!(refiner.is_near_coastline(1, 1));
        assert!(refiner.is_near_coastline(2, 1));
        assert!(!refiner.is_near_coastline(0, 1));
        assert!(!refiner.is_near_coastline(3, 1));
    }

    #[test]
    fn test_no_data_is_never_coastline() {
        let rect = Rect::scene(3, 3);
        let wf = water(rect, |x, y| if (x, y) == (1, 1) { 255.0 } else { 0.0 });
        let refiner = CoastlineRefiner::new(&wf, None, GeocodingKind::Other, 1);
        assert!(!refiner.is_near_coastline(1, 1));
        assert!(!refiner.is_near_coastline(0, 0));

        let refiner = CoastlineRefiner::new(&wf, None, GeocodingKind::Crs, 1);
        assert!(!refiner.is_near_coastline(1, 1));
    }

    #[test]
    fn test_isolated_coastal_cloud_is_removed() {
        let rect = Rect::scene(5, 5);
        let wf = water(rect, |x, _| if x < 2 { 0.0 } else { 100.0 });
        let mut source = RasterTile::filled(rect, 0 as FlagValue);
        source.set(2, 2, Flag::CloudSure.mask() | Flag::Cloud.mask() | Flag::SnowIce.mask());
        let mut target = source.clone();

        let refiner = CoastlineRefiner::new(&wf, None, GeocodingKind::PixelGrid, 1);
        let outcome = refiner.refine_pixel(2, 2, &[CloudCategory::SURE], &source, &mut target);
        assert!(outcome.near_coastline);
        assert_eq!(outcome.cleared, 1);
        assert_eq!(target.get(2, 2), Flag::Coastline.mask());
    }

    #[test]
    fn test_cloud_backed_by_inland_neighbour_is_kept() {
        let rect = Rect::scene(6, 3);
        // coastline between x = 2 and x = 3, pixel x = 0 is inland
        let wf = water(rect, |x, _| if x < 3 { 0.0 } else { 100.0 });
        let mut source = RasterTile::filled(rect, 0 as FlagValue);
        source.set(0, 1, Flag::CloudTestA.mask());
        source.set(1, 1, Flag::CloudTestA.mask());
        let mut target = source.clone();

        let refiner = CoastlineRefiner::new(&wf, None, GeocodingKind::PixelGrid, 1);
        assert!(!refiner.is_near_coastline(0, 1));
        assert!(!refiner.is_near_coastline(1, 1));

        source.set(2, 1, Flag::CloudTestA.mask());
        target.set(2, 1, Flag::CloudTestA.mask());
        let categories = [CloudCategory::TESTS[0]];
        let outcome = refiner.refine_pixel(2, 1, &categories, &source, &mut target);
        assert!(outcome.near_coastline);
        assert_eq!(outcome.cleared, 0);
        assert!(is_set(target.get(2, 1), Flag::CloudTestA));
    }

    #[test]
    fn test_surrounded_cloud_is_kept() {
        let rect = Rect::scene(5, 5);
        let wf = water(rect, |x, _| if x < 2 { 0.0 } else { 100.0 });
        let source = RasterTile::filled(rect, Flag::Cloud.mask());
        let mut target = source.clone();
        let refiner = CoastlineRefiner::new(&wf, None, GeocodingKind::PixelGrid, 1);

        assert!(CoastlineRefiner::is_surrounded(2, 2, Flag::Cloud, &source));
        let outcome = refiner.refine_pixel(2, 2, &[CloudCategory::OVERALL], &source, &mut target);
        assert_eq!(outcome.cleared, 0);
        assert!(is_set(target.get(2, 2), Flag::Cloud));
        assert!(is_set(target.get(2, 2), Flag::Coastline));
    }
}
