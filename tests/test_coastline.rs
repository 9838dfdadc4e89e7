use flagrefine::core::flags::{is_set, mask_of};
use flagrefine::io::geocoding::CrsGeocoding;
use flagrefine::{
    Band, CancelToken, Flag, FlagConsolidator, GeoPos, MemoryProduct, Rect, RefinementConfig,
    SensorProfile,
};
use ndarray::Array2;
use std::sync::Arc;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> RefinementConfig {
    RefinementConfig {
        cloud_buffer_width: 1,
        tile_padding: 8,
        ..Default::default()
    }
}

/// 5x5 scene on a north-up grid whose upper-left corner is at `latitude`
fn product(flags: Array2<u32>, water: Array2<f32>, latitude: f64) -> MemoryProduct {
    MemoryProduct::new(flags)
        .with_band(Band::WaterFraction, water)
        .expect("Failed to add water fraction")
        .with_geocoding(Arc::new(CrsGeocoding::north_up(
            GeoPos { lat: latitude, lon: 12.0 },
            0.001,
        )))
}

fn partial_water_at_centre() -> Array2<f32> {
    let mut water = Array2::from_elem((5, 5), 100.0);
    water[[2, 2]] = 45.0;
    water
}

#[test]
fn test_partial_water_marks_coastline() {
    init();
    let flags = Array2::from_elem((5, 5), Flag::SnowIce.mask());
    let product = product(flags, partial_water_at_centre(), -10.0);
    let consolidator =
        FlagConsolidator::new(config(), SensorProfile::landsat8()).expect("Invalid configuration");

    let out = consolidator
        .consolidate_tile(&product, Rect::scene(5, 5), &CancelToken::new())
        .expect("Consolidation failed");

    for (x, y) in [(2, 2), (1, 1), (3, 2), (2, 3)] {
        assert!(is_set(out.get(x, y), Flag::Coastline), "({}, {})", x, y);
        assert!(!is_set(out.get(x, y), Flag::SnowIce), "({}, {})", x, y);
    }
    // the partial pixel is two pixels away from the corners
    assert!(!is_set(out.get(0, 0), Flag::Coastline));
    assert!(is_set(out.get(0, 0), Flag::SnowIce));
    assert!(!is_set(out.get(4, 0), Flag::Coastline));
}

#[test]
fn test_no_coastline_in_far_south() {
    init();
    let flags = Array2::from_elem((5, 5), Flag::SnowIce.mask());
    let product = product(flags, partial_water_at_centre(), -70.0);
    let consolidator =
        FlagConsolidator::new(config(), SensorProfile::landsat8()).expect("Invalid configuration");

    let out = consolidator
        .consolidate_tile(&product, Rect::scene(5, 5), &CancelToken::new())
        .expect("Consolidation failed");
    assert!(out.data.iter().all(|v| !is_set(*v, Flag::Coastline)));
    assert!(out.data.iter().all(|v| is_set(*v, Flag::SnowIce)));
}

#[test]
fn test_surrounded_cloud_survives_coastline() {
    init();
    let cloud = mask_of(&[Flag::CloudSure, Flag::Cloud]);
    let mut flags = Array2::<u32>::zeros((5, 5));
    for y in 1..=3 {
        for x in 1..=3 {
            flags[[y, x]] = cloud;
        }
    }
    // every pixel is partially water, so every pixel is near the coast
    let water = Array2::from_elem((5, 5), 45.0);
    let product = product(flags, water, 40.0);
    let consolidator =
        FlagConsolidator::new(config(), SensorProfile::landsat8()).expect("Invalid configuration");

    let out = consolidator
        .consolidate_tile(&product, Rect::scene(5, 5), &CancelToken::new())
        .expect("Consolidation failed");

    let centre = out.get(2, 2);
    assert!(is_set(centre, Flag::Coastline));
    assert!(is_set(centre, Flag::CloudSure));
    assert!(is_set(centre, Flag::Cloud));
    assert!(!is_set(centre, Flag::CloudBuffer));

    // edge pixels of the block have no support away from the coast
    let edge = out.get(1, 2);
    assert!(is_set(edge, Flag::Coastline));
    assert!(!is_set(edge, Flag::CloudSure));
    assert!(!is_set(edge, Flag::Cloud));
    assert!(is_set(edge, Flag::CloudBuffer));
}

#[test]
fn test_cloud_backed_away_from_coast_is_kept() {
    init();
    let cloud = mask_of(&[Flag::CloudSure, Flag::Cloud]);
    let mut flags = Array2::<u32>::zeros((5, 7));
    flags[[2, 1]] = cloud;
    flags[[2, 2]] = cloud;
    flags[[2, 3]] = cloud;
    // partial water only in column 0: pixel (1, 2) is near the coast, (3, 2) is not
    let mut water = Array2::from_elem((5, 7), 0.0);
    for y in 0..5 {
        water[[y, 0]] = 30.0;
    }
    let product = MemoryProduct::new(flags)
        .with_band(Band::WaterFraction, water)
        .expect("Failed to add water fraction")
        .with_band(Band::Latitude, Array2::from_elem((5, 7), 45.0))
        .expect("Failed to add latitude")
        .with_geocoding(Arc::new(CrsGeocoding::north_up(GeoPos { lat: 45.0, lon: 0.0 }, 0.001)));
    let consolidator =
        FlagConsolidator::new(config(), SensorProfile::landsat8()).expect("Invalid configuration");

    let out = consolidator
        .consolidate_tile(&product, Rect::scene(7, 5), &CancelToken::new())
        .expect("Consolidation failed");

    // (1, 2) is backed by (2, 2), which is away from the coast
    assert!(is_set(out.get(1, 2), Flag::Coastline));
    assert!(is_set(out.get(1, 2), Flag::Cloud));
    assert!(!is_set(out.get(3, 2), Flag::Coastline));
    assert!(is_set(out.get(3, 2), Flag::Cloud));
}

#[test]
fn test_coastal_cloud_backed_across_tile_border() {
    init();
    let cloud = mask_of(&[Flag::CloudSure, Flag::Cloud]);
    let mut flags = Array2::<u32>::zeros((5, 7));
    flags[[2, 1]] = cloud;
    flags[[2, 2]] = cloud;
    flags[[2, 3]] = cloud;
    let mut water = Array2::from_elem((5, 7), 0.0);
    for y in 0..5 {
        water[[y, 0]] = 30.0;
    }
    let product = MemoryProduct::new(flags)
        .with_band(Band::WaterFraction, water)
        .expect("Failed to add water fraction")
        .with_band(Band::Latitude, Array2::from_elem((5, 7), 45.0))
        .expect("Failed to add latitude")
        .with_geocoding(Arc::new(CrsGeocoding::north_up(GeoPos { lat: 45.0, lon: 0.0 }, 0.001)));
    let consolidator =
        FlagConsolidator::new(config(), SensorProfile::landsat8()).expect("Invalid configuration");

    // the backing pixel (2, 2) lies in the padding of this tile
    let out = consolidator
        .consolidate_tile(&product, Rect::new(0, 0, 2, 5), &CancelToken::new())
        .expect("Consolidation failed");
    assert!(is_set(out.get(1, 2), Flag::Coastline));
    assert!(is_set(out.get(1, 2), Flag::Cloud));

    let whole = consolidator
        .process_scene(&product, 7, &CancelToken::new())
        .expect("Consolidation failed");
    let tiled = consolidator
        .process_scene(&product, 2, &CancelToken::new())
        .expect("Consolidation failed");
    assert_eq!(whole, tiled);
}

#[test]
fn test_refinement_is_repeatable() {
    init();
    let mut flags = Array2::<u32>::zeros((5, 5));
    flags[[1, 1]] = Flag::CloudSure.mask();
    flags[[2, 2]] = mask_of(&[Flag::CloudSure, Flag::SnowIce]);
    flags[[3, 3]] = Flag::CloudTestB.mask();
    let product = product(flags, partial_water_at_centre(), 10.0);
    let consolidator =
        FlagConsolidator::new(config(), SensorProfile::landsat8()).expect("Invalid configuration");

    let first = consolidator
        .process_scene(&product, 5, &CancelToken::new())
        .expect("Consolidation failed");
    let second = consolidator
        .process_scene(&product, 5, &CancelToken::new())
        .expect("Consolidation failed");
    assert_eq!(first, second);
}
