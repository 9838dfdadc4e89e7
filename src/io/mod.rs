//! Scene access and geocoding

pub mod geocoding;
pub mod product;

pub use geocoding::{CrsGeocoding, Geocoding, GeocodingKind, PixelGeocoding, TiePointGeocoding};
pub use product::{Band, FlagBand, MemoryProduct, RasterSource};
