//! Flag refinement processors

pub mod buffer;
pub mod cloud_shadow;
pub mod coastline;
pub mod consolidate;
pub mod flags;
pub mod kmeans;
pub mod sun_path;
pub mod terrain_shadow;

// Re-export main types
pub use buffer::{consolidate_cloud_and_buffer, BufferDilator};
pub use cloud_shadow::{pressure_to_height, ShadowCaster, ShadowInputs, ShadowStats};
pub use coastline::{CoastlineRefiner, CoastlineStrategy, PixelOutcome};
pub use consolidate::{ConsolidationStats, FlagConsolidator, TileInputs};
pub use flags::{CloudCategory, CloudDerivation, Flag, SensorProfile};
pub use kmeans::{ClusterParams, ClusterResult, SpectralClusterer};
pub use sun_path::{SearchPath, SunDirection};
pub use terrain_shadow::{TerrainOcclusionCaster, TerrainRasters};
