//! flagrefine: post-classification refinement of pixel cloud masks
//!
//! Takes the per-pixel classification flags of an optical scene and refines
//! them tile by tile: cloud artefacts along coastlines are removed, cloud
//! buffers are dilated, and cloud and mountain shadows are detected.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{ClusteringMode, RefinementConfig, ShadowParams};
pub use types::{CancelToken, FlagValue, GeoPos, GeoTransform, RasterTile, Rect, RefineError, RefineResult};

pub use crate::core::{Flag, FlagConsolidator, SensorProfile, SpectralClusterer, TileInputs};
pub use io::{Band, FlagBand, MemoryProduct, RasterSource};
