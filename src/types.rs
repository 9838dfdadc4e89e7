use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-pixel classification bitmask
pub type FlagValue = u32;

/// Pixel rectangle in scene coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle anchored at the scene origin
    pub fn scene(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive right edge
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Shape as ndarray (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Signed variant of [`Rect::contains`] for offsets that may leave the scene
    pub fn contains_signed(&self, x: isize, y: isize) -> bool {
        x >= 0 && y >= 0 && self.contains(x as usize, y as usize)
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return Rect::new(x, y, 0, 0);
        }
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Pad the rectangle on every side and clip it to `bounds`
    pub fn extend(&self, padding: usize, bounds: &Rect) -> Rect {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let padded = Rect::new(
            x,
            y,
            self.right() + padding - x,
            self.bottom() + padding - y,
        );
        padded.intersection(bounds)
    }

    /// Split into tiles of at most `tile_width` x `tile_height`, row-major
    pub fn tiles(&self, tile_width: usize, tile_height: usize) -> Vec<Rect> {
        let tile_width = tile_width.max(1);
        let tile_height = tile_height.max(1);
        let mut tiles = Vec::new();
        let mut y = self.y;
        while y < self.bottom() {
            let height = tile_height.min(self.bottom() - y);
            let mut x = self.x;
            while x < self.right() {
                let width = tile_width.min(self.right() - x);
                tiles.push(Rect::new(x, y, width, height));
                x += width;
            }
            y += height;
        }
        tiles
    }

    /// Iterate over all (x, y) positions, row by row
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.y..self.bottom()).flat_map(move |y| (self.x..self.right()).map(move |x| (x, y)))
    }
}

/// A raster window addressed by scene coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile<T> {
    pub rect: Rect,
    pub data: Array2<T>,
}

impl<T: Clone> RasterTile<T> {
    /// Wrap an array covering `rect`; the array shape must match
    pub fn new(rect: Rect, data: Array2<T>, band: &str) -> RefineResult<Self> {
        if data.dim() != rect.shape() {
            return Err(RefineError::ShapeMismatch {
                band: band.to_string(),
                expected: rect.shape(),
                actual: data.dim(),
            });
        }
        Ok(Self { rect, data })
    }

    pub fn filled(rect: Rect, value: T) -> Self {
        Self {
            rect,
            data: Array2::from_elem(rect.shape(), value),
        }
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        self.rect.contains(x, y)
    }

    /// Sample at scene position; the caller guarantees containment
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[[y - self.rect.y, x - self.rect.x]].clone()
    }

    /// Sample at scene position or `None` outside the tile
    #[inline]
    pub fn try_get(&self, x: usize, y: usize) -> Option<T> {
        if self.contains(x, y) {
            Some(self.get(x, y))
        } else {
            None
        }
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        &mut self.data[[y - self.rect.y, x - self.rect.x]]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        *self.get_mut(x, y) = value;
    }

    /// Copy out a sub-window; `rect` must lie inside the tile
    pub fn subset(&self, rect: Rect) -> RefineResult<RasterTile<T>> {
        if !self.rect.contains_rect(&rect) {
            return Err(RefineError::Processing(format!(
                "Requested window {:?} outside tile {:?}",
                rect, self.rect
            )));
        }
        let y0 = rect.y - self.rect.y;
        let x0 = rect.x - self.rect.x;
        let view = self
            .data
            .slice(ndarray::s![y0..y0 + rect.height, x0..x0 + rect.width]);
        Ok(RasterTile {
            rect,
            data: view.to_owned(),
        })
    }

    /// Require the tile to cover exactly `rect`
    pub fn expect_rect(&self, rect: &Rect, band: &str) -> RefineResult<()> {
        if self.rect != *rect {
            return Err(RefineError::ShapeMismatch {
                band: band.to_string(),
                expected: rect.shape(),
                actual: self.data.dim(),
            });
        }
        Ok(())
    }
}

/// Geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

/// Affine pixel-to-map transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Map coordinates (x, y) of a fractional pixel position
    pub fn apply(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.top_left_x + px * self.pixel_width + py * self.rotation_x,
            self.top_left_y + px * self.rotation_y + py * self.pixel_height,
        )
    }
}

/// Shared cancellation flag checked between rows
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an externally owned flag
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`RefineError::Cancelled`] once cancellation was requested
    pub fn check(&self) -> RefineResult<()> {
        if self.is_cancelled() {
            return Err(RefineError::Cancelled);
        }
        Ok(())
    }
}

/// Error types for flag refinement
#[derive(Debug, thiserror::Error)]
pub enum RefineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing required band: {0}")]
    MissingBand(String),

    #[error("Shape mismatch for band '{band}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        band: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Clustering error: {0}")]
    Clustering(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for refinement operations
pub type RefineResult<T> = Result<T, RefineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_clips_to_scene() {
        let scene = Rect::scene(100, 80);
        let tile = Rect::new(10, 0, 20, 20);
        let extended = tile.extend(64, &scene);
        assert_eq!(extended, Rect::new(0, 0, 94, 80));

        let inner = Rect::new(40, 30, 10, 10);
        assert_eq!(inner.extend(5, &scene), Rect::new(35, 25, 20, 20));
    }

    #[test]
    fn test_tiles_cover_scene() {
        let scene = Rect::scene(10, 7);
        let tiles = scene.tiles(4, 3);
        assert_eq!(tiles.len(), 9);
        let covered: usize = tiles.iter().map(|t| t.width * t.height).sum();
        assert_eq!(covered, 70);
        assert_eq!(tiles[2], Rect::new(8, 0, 2, 3));
        assert_eq!(tiles[8], Rect::new(8, 6, 2, 1));
    }

    #[test]
    fn test_raster_tile_scene_addressing() {
        let rect = Rect::new(5, 7, 3, 2);
        let mut tile = RasterTile::filled(rect, 0u32);
        tile.set(6, 8, 9);
        assert_eq!(tile.get(6, 8), 9);
        assert_eq!(tile.data[[1, 1]], 9);
        assert_eq!(tile.try_get(4, 8), None);

        let sub = tile.subset(Rect::new(6, 8, 2, 1)).unwrap();
        assert_eq!(sub.get(6, 8), 9);
        assert!(tile.subset(Rect::new(6, 8, 3, 1)).is_err());
    }

    #[test]
    fn test_raster_tile_shape_checked() {
        let result = RasterTile::new(Rect::new(0, 0, 3, 2), Array2::<f32>::zeros((3, 3)), "water");
        match result {
            Err(RefineError::ShapeMismatch { band, expected, actual }) => {
                assert_eq!(band, "water");
                assert_eq!(expected, (2, 3));
                assert_eq!(actual, (3, 3));
            }
            other => panic!("unexpected result: {:?}", other.map(|t| t.rect)),
        }
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        let shared = token.clone();
        shared.cancel();
        assert!(matches!(token.check(), Err(RefineError::Cancelled)));
    }
}
