//! Sun geometry and pixel search paths shared by the shadow casters

use crate::types::{RasterTile, Rect};

/// Largest sun zenith angle after adaptation (degrees)
pub const MAX_ADAPTED_ZENITH: f64 = 89.0;

/// Stretch the sun zenith toward the horizon
///
/// `z' = z * (2 * ((90 - z) / 90)^3 + 1)`, capped at 89 degrees.
pub fn adapted_sun_zenith(zenith_deg: f64) -> f64 {
    let q = (90.0 - zenith_deg) / 90.0;
    (zenith_deg * (2.0 * q * q * q + 1.0)).min(MAX_ADAPTED_ZENITH)
}

/// Sun position used for a whole tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunDirection {
    pub zenith_deg: f64,
    pub azimuth_deg: f64,
}

impl SunDirection {
    pub fn new(zenith_deg: f64, azimuth_deg: f64) -> Self {
        Self {
            zenith_deg,
            azimuth_deg,
        }
    }

    /// Sun angles at the centre pixel of `target`; `None` when not finite
    pub fn at_tile_centre(
        zenith: &RasterTile<f32>,
        azimuth: &RasterTile<f32>,
        target: &Rect,
    ) -> Option<Self> {
        let x = target.x + target.width / 2;
        let y = target.y + target.height / 2;
        let z = zenith.try_get(x, y)? as f64;
        let a = azimuth.try_get(x, y)? as f64;
        if !(z.is_finite() && a.is_finite()) {
            return None;
        }
        Some(Self::new(z, a))
    }

    pub fn adapted(&self) -> Self {
        Self::new(adapted_sun_zenith(self.zenith_deg), self.azimuth_deg)
    }

    /// Pixel displacement toward the sun for an object of height `height`
    ///
    /// x grows eastward and y southward, so a sun in the north gives a
    /// negative y displacement.
    pub fn displacement_toward(&self, height: f64, resolution: f64) -> (f64, f64) {
        let reach = height * self.zenith_deg.to_radians().tan() / resolution;
        let azimuth = self.azimuth_deg.to_radians();
        (reach * azimuth.sin(), -reach * azimuth.cos())
    }

    /// Pixel displacement away from the sun, where a shadow falls
    pub fn displacement_away(&self, height: f64, resolution: f64) -> (f64, f64) {
        let (dx, dy) = self.displacement_toward(height, resolution);
        (-dx, -dy)
    }
}

/// Integer line between two pixels, both ends included
pub fn rasterize_line(from: (isize, isize), to: (isize, isize)) -> Vec<(isize, isize)> {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;

    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut line = Vec::with_capacity((dx - dy) as usize + 1);
    loop {
        line.push((x0, y0));
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
    line
}

/// Rounding slack, in pixels, allowed when pulling a clipped endpoint inside
const ENDPOINT_RETRIES: usize = 4;

/// End of a ray from `origin`, pulled back toward the origin until inside `bounds`
///
/// The largest fraction of `delta` that stays inside `bounds` is clipped per
/// axis, then stepped back pixel by pixel if rounding still leaves it
/// outside. When nothing fits the origin itself is returned.
pub fn ray_endpoint(origin: (isize, isize), delta: (f64, f64), bounds: &Rect) -> (isize, isize) {
    let point = |fraction: f64| {
        (
            origin.0 + (delta.0 * fraction).round() as isize,
            origin.1 + (delta.1 * fraction).round() as isize,
        )
    };

    let full = point(1.0);
    if bounds.contains_signed(full.0, full.1) {
        return full;
    }
    if bounds.is_empty() || !bounds.contains_signed(origin.0, origin.1) {
        return origin;
    }

    let axes = [
        (origin.0, delta.0, bounds.x as isize, bounds.right() as isize - 1),
        (origin.1, delta.1, bounds.y as isize, bounds.bottom() as isize - 1),
    ];
    let mut fraction: f64 = 1.0;
    for (start, d, low, high) in axes {
        if d > 0.0 {
            fraction = fraction.min((high - start) as f64 / d);
        } else if d < 0.0 {
            fraction = fraction.min((low - start) as f64 / d);
        }
    }
    let step = 1.0 / delta.0.abs().max(delta.1.abs());
    for _ in 0..ENDPOINT_RETRIES {
        if fraction <= 0.0 {
            break;
        }
        let candidate = point(fraction);
        if bounds.contains_signed(candidate.0, candidate.1) {
            return candidate;
        }
        fraction -= step;
    }
    origin
}

/// Pixel offsets of a ray, ordered from the origin outward
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPath {
    offsets: Vec<(isize, isize)>,
}

impl SearchPath {
    /// Ray from `origin` along `delta`, shrunk to stay inside `bounds`
    pub fn build(origin: (isize, isize), delta: (f64, f64), bounds: &Rect) -> Self {
        if !(delta.0.is_finite() && delta.1.is_finite()) {
            return Self {
                offsets: vec![(0, 0)],
            };
        }
        let end = ray_endpoint(origin, delta, bounds);
        let offsets = rasterize_line(origin, end)
            .into_iter()
            .map(|(x, y)| (x - origin.0, y - origin.1))
            .collect();
        Self { offsets }
    }

    /// Offsets including origin and end point
    pub fn offsets(&self) -> &[(isize, isize)] {
        &self.offsets
    }

    /// Offsets without the origin and the end point
    pub fn interior(&self) -> &[(isize, isize)] {
        if self.offsets.len() <= 2 {
            return &[];
        }
        &self.offsets[1..self.offsets.len() - 1]
    }

    /// Offsets without the origin
    pub fn beyond_origin(&self) -> &[(isize, isize)] {
        &self.offsets[1.min(self.offsets.len())..]
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// A path made of the origin alone
    pub fn is_degenerate(&self) -> bool {
        self.offsets.len() <= 1
    }
}
