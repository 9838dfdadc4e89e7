use crate::core::flags::{is_set, set_flag, CloudCategory, Flag};
use crate::types::{FlagValue, RasterTile, Rect};

/// Square (Chebyshev) dilation of cloud pixels into a buffer bit
#[derive(Debug, Clone, Copy)]
pub struct BufferDilator {
    radius: usize,
}

impl BufferDilator {
    pub fn new(radius: usize) -> Self {
        Self { radius }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Mark `buffer` on every pixel within `radius` of (x, y), excluding the
    /// centre, clipped to `bounds` and written only inside `target`
    pub fn dilate_pixel(
        &self,
        x: usize,
        y: usize,
        buffer: Flag,
        target: &mut RasterTile<FlagValue>,
        bounds: &Rect,
    ) -> usize {
        let left = x.saturating_sub(self.radius).max(bounds.x);
        let top = y.saturating_sub(self.radius).max(bounds.y);
        let right = (x + self.radius + 1).min(bounds.right());
        let bottom = (y + self.radius + 1).min(bounds.bottom());

        let mut marked = 0;
        for j in top..bottom {
            for i in left..right {
                if (i == x && j == y) || !target.contains(i, j) {
                    continue;
                }
                set_flag(target.get_mut(i, j), buffer, true);
                marked += 1;
            }
        }
        marked
    }

    /// Dilate every seed pixel of `region` into `buffer`
    pub fn dilate<F>(
        &self,
        region: &Rect,
        is_seed: F,
        buffer: Flag,
        target: &mut RasterTile<FlagValue>,
    ) -> usize
    where
        F: Fn(usize, usize) -> bool,
    {
        if self.radius == 0 {
            return 0;
        }
        let mut seeds = 0;
        for (x, y) in region.pixels() {
            if is_seed(x, y) {
                self.dilate_pixel(x, y, buffer, target, region);
                seeds += 1;
            }
        }
        seeds
    }
}

/// Remove a category's buffer bit wherever its cloud bit is set
pub fn consolidate_cloud_and_buffer(target: &mut RasterTile<FlagValue>, category: CloudCategory) {
    for value in target.data.iter_mut() {
        if is_set(*value, category.cloud) {
            set_flag(value, category.buffer, false);
        }
    }
}
