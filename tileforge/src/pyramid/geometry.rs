//! Pyramid geometry: zoom level selection and tile counts.
//!
//! All arithmetic is integer based. A level `n` of a pyramid with highest
//! level `z` is the source image scaled down by `2^(z - n)`, rounding
//! dimensions up.

/// Divide rounding up. `divisor` must be non-zero.
fn div_ceil(value: u64, divisor: u64) -> u64 {
    value.div_ceil(divisor)
}

/// Smallest zoom level whose level-0 image fits into one tile.
///
/// Equivalently, the number of halvings needed before the largest image
/// dimension is at most `tile_size`.
///
/// # Example
///
/// ```
/// use tileforge::pyramid::zoom_level_for;
///
/// assert_eq!(zoom_level_for(4000, 3000, 512), 3);
/// assert_eq!(zoom_level_for(512, 100, 512), 0);
/// ```
pub fn zoom_level_for(width: u32, height: u32, tile_size: u32) -> u32 {
    let tile_size = u64::from(tile_size.max(1));
    let largest = u64::from(width.max(height));
    let mut zoom = 0;
    while div_ceil(largest, 1u64 << zoom) > tile_size {
        zoom += 1;
    }
    zoom
}

/// Pixel dimensions of `level` in a pyramid whose highest level is `zoom`.
pub fn level_dimensions(width: u32, height: u32, zoom: u32, level: u32) -> (u32, u32) {
    let scale = 1u64 << zoom.saturating_sub(level);
    (
        div_ceil(u64::from(width), scale) as u32,
        div_ceil(u64::from(height), scale) as u32,
    )
}

/// Number of tiles at `level`.
pub fn tiles_at_level(width: u32, height: u32, tile_size: u32, zoom: u32, level: u32) -> u64 {
    let span = u64::from(tile_size.max(1)) << zoom.saturating_sub(level);
    div_ceil(u64::from(width), span) * div_ceil(u64::from(height), span)
}

/// Total tiles across levels `0..=zoom`.
pub fn tile_count(width: u32, height: u32, tile_size: u32, zoom: u32) -> u64 {
    (0..=zoom)
        .map(|level| tiles_at_level(width, height, tile_size, zoom, level))
        .sum()
}

/// Geometry of one pyramid, computed once per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidGeometry {
    /// Width of the highest level (source image)
    pub width: u32,
    /// Height of the highest level (source image)
    pub height: u32,
    /// Edge length of a full tile in pixels
    pub tile_size: u32,
    /// Highest zoom level
    pub zoom_level: u32,
}

impl PyramidGeometry {
    /// Compute the geometry for an image of the given size.
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        Self {
            width,
            height,
            tile_size,
            zoom_level: zoom_level_for(width, height, tile_size),
        }
    }

    /// Dimensions of a level.
    pub fn level_dimensions(&self, level: u32) -> (u32, u32) {
        level_dimensions(self.width, self.height, self.zoom_level, level)
    }

    /// Columns and rows of tiles at a level.
    pub fn grid(&self, level: u32) -> (u32, u32) {
        let (w, h) = self.level_dimensions(level);
        (w.div_ceil(self.tile_size), h.div_ceil(self.tile_size))
    }

    /// Total tiles across all levels.
    pub fn tile_count(&self) -> u64 {
        tile_count(self.width, self.height, self.tile_size, self.zoom_level)
    }
}
