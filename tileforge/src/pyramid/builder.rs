//! Image decoding and tile cutting.

use super::descriptor::TILE_FORMAT;
use super::geometry::PyramidGeometry;
use super::{TileError, TilePyramidDescriptor};
use crate::layout::{retired_path, staging_path, TileFileLayout, DESCRIPTOR_FILE};
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageReader};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Default edge length of a tile in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Default JPEG quality for tiles.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Fixed per-deployment tiling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingConfig {
    /// Edge length of a full tile in pixels
    pub tile_size: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl TilingConfig {
    /// Set the tile size.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    /// Set the JPEG quality, clamped to 1-100.
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }
}

/// Produces a tile pyramid for one source image.
///
/// Implementations must be `Send + Sync` so a single builder can be shared
/// by every worker thread.
pub trait PyramidBuilder: Send + Sync {
    /// Build the pyramid for `source` into `container`.
    ///
    /// On success the container holds every tile and, last of all, the
    /// descriptor. On failure nothing written by this attempt remains and
    /// any previously existing container is left as it was.
    fn build(&self, source: &Path, container: &Path) -> Result<TilePyramidDescriptor, TileError>;
}

/// Read the descriptor of an existing pyramid without touching its tiles.
///
/// Returns `Ok(None)` if no finished pyramid exists for the key.
pub fn locate_existing(
    owner_id: &str,
    relative_path: &str,
    tile_root: &Path,
) -> Result<Option<TilePyramidDescriptor>, TileError> {
    let layout = TileFileLayout::new(tile_root);
    let path = layout.descriptor_path_for(owner_id, relative_path)?;
    TilePyramidDescriptor::read(&path)
}

/// Pyramid builder backed by the `image` crate, writing JPEG tiles.
#[derive(Debug, Clone, Default)]
pub struct TilePyramidBuilder {
    config: TilingConfig,
}

impl TilePyramidBuilder {
    /// Create a builder with the given tiling parameters.
    pub fn new(config: TilingConfig) -> Self {
        Self { config }
    }

    /// The tiling parameters in use.
    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    fn decode(&self, source: &Path) -> Result<DynamicImage, TileError> {
        let reader = ImageReader::open(source)
            .map_err(|e| TileError::io(source, e))?
            .with_guessed_format()
            .map_err(|e| TileError::io(source, e))?;

        reader.decode().map_err(|e| match e {
            ImageError::IoError(io) => TileError::io(source, io),
            other => TileError::UnsupportedFormat {
                path: source.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }

    /// Write every level into `staging`, descriptor last.
    fn write_pyramid(
        &self,
        image: DynamicImage,
        geometry: &PyramidGeometry,
        staging: &Path,
    ) -> Result<TilePyramidDescriptor, TileError> {
        let mut written = 0u64;
        let mut level_image = image;

        for level in (0..=geometry.zoom_level).rev() {
            let (w, h) = geometry.level_dimensions(level);
            if level < geometry.zoom_level {
                level_image = level_image.resize_exact(w, h, FilterType::Triangle);
            }
            written += self.write_level(&level_image, geometry, level, staging)?;
        }

        debug_assert_eq!(written, geometry.tile_count());

        let descriptor = TilePyramidDescriptor {
            width: geometry.width,
            height: geometry.height,
            zoom_level: geometry.zoom_level,
            tile_count: written,
            tile_size: geometry.tile_size,
            format: TILE_FORMAT.to_string(),
            created_at: Utc::now(),
        };
        descriptor.write(&staging.join(DESCRIPTOR_FILE))?;
        Ok(descriptor)
    }

    fn write_level(
        &self,
        level_image: &DynamicImage,
        geometry: &PyramidGeometry,
        level: u32,
        staging: &Path,
    ) -> Result<u64, TileError> {
        let tile_size = geometry.tile_size;
        let (cols, rows) = geometry.grid(level);
        let (level_w, level_h) = (level_image.width(), level_image.height());
        let mut count = 0;

        for row in 0..rows {
            let row_dir = staging.join(level.to_string()).join(row.to_string());
            fs::create_dir_all(&row_dir).map_err(|e| TileError::io(&row_dir, e))?;

            for col in 0..cols {
                let x = col * tile_size;
                let y = row * tile_size;
                // Edge tiles are cropped to the remaining pixels
                let w = tile_size.min(level_w - x);
                let h = tile_size.min(level_h - y);
                let tile = level_image.crop_imm(x, y, w, h);

                let path = row_dir.join(format!("{}.{}", col, TILE_FORMAT));
                self.write_tile(&tile, &path)?;
                count += 1;
            }
        }

        debug!(level, cols, rows, "Wrote pyramid level");
        Ok(count)
    }

    fn write_tile(&self, tile: &DynamicImage, path: &Path) -> Result<(), TileError> {
        let file = fs::File::create(path).map_err(|e| TileError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        let encoder = JpegEncoder::new_with_quality(&mut writer, self.config.jpeg_quality);
        tile.to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|e| match e {
                ImageError::IoError(io) => TileError::io(path, io),
                other => TileError::Encode {
                    path: path.to_path_buf(),
                    reason: other.to_string(),
                },
            })?;
        writer.flush().map_err(|e| TileError::io(path, e))
    }
}

impl PyramidBuilder for TilePyramidBuilder {
    fn build(&self, source: &Path, container: &Path) -> Result<TilePyramidDescriptor, TileError> {
        let image = self.decode(source)?;
        let geometry = PyramidGeometry::new(image.width(), image.height(), self.config.tile_size);

        info!(
            source = %source.display(),
            width = geometry.width,
            height = geometry.height,
            zoom_level = geometry.zoom_level,
            tiles = geometry.tile_count(),
            "Building tile pyramid"
        );

        let staging = staging_path(container);
        let result = prepare_staging(&staging)
            .and_then(|_| self.write_pyramid(image, &geometry, &staging))
            .and_then(|descriptor| {
                swap_into_place(&staging, container)?;
                Ok(descriptor)
            });

        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %staging.display(), error = %e, "Failed to clean up partial pyramid");
                }
            }
        }
        result
    }
}

/// Create an empty staging directory, discarding leftovers of a crashed build.
fn prepare_staging(staging: &Path) -> Result<(), TileError> {
    match fs::remove_dir_all(staging) {
        Ok(()) => debug!(path = %staging.display(), "Removed stale staging directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(TileError::io(staging, e)),
    }
    fs::create_dir_all(staging).map_err(|e| TileError::io(staging, e))
}

/// Replace `container` with the finished `staging` directory.
fn swap_into_place(staging: &Path, container: &Path) -> Result<(), TileError> {
    if !container.exists() {
        return fs::rename(staging, container).map_err(|e| TileError::io(container, e));
    }

    let retired = retired_path(container);
    match fs::remove_dir_all(&retired) {
        Ok(()) => debug!(path = %retired.display(), "Removed leftover replaced pyramid"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(TileError::io(&retired, e)),
    }
    fs::rename(container, &retired).map_err(|e| TileError::io(container, e))?;

    if let Err(e) = fs::rename(staging, container) {
        // Put the previous pyramid back so the key keeps its old tiles
        if let Err(restore) = fs::rename(&retired, container) {
            error!(
                path = %container.display(),
                error = %restore,
                "Failed to restore previous pyramid"
            );
        }
        return Err(TileError::io(container, e));
    }

    if let Err(e) = fs::remove_dir_all(&retired) {
        warn!(path = %retired.display(), error = %e, "Failed to remove replaced pyramid");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    fn count_tiles(container: &Path) -> u64 {
        let mut count = 0;
        let mut stack = vec![container.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().is_some_and(|e| e == TILE_FORMAT) {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_build_writes_all_levels_and_descriptor() {
        let temp = TempDir::new().unwrap();
        let source = write_png(temp.path(), "src.png", 300, 200);
        let container = temp.path().join("out/src.png.pyramid");
        fs::create_dir_all(container.parent().unwrap()).unwrap();

        let builder = TilePyramidBuilder::new(TilingConfig::default().with_tile_size(128));
        let descriptor = builder.build(&source, &container).unwrap();

        // 300x200 at 128px tiles: zoom 2, levels 1 + 2 + 6 tiles
        assert_eq!(descriptor.zoom_level, 2);
        assert_eq!(descriptor.tile_count, 9);
        assert_eq!((descriptor.width, descriptor.height), (300, 200));
        assert_eq!(count_tiles(&container), 9);
        assert!(container.join(DESCRIPTOR_FILE).is_file());
        assert!(container.join("0/0/0.jpg").is_file());
        assert!(container.join("2/1/2.jpg").is_file());
        assert!(!staging_path(&container).exists());
    }

    #[test]
    fn test_edge_tiles_are_smaller() {
        let temp = TempDir::new().unwrap();
        let source = write_png(temp.path(), "src.png", 300, 200);
        let container = temp.path().join("src.png.pyramid");

        let builder = TilePyramidBuilder::new(TilingConfig::default().with_tile_size(128));
        builder.build(&source, &container).unwrap();

        let edge = image::open(container.join("2/1/2.jpg")).unwrap();
        assert_eq!((edge.width(), edge.height()), (300 - 256, 200 - 128));
        let level0 = image::open(container.join("0/0/0.jpg")).unwrap();
        assert_eq!((level0.width(), level0.height()), (75, 50));
    }

    #[test]
    fn test_rebuild_replaces_existing_pyramid() {
        let temp = TempDir::new().unwrap();
        let big = write_png(temp.path(), "big.png", 300, 200);
        let small = write_png(temp.path(), "small.png", 100, 100);
        let container = temp.path().join("x.pyramid");

        let builder = TilePyramidBuilder::new(TilingConfig::default().with_tile_size(128));
        builder.build(&big, &container).unwrap();
        let descriptor = builder.build(&small, &container).unwrap();

        assert_eq!(descriptor.zoom_level, 0);
        assert_eq!(count_tiles(&container), 1);
        assert!(!retired_path(&container).exists());
    }

    #[test]
    fn test_rebuild_clears_leftover_retired_pyramid() {
        let temp = TempDir::new().unwrap();
        let source = write_png(temp.path(), "s.png", 64, 64);
        let container = temp.path().join("s.png.pyramid");
        let builder = TilePyramidBuilder::default();
        builder.build(&source, &container).unwrap();

        let retired = retired_path(&container);
        fs::create_dir_all(retired.join("7")).unwrap();
        fs::write(retired.join("7/junk.jpg"), b"old").unwrap();

        builder.build(&source, &container).unwrap();
        assert!(!retired.exists());
        assert_eq!(count_tiles(&container), 1);
    }

    #[test]
    fn test_undecodable_source_is_unsupported_format() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("garbage.xyz");
        fs::write(&source, b"definitely not an image").unwrap();
        let container = temp.path().join("garbage.xyz.pyramid");

        let err = TilePyramidBuilder::default()
            .build(&source, &container)
            .unwrap_err();

        assert!(matches!(err, TileError::UnsupportedFormat { .. }));
        assert!(!container.exists());
        assert!(!staging_path(&container).exists());
    }

    #[test]
    fn test_missing_source_is_io_failure() {
        let temp = TempDir::new().unwrap();
        let err = TilePyramidBuilder::default()
            .build(&temp.path().join("missing.png"), &temp.path().join("m.pyramid"))
            .unwrap_err();
        assert!(matches!(err, TileError::Io { .. }));
    }

    #[test]
    fn test_failed_build_keeps_previous_pyramid() {
        let temp = TempDir::new().unwrap();
        let good = write_png(temp.path(), "good.png", 64, 64);
        let bad = temp.path().join("bad.png");
        fs::write(&bad, b"xx").unwrap();
        let container = temp.path().join("k.pyramid");

        let builder = TilePyramidBuilder::default();
        builder.build(&good, &container).unwrap();
        assert!(builder.build(&bad, &container).is_err());

        let kept = TilePyramidDescriptor::read(&container.join(DESCRIPTOR_FILE))
            .unwrap()
            .unwrap();
        assert_eq!(kept.width, 64);
    }

    #[test]
    fn test_stale_staging_is_replaced() {
        let temp = TempDir::new().unwrap();
        let source = write_png(temp.path(), "s.png", 64, 64);
        let container = temp.path().join("s.pyramid");
        let staging = staging_path(&container);
        fs::create_dir_all(staging.join("9/9")).unwrap();
        fs::write(staging.join("9/9/9.jpg"), b"stale").unwrap();

        TilePyramidBuilder::default().build(&source, &container).unwrap();

        assert!(!container.join("9").exists());
        assert_eq!(count_tiles(&container), 1);
    }

    #[test]
    fn test_locate_existing_reads_descriptor_only() {
        let temp = TempDir::new().unwrap();
        let tiles = temp.path().join("tiles");
        let layout = TileFileLayout::new(&tiles);
        let source = write_png(temp.path(), "p.png", 64, 64);
        let container = layout.container_path_for("deriv1", "img/p.png").unwrap();
        fs::create_dir_all(container.parent().unwrap()).unwrap();

        assert!(locate_existing("deriv1", "img/p.png", &tiles).unwrap().is_none());

        let built = TilePyramidBuilder::default().build(&source, &container).unwrap();
        let found = locate_existing("deriv1", "img/p.png", &tiles).unwrap().unwrap();
        assert_eq!(found, built);
    }

    #[test]
    fn test_config_clamps_values() {
        let config = TilingConfig::default()
            .with_tile_size(0)
            .with_jpeg_quality(0);
        assert_eq!(config.tile_size, 1);
        assert_eq!(config.jpeg_quality, 1);
    }
}
