//! Pyramid descriptor (`imageinfo.json`).
//!
//! The descriptor is the only file a viewer needs to read before
//! requesting tiles. It is always the last file written during a build.

use super::TileError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Tile image format written by the builder.
pub const TILE_FORMAT: &str = "jpg";

/// Metrics describing a finished pyramid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilePyramidDescriptor {
    /// Width of the source image in pixels
    pub width: u32,
    /// Height of the source image in pixels
    pub height: u32,
    /// Highest zoom level present
    pub zoom_level: u32,
    /// Total tiles across every level
    pub tile_count: u64,
    /// Edge length of a full tile
    pub tile_size: u32,
    /// Tile file extension
    pub format: String,
    /// When the pyramid was generated
    pub created_at: DateTime<Utc>,
}

impl TilePyramidDescriptor {
    /// Read a descriptor from disk.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>, TileError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TileError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| TileError::Descriptor {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Write the descriptor atomically: temp file, fsync, rename.
    pub fn write(&self, path: &Path) -> Result<(), TileError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| TileError::Descriptor {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let temp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp).map_err(|e| TileError::io(&temp, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| TileError::io(&temp, e))?;
        drop(file);

        fs::rename(&temp, path).map_err(|e| TileError::io(path, e))
    }
}
