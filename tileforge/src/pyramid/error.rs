//! Error types for pyramid generation.

use crate::layout::LayoutError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or reading a tile pyramid.
///
/// Every variant is a job-level failure: the worker reports it to the
/// queue and moves on to its next job.
#[derive(Debug, Error)]
pub enum TileError {
    /// The source image could not be decoded
    #[error("Unsupported image format '{}': {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// Reading the source or writing tile output failed
    #[error("I/O failure on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Encoding a tile failed
    #[error("Failed to encode tile '{}': {reason}", path.display())]
    Encode { path: PathBuf, reason: String },

    /// The descriptor is missing or unreadable
    #[error("Invalid pyramid descriptor '{}': {reason}", path.display())]
    Descriptor { path: PathBuf, reason: String },

    /// The job key cannot be mapped to a path
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl TileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TileError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short category name used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TileError::UnsupportedFormat { .. } => "unsupported_format",
            TileError::Io { .. } => "io_failure",
            TileError::Encode { .. } => "encode_failure",
            TileError::Descriptor { .. } => "descriptor",
            TileError::Layout(_) => "layout",
        }
    }
}
