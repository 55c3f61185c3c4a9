//! Per-job tiling logic shared by local and remote workers.

use crate::layout::{self, TileFileLayout};
use crate::pyramid::{PyramidBuilder, TileError, TilePyramidDescriptor};
use crate::queue::JobKey;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a job produced its pyramid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// A new pyramid was built
    Built(TilePyramidDescriptor),
    /// An existing pyramid was reused
    Skipped(TilePyramidDescriptor),
}

impl JobResult {
    /// Descriptor of the pyramid now on disk.
    pub fn descriptor(&self) -> &TilePyramidDescriptor {
        match self {
            JobResult::Built(d) | JobResult::Skipped(d) => d,
        }
    }
}

/// Resolves a job key to source and container paths and runs the builder.
pub struct TileJobRunner {
    builder: Arc<dyn PyramidBuilder>,
    layout: TileFileLayout,
    file_store: PathBuf,
    skip_existing: bool,
}

impl TileJobRunner {
    /// Create a runner.
    ///
    /// # Arguments
    ///
    /// * `builder` - Pyramid builder shared by all workers
    /// * `layout` - Tile container layout
    /// * `file_store` - Root directory of source files
    pub fn new(
        builder: Arc<dyn PyramidBuilder>,
        layout: TileFileLayout,
        file_store: impl Into<PathBuf>,
    ) -> Self {
        Self {
            builder,
            layout,
            file_store: file_store.into(),
            skip_existing: false,
        }
    }

    /// Reuse existing pyramids instead of rebuilding them.
    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    /// The tile layout in use.
    pub fn layout(&self) -> &TileFileLayout {
        &self.layout
    }

    /// The source file root.
    pub fn file_store(&self) -> &Path {
        &self.file_store
    }

    /// Produce the pyramid for one source file.
    pub fn run(&self, owner_id: &str, relative_path: &str) -> Result<JobResult, TileError> {
        let source = layout::source_path(&self.file_store, owner_id, relative_path)?;
        let container = self.layout.container_path_for(owner_id, relative_path)?;

        if self.skip_existing {
            if let Some(existing) = self.existing(owner_id, relative_path) {
                info!(owner_id, relative_path, "Pyramid exists; skipping build");
                return Ok(JobResult::Skipped(existing));
            }
        }

        if let Some(parent) = container.parent() {
            fs::create_dir_all(parent).map_err(|e| TileError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let descriptor = self.builder.build(&source, &container)?;
        info!(
            owner_id,
            relative_path,
            zoom_level = descriptor.zoom_level,
            tile_count = descriptor.tile_count,
            "Pyramid built"
        );
        Ok(JobResult::Built(descriptor))
    }

    /// Existing valid descriptor, treating unreadable ones as absent.
    fn existing(&self, owner_id: &str, relative_path: &str) -> Option<TilePyramidDescriptor> {
        match crate::pyramid::locate_existing(owner_id, relative_path, self.layout.root()) {
            Ok(found) => found,
            Err(e) => {
                warn!(owner_id, relative_path, error = %e, "Ignoring unreadable pyramid");
                None
            }
        }
    }

    /// Delete the output of a job whose source was removed mid-build.
    pub fn discard(&self, key: &JobKey) {
        match self.layout.delete(&key.owner_id, &key.relative_path) {
            Ok(removed) => debug!(%key, removed, "Discarded output of cancelled job"),
            Err(e) => warn!(%key, error = %e, "Failed to discard output of cancelled job"),
        }
    }
}
