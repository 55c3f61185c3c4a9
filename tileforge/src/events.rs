//! Inbound source-file events.
//!
//! The surrounding application calls these when a source image is created,
//! replaced or deleted. How those events are raised (object store hooks,
//! filesystem watchers, admin tools) is not this crate's concern.

use crate::layout::{LayoutError, TileFileLayout};
use crate::queue::{JobQueue, QueueError, TilingJob};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while handling a source event.
#[derive(Debug, Error)]
pub enum EventError {
    /// The queue rejected the change
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Removing tiles failed
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Narrow interface through which the host reports source-file changes.
pub trait SourceEvents: Send + Sync {
    /// A source file was created. Returns the job, or `None` if the file is
    /// not a tileable image.
    fn on_source_created(
        &self,
        owner_id: &str,
        relative_path: &str,
    ) -> Result<Option<TilingJob>, EventError>;

    /// A source file's content changed.
    fn on_source_updated(
        &self,
        owner_id: &str,
        relative_path: &str,
    ) -> Result<Option<TilingJob>, EventError>;

    /// A source file was deleted.
    fn on_source_deleted(&self, owner_id: &str, relative_path: &str) -> Result<(), EventError>;

    /// An owning collection and all its files were deleted.
    fn on_owner_deleted(&self, owner_id: &str) -> Result<(), EventError>;
}

/// Whether a file name carries an image extension the decoder knows.
pub fn is_tileable(relative_path: &str) -> bool {
    image::ImageFormat::from_path(Path::new(relative_path)).is_ok()
}

/// [`SourceEvents`] backed by a job queue and tile layout.
pub struct TilingEvents {
    queue: Arc<JobQueue>,
    layout: TileFileLayout,
}

impl TilingEvents {
    /// Create an event handler.
    pub fn new(queue: Arc<JobQueue>, layout: TileFileLayout) -> Self {
        Self { queue, layout }
    }

    fn request(&self, owner_id: &str, relative_path: &str) -> Result<Option<TilingJob>, EventError> {
        if !is_tileable(relative_path) {
            debug!(owner_id, relative_path, "Not an image; no tiles needed");
            return Ok(None);
        }
        Ok(Some(self.queue.enqueue(owner_id, relative_path)?))
    }
}

impl SourceEvents for TilingEvents {
    fn on_source_created(
        &self,
        owner_id: &str,
        relative_path: &str,
    ) -> Result<Option<TilingJob>, EventError> {
        self.request(owner_id, relative_path)
    }

    // The builder swaps the new pyramid in atomically, so no delete first
    fn on_source_updated(
        &self,
        owner_id: &str,
        relative_path: &str,
    ) -> Result<Option<TilingJob>, EventError> {
        self.request(owner_id, relative_path)
    }

    fn on_source_deleted(&self, owner_id: &str, relative_path: &str) -> Result<(), EventError> {
        let had_job = self.queue.remove(owner_id, relative_path)?;
        let had_tiles = self.layout.delete(owner_id, relative_path)?;
        info!(owner_id, relative_path, had_job, had_tiles, "Source deleted");
        Ok(())
    }

    fn on_owner_deleted(&self, owner_id: &str) -> Result<(), EventError> {
        let jobs = self.queue.remove_owner(owner_id)?;
        let had_tiles = self.layout.delete_owner(owner_id)?;
        info!(owner_id, jobs, had_tiles, "Owner deleted");
        Ok(())
    }
}
