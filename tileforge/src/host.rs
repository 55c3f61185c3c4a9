//! Facade that wires the tiling components for a host process.
//!
//! # Example
//!
//! ```no_run
//! use tileforge::config::ConfigFile;
//! use tileforge::host::TilingHost;
//! use tileforge::events::SourceEvents;
//!
//! let config = ConfigFile::load()?;
//! let host = TilingHost::from_config(&config)?;
//! host.lifecycle().on_host_startup()?;
//! host.events().on_source_created("deriv1", "/img/page1.tif")?;
//! host.lifecycle().on_host_shutdown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::ConfigFile;
use crate::events::TilingEvents;
use crate::layout::TileFileLayout;
use crate::lifecycle::LifecycleController;
use crate::pool::{Backoff, LocalWorkerPool};
use crate::pyramid::{TilePyramidBuilder, TilingConfig};
use crate::queue::{JobQueue, QueueConfig, QueueError};
use crate::remote::RpcHandler;
use crate::worker::TileJobRunner;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors assembling a host.
#[derive(Debug, Error)]
pub enum HostError {
    /// The queue snapshot could not be opened
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The tile root could not be created
    #[error("Cannot create tile directory {path}: {source}")]
    TileDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// All tiling components of one host process, sharing one queue.
pub struct TilingHost {
    queue: Arc<JobQueue>,
    runner: Arc<TileJobRunner>,
    events: Arc<TilingEvents>,
    lifecycle: Arc<LifecycleController>,
    rpc: Arc<RpcHandler>,
}

impl TilingHost {
    /// Build every component from `config`.
    pub fn from_config(config: &ConfigFile) -> Result<Self, HostError> {
        let tile_dir = &config.tiles.directory;
        fs::create_dir_all(tile_dir).map_err(|source| HostError::TileDirectory {
            path: tile_dir.clone(),
            source,
        })?;

        let queue_config = QueueConfig {
            max_retries: config.queue.max_retries,
        };
        let queue = Arc::new(match &config.queue.state_file {
            Some(path) => JobQueue::open(path, queue_config)?,
            None => JobQueue::in_memory(queue_config),
        });

        let layout = TileFileLayout::new(tile_dir);
        let builder = TilePyramidBuilder::new(
            TilingConfig::default()
                .with_tile_size(config.tiles.tile_size)
                .with_jpeg_quality(config.tiles.jpeg_quality),
        );
        let runner = Arc::new(TileJobRunner::new(
            Arc::new(builder),
            layout.clone(),
            &config.source.directory,
        ));

        let default_backoff = Backoff::default();
        let backoff = Backoff {
            max: Duration::from_millis(config.workers.poll_interval_ms).max(default_backoff.min),
            ..default_backoff
        };
        let pool = LocalWorkerPool::new(Arc::clone(&queue), Arc::clone(&runner))
            .with_backoff(backoff);
        let lifecycle = LifecycleController::new(pool, config.workers.threads)
            .with_shutdown_poll(Duration::from_millis(config.workers.shutdown_poll_ms));

        info!(
            tile_dir = %tile_dir.display(),
            source_dir = %config.source.directory.display(),
            queued = queue.size(),
            "Tiling host ready"
        );

        Ok(Self {
            events: Arc::new(TilingEvents::new(Arc::clone(&queue), layout)),
            rpc: Arc::new(RpcHandler::new(Arc::clone(&queue))),
            lifecycle: Arc::new(lifecycle),
            runner,
            queue,
        })
    }

    /// The shared job queue.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// The per-job runner used by local workers.
    pub fn runner(&self) -> &Arc<TileJobRunner> {
        &self.runner
    }

    /// Inbound source-file events.
    pub fn events(&self) -> &Arc<TilingEvents> {
        &self.events
    }

    /// Startup/shutdown hooks for the local pool.
    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    /// Handler serving remote workers.
    pub fn rpc_handler(&self) -> &Arc<RpcHandler> {
        &self.rpc
    }
}
