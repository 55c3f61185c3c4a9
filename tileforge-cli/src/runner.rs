//! Worker process setup and run.

use crate::error::CliError;
use crate::Args;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tileforge::layout::TileFileLayout;
use tileforge::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};
use tileforge::pyramid::{TilePyramidBuilder, TilingConfig};
use tileforge::remote::{ClientConfig, HttpRemoteQueue, RemoteWorkerClient, RunSummary};
use tileforge::shutdown::ShutdownSignal;
use tileforge::worker::TileJobRunner;
use tracing::info;

/// Owns the logging guard for the lifetime of the worker process.
pub struct WorkerRunner {
    _logging_guard: LoggingGuard,
    args: Args,
}

impl WorkerRunner {
    /// Initialize logging for a run with `args`.
    pub fn new(args: Args) -> Result<Self, CliError> {
        let logging_guard = init_logging(Path::new(default_log_dir()), default_log_file())
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        info!("tileforge-worker v{}", tileforge::VERSION);
        Ok(Self {
            _logging_guard: logging_guard,
            args,
        })
    }

    /// Drain the remote queue until it is empty or an interrupt arrives.
    pub fn run(&self) -> Result<RunSummary, CliError> {
        let args = &self.args;
        validate_endpoint(&args.endpoint)?;
        check_file_store(&args.file_store_dir)?;
        ensure_tile_dir(&args.tile_dir)?;

        let remote = HttpRemoteQueue::new(&args.endpoint)?;
        let runner = TileJobRunner::new(
            Arc::new(TilePyramidBuilder::new(TilingConfig::default())),
            TileFileLayout::new(&args.tile_dir),
            &args.file_store_dir,
        )
        .with_skip_existing(args.skip_existing);

        let signal = ShutdownSignal::new();
        {
            let signal = signal.clone();
            ctrlc::set_handler(move || signal.request())
                .map_err(|e| CliError::Signal(e.to_string()))?;
        }

        info!(
            endpoint = %args.endpoint,
            file_store = %args.file_store_dir.display(),
            tile_dir = %args.tile_dir.display(),
            threads = args.tile_threads,
            skip_existing = args.skip_existing,
            "Starting remote tiling"
        );

        let client = RemoteWorkerClient::new(Arc::new(remote), Arc::new(runner))
            .with_config(ClientConfig {
                threads: args.tile_threads,
                ..ClientConfig::default()
            })
            .with_shutdown(signal.clone());

        let summary = client.run();
        signal.run_hooks();
        check_summary(summary)
    }
}

/// A run where no thread ended normally is a failed run.
pub(crate) fn check_summary(summary: RunSummary) -> Result<RunSummary, CliError> {
    if summary.all_threads_failed() {
        return Err(CliError::RunFailed {
            crashed: summary.crashed_threads,
        });
    }
    Ok(summary)
}

pub(crate) fn validate_endpoint(endpoint: &str) -> Result<(), CliError> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(())
    } else {
        Err(CliError::Endpoint(endpoint.to_string()))
    }
}

pub(crate) fn check_file_store(path: &Path) -> Result<(), CliError> {
    fs::read_dir(path)
        .map(|_| ())
        .map_err(|error| CliError::FileStore {
            path: path.to_path_buf(),
            error,
        })
}

pub(crate) fn ensure_tile_dir(path: &Path) -> Result<(), CliError> {
    fs::create_dir_all(path).map_err(|error| CliError::TileDir {
        path: path.to_path_buf(),
        error,
    })
}
