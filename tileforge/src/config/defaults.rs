//! Default values for every configuration setting.

use super::file::config_directory;
use super::settings::*;
use std::path::PathBuf;

/// Default tile root, relative to the working directory.
pub const DEFAULT_TILE_DIR: &str = "iview2/tiles";

/// Default source file store, relative to the working directory.
pub const DEFAULT_FILE_STORE_DIR: &str = "filestore";

/// Default queue snapshot file name inside the config directory.
pub const DEFAULT_STATE_FILE: &str = "queue.json";

/// Default longest idle wait between claims.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default drain polling interval.
pub const DEFAULT_SHUTDOWN_POLL_MS: u64 = 1_000;

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "tileforge.log";

/// Get the number of available CPU cores.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default local pool concurrency: half the cores, at least one.
pub fn default_worker_threads() -> usize {
    (num_cpus() / 2).max(1)
}

impl Default for ConfigFile {
    fn default() -> Self {
        let config_dir = config_directory();
        Self {
            tiles: TilesSettings {
                directory: PathBuf::from(DEFAULT_TILE_DIR),
                tile_size: crate::pyramid::DEFAULT_TILE_SIZE,
                jpeg_quality: crate::pyramid::DEFAULT_JPEG_QUALITY,
            },
            source: SourceSettings {
                directory: PathBuf::from(DEFAULT_FILE_STORE_DIR),
            },
            queue: QueueSettings {
                state_file: Some(config_dir.join(DEFAULT_STATE_FILE)),
                max_retries: crate::queue::DEFAULT_MAX_RETRIES,
            },
            workers: WorkersSettings {
                threads: default_worker_threads(),
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
                shutdown_poll_ms: DEFAULT_SHUTDOWN_POLL_MS,
            },
            logging: LoggingSettings {
                directory: config_dir.join("logs"),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
