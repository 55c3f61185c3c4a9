//! Settings structs, one per `[section]` of the INI file.

use std::path::PathBuf;

/// Complete host configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Tile output settings
    pub tiles: TilesSettings,
    /// Source file store settings
    pub source: SourceSettings,
    /// Job queue settings
    pub queue: QueueSettings,
    /// Local worker pool settings
    pub workers: WorkersSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// `[tiles]`
#[derive(Debug, Clone, PartialEq)]
pub struct TilesSettings {
    /// Root of all tile pyramids
    pub directory: PathBuf,
    /// Edge length of a full tile in pixels
    pub tile_size: u32,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
}

/// `[source]`
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    /// Root of the source file store
    pub directory: PathBuf,
}

/// `[queue]`
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    /// Snapshot file; `None` keeps the queue in memory only
    pub state_file: Option<PathBuf>,
    /// Failed attempts retried before a job is marked Failed
    pub max_retries: u32,
}

/// `[workers]`
#[derive(Debug, Clone, PartialEq)]
pub struct WorkersSettings {
    /// Local pool concurrency
    pub threads: usize,
    /// Longest idle wait between claims
    pub poll_interval_ms: u64,
    /// Drain polling interval during host shutdown
    pub shutdown_poll_ms: u64,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Directory for log files
    pub directory: PathBuf,
    /// Log file name
    pub file: String,
}
