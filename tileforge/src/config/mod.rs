//! Host configuration loaded from `~/.tileforge/config.ini`.
//!
//! # Example
//!
//! ```
//! use tileforge::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! assert_eq!(config.tiles.tile_size, 512);
//! assert_eq!(config.queue.max_retries, 1);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, LoggingSettings, QueueSettings, SourceSettings, TilesSettings, WorkersSettings,
};
