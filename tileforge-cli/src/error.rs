//! CLI error handling with user-friendly messages.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process;
use tileforge::remote::TransportError;

/// Fatal startup errors of the worker process.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// The endpoint is not an HTTP(S) URL
    Endpoint(String),
    /// The file store cannot be read
    FileStore { path: PathBuf, error: io::Error },
    /// The tile directory cannot be created
    TileDir { path: PathBuf, error: io::Error },
    /// The HTTP client could not be built
    Transport(TransportError),
    /// The interrupt handler could not be installed
    Signal(String),
    /// Every worker thread ended with an error
    RunFailed { crashed: usize },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::FileStore { .. } => {
                eprintln!();
                eprintln!(
                    "Set --file-store-dir (or FILE_STORE_DIR) to the mounted source file store."
                );
            }
            CliError::RunFailed { .. } => {
                eprintln!();
                eprintln!("Check that the coordinator endpoint is reachable.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Endpoint(url) => {
                write!(f, "Invalid endpoint '{}': expected an http:// or https:// URL", url)
            }
            CliError::FileStore { path, error } => {
                write!(f, "File store '{}' is not accessible: {}", path.display(), error)
            }
            CliError::TileDir { path, error } => {
                write!(f, "Cannot create tile directory '{}': {}", path.display(), error)
            }
            CliError::Transport(e) => write!(f, "Failed to create RPC client: {}", e),
            CliError::Signal(msg) => write!(f, "Failed to set signal handler: {}", msg),
            CliError::RunFailed { crashed } => {
                write!(f, "All {} worker threads failed; see the log for details", crashed)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::FileStore { error, .. } => Some(error),
            CliError::TileDir { error, .. } => Some(error),
            CliError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        CliError::Transport(e)
    }
}
