//! tileforge - Tile pyramid generation for large source images
//!
//! Source images (scans, photographs, maps) are cut into multi-resolution
//! JPEG tile pyramids so a viewer can zoom without loading the original.
//! Tiling requests flow through a shared job queue and are processed by a
//! local worker pool inside the host process, by remote worker processes,
//! or both.
//!
//! # High-Level API
//!
//! The [`host`] module wires every component from a [`config::ConfigFile`]:
//!
//! ```no_run
//! use tileforge::config::ConfigFile;
//! use tileforge::host::TilingHost;
//! use tileforge::shutdown::ShutdownSignal;
//!
//! let host = TilingHost::from_config(&ConfigFile::load()?)?;
//! let signal = ShutdownSignal::new();
//! host.lifecycle().run_until(&signal)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod events;
pub mod host;
pub mod layout;
pub mod lifecycle;
pub mod logging;
pub mod pool;
pub mod pyramid;
pub mod queue;
pub mod remote;
pub mod shutdown;
pub mod worker;

/// Version of the tileforge library and worker binary.
///
/// Synchronized across the workspace via `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
