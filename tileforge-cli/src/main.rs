//! tileforge-worker - Remote tiling worker
//!
//! Claims tiling jobs from a coordinator, builds the pyramids against a
//! shared file store and reports the results. Exits once the queue is
//! drained or an interrupt has been handled.

mod error;
mod runner;

use clap::Parser;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug, Clone)]
#[command(name = "tileforge-worker", version)]
#[command(about = "Drain a tileforge job queue over RPC", long_about = None)]
pub struct Args {
    /// Coordinator RPC endpoint, e.g. http://host:8080/tiles
    pub endpoint: String,

    /// Root of the source file store
    #[arg(long, env = "FILE_STORE_DIR", default_value = "filestore")]
    pub file_store_dir: PathBuf,

    /// Root of the output tile pyramids, created if missing
    #[arg(long, env = "TILE_DIR", default_value = "iview2/tiles")]
    pub tile_dir: PathBuf,

    /// Worker thread count
    #[arg(long, env = "TILE_THREADS", default_value_t = 1)]
    pub tile_threads: usize,

    /// Report existing pyramids instead of rebuilding them
    #[arg(long, env = "SKIP_EXISTING")]
    pub skip_existing: bool,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Usage problems print help and exit cleanly
            let _ = e.print();
            process::exit(0);
        }
    };

    let runner = runner::WorkerRunner::new(args).unwrap_or_else(|e| e.exit());
    if let Err(e) = runner.run() {
        e.exit();
    }
}
