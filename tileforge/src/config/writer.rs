//! INI serialization logic for converting `ConfigFile` → INI string.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let state_file = config
        .queue
        .state_file
        .as_deref()
        .map(path_to_string)
        .unwrap_or_default();

    format!(
        r#"[tiles]
; Root directory of all tile pyramids
directory = {}
; Edge length of a full tile in pixels
tile_size = {}
; JPEG quality of tile images (1-100)
jpeg_quality = {}

[source]
; Root directory of the source file store
directory = {}

[queue]
; Durable queue snapshot; leave empty for an in-memory queue
state_file = {}
; Failed attempts retried before a job is marked failed
max_retries = {}

[workers]
; Local worker threads
threads = {}
; Longest idle wait between claims (milliseconds)
poll_interval_ms = {}
; Drain polling interval during shutdown (milliseconds)
shutdown_poll_ms = {}

[logging]
directory = {}
file = {}
"#,
        path_to_string(&config.tiles.directory),
        config.tiles.tile_size,
        config.tiles.jpeg_quality,
        path_to_string(&config.source.directory),
        state_file,
        config.queue.max_retries,
        config.workers.threads,
        config.workers.poll_interval_ms,
        config.workers.shutdown_poll_ms,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
