//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [tiles] section
    if let Some(section) = ini.section(Some("tiles")) {
        if let Some(v) = non_empty(section.get("directory")) {
            config.tiles.directory = expand_tilde(v);
        }
        if let Some(v) = section.get("tile_size") {
            let size: u32 = parse_number("tiles", "tile_size", v, "must be a positive integer")?;
            if size == 0 {
                return Err(invalid("tiles", "tile_size", v, "must be a positive integer"));
            }
            config.tiles.tile_size = size;
        }
        if let Some(v) = section.get("jpeg_quality") {
            let reason = "must be an integer from 1 to 100";
            let quality: u8 = parse_number("tiles", "jpeg_quality", v, reason)?;
            if !(1..=100).contains(&quality) {
                return Err(invalid("tiles", "jpeg_quality", v, reason));
            }
            config.tiles.jpeg_quality = quality;
        }
    }

    // [source] section
    if let Some(section) = ini.section(Some("source")) {
        if let Some(v) = non_empty(section.get("directory")) {
            config.source.directory = expand_tilde(v);
        }
    }

    // [queue] section
    if let Some(section) = ini.section(Some("queue")) {
        if let Some(v) = section.get("state_file") {
            // An explicit empty value selects an in-memory queue
            config.queue.state_file = non_empty(Some(v)).map(expand_tilde);
        }
        if let Some(v) = section.get("max_retries") {
            config.queue.max_retries =
                parse_number("queue", "max_retries", v, "must be a non-negative integer")?;
        }
    }

    // [workers] section
    if let Some(section) = ini.section(Some("workers")) {
        if let Some(v) = section.get("threads") {
            let threads: usize =
                parse_number("workers", "threads", v, "must be a positive integer")?;
            if threads == 0 {
                return Err(invalid("workers", "threads", v, "must be a positive integer"));
            }
            config.workers.threads = threads;
        }
        if let Some(v) = section.get("poll_interval_ms") {
            config.workers.poll_interval_ms = positive_millis("poll_interval_ms", v)?;
        }
        if let Some(v) = section.get("shutdown_poll_ms") {
            config.workers.shutdown_poll_ms = positive_millis("shutdown_poll_ms", v)?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section.get("directory")) {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section.get("file")) {
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

/// A nonzero `[workers]` interval in milliseconds.
fn positive_millis(key: &str, value: &str) -> Result<u64, ConfigFileError> {
    const REASON: &str = "must be a positive integer (milliseconds)";
    let millis: u64 = parse_number("workers", key, value, REASON)?;
    if millis == 0 {
        return Err(invalid("workers", key, value, REASON));
    }
    Ok(millis)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_empty_ini_is_default() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_parses_every_section() {
        let config = parse(
            r#"
[tiles]
directory = /srv/tiles
tile_size = 256
jpeg_quality = 70

[source]
directory = /srv/store

[queue]
state_file = /var/lib/tileforge/queue.json
max_retries = 3

[workers]
threads = 4
poll_interval_ms = 250
shutdown_poll_ms = 500

[logging]
directory = /var/log/tileforge
file = host.log
"#,
        )
        .unwrap();

        assert_eq!(config.tiles.directory, PathBuf::from("/srv/tiles"));
        assert_eq!(config.tiles.tile_size, 256);
        assert_eq!(config.tiles.jpeg_quality, 70);
        assert_eq!(config.source.directory, PathBuf::from("/srv/store"));
        assert_eq!(
            config.queue.state_file,
            Some(PathBuf::from("/var/lib/tileforge/queue.json"))
        );
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.workers.threads, 4);
        assert_eq!(config.workers.poll_interval_ms, 250);
        assert_eq!(config.workers.shutdown_poll_ms, 500);
        assert_eq!(config.logging.directory, PathBuf::from("/var/log/tileforge"));
        assert_eq!(config.logging.file, "host.log");
    }

    #[test]
    fn test_empty_state_file_means_in_memory() {
        let config = parse("[queue]\nstate_file =\n").unwrap();
        assert!(config.queue.state_file.is_none());
    }

    #[test]
    fn test_invalid_tile_size() {
        let err = parse("[tiles]\ntile_size = big\n").unwrap_err();
        match err {
            ConfigFileError::InvalidValue { section, key, .. } => {
                assert_eq!(section, "tiles");
                assert_eq!(key, "tile_size");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(parse("[tiles]\ntile_size = 0\n").is_err());
    }

    #[test]
    fn test_jpeg_quality_range() {
        assert!(parse("[tiles]\njpeg_quality = 0\n").is_err());
        assert!(parse("[tiles]\njpeg_quality = 101\n").is_err());
        assert_eq!(
            parse("[tiles]\njpeg_quality = 100\n").unwrap().tiles.jpeg_quality,
            100
        );
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(parse("[workers]\nthreads = 0\n").is_err());
    }

    #[test]
    fn test_zero_poll_intervals_rejected() {
        assert!(matches!(
            parse("[workers]\nshutdown_poll_ms = 0\n"),
            Err(ConfigFileError::InvalidValue { .. })
        ));
        assert!(parse("[workers]\npoll_interval_ms = 0\n").is_err());
        assert_eq!(
            parse("[workers]\nshutdown_poll_ms = 1\n")
                .unwrap()
                .workers
                .shutdown_poll_ms,
            1
        );
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/tiles");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("tiles"));
        }
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
    }
}
