use std::io::Write;

use geomap_client::error::ConfigError;
use geomap_client::MapConfig;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn partial_file_keeps_defaults() {
    let file = write_config(
        r#"
workers = 2
tile_url = "http://localhost:8080/{z}/{x}/{y}.png"

[cache]
max_tiles = 64
"#,
    );

    let config = MapConfig::load_from_file(file.path()).unwrap();
    config.validate().unwrap();
    let defaults = MapConfig::default();
    assert_eq!(config.workers, 2);
    assert_eq!(config.cache.max_tiles, 64);
    assert_eq!(config.cache.max_memory_mb, defaults.cache.max_memory_mb);
    assert_eq!(config.zoom, defaults.zoom);
    assert_eq!(config.history_minutes, defaults.history_minutes);
}

#[test]
fn malformed_file_is_a_parse_error() {
    let file = write_config("workers = \"four\"\n");
    let err = MapConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains(&file.path().display().to_string()));
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = MapConfig::load_from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn invalid_values_fail_load() {
    let file = write_config("[zoom]\nmin = 12\nmax = 4\n");
    assert!(matches!(
        MapConfig::load(Some(file.path())),
        Err(ConfigError::Invalid { .. })
    ));
}
