//! Tests for loading [`RouterConfig`] from TOML files.
#![cfg(feature = "config-file")]

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use huginn::{HuginnError, Router, RouterConfig};

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn load_explicit_file() {
    let file = write_config(
        r#"
[store]
tier0_capacity = 64
default_ttl = 0.5

[similarity]
threshold = 0.8
"#,
    );
    let config = RouterConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.store.tier0_capacity, 64);
    assert_eq!(config.store.default_ttl, Duration::from_millis(500));
    assert_eq!(config.similarity.threshold, 0.8);
    // untouched sections keep their defaults
    assert_eq!(config.store.tier1_capacity, 10_000);
    assert_eq!(config.trends, RouterConfig::default().trends);

    let router = Router::new(config).unwrap();
    assert_eq!(router.config().store.tier0_capacity, 64);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let err = RouterConfig::load(Some(Path::new("/nonexistent/huginn.toml"))).unwrap_err();
    assert!(matches!(err, HuginnError::Configuration(_)));
}

#[test]
fn invalid_values_name_the_file() {
    let file = write_config("[store]\neviction_fraction = 1.5\n");
    let err = RouterConfig::from_file(file.path()).unwrap_err();
    let HuginnError::Configuration(msg) = err else {
        panic!("expected configuration error");
    };
    assert!(msg.contains(&format!("{:?}", file.path())), "{msg}");
}

#[test]
fn malformed_toml_is_an_error() {
    let file = write_config("[store\ntier0_capacity = ");
    assert!(matches!(
        RouterConfig::from_file(file.path()),
        Err(HuginnError::Configuration(_))
    ));
}

#[test]
fn rendered_config_loads_back() {
    let config = RouterConfig::default();
    let file = write_config(&config.to_toml().unwrap());
    assert_eq!(RouterConfig::from_file(file.path()).unwrap(), config);
}
