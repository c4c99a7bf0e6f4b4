use harrow_config::{ConfigGuardRailError, ConfigLoadError, ConfigLoader};
use std::{fs, time::Duration};
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("harrow.toml");
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn file_values_override_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
dev_mode = true

[server]
port = 9443

[pipeline]
max_concurrent_scans = 2
enqueue_wait = "5s"
discovery_cap = 50

[tools]
nuclei_path = "/opt/nuclei"
vuln_timeout = "20m"

[websocket]
ping_period = "20s"
pong_wait = "30s"
"#,
    );

    let load = ConfigLoader::new()
        .ignore_env()
        .with_config_path(&path)
        .load()
        .unwrap();
    let config = load.config;

    assert!(config.dev_mode);
    assert_eq!(config.server.port, 9443);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.pipeline.max_concurrent_scans, 2);
    assert_eq!(config.pipeline.enqueue_wait, Duration::from_secs(5));
    assert_eq!(config.pipeline.discovery_cap, 50);
    assert_eq!(config.tools.nuclei_path, "/opt/nuclei");
    assert_eq!(config.tools.katana_path, "katana");
    assert_eq!(config.tools.vuln_timeout, Duration::from_secs(20 * 60));
    assert_eq!(config.websocket.ping_period, Duration::from_secs(20));
    assert_eq!(config.websocket.pong_wait, Duration::from_secs(30));
    assert_eq!(config.metadata.config_path.as_deref(), Some(path.as_path()));
    assert!(!config.metadata.env_file_loaded);
}

#[test]
fn missing_explicit_path_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = ConfigLoader::new()
        .ignore_env()
        .with_config_path(dir.path().join("absent.toml"))
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn malformed_duration_names_the_field() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[pipeline]\nobserver_grace = \"soon\"\n");

    let err = ConfigLoader::new()
        .ignore_env()
        .with_config_path(path)
        .load()
        .unwrap_err();
    match err {
        ConfigLoadError::InvalidDuration { field, value, .. } => {
            assert_eq!(field, "pipeline.observer_grace");
            assert_eq!(value, "soon");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unparseable_toml_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[server\nport = 1");
    let err = ConfigLoader::new()
        .ignore_env()
        .with_config_path(path)
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn guard_rails_run_on_file_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[cors]\nallowed_origins = [\"*\"]\n");
    let err = ConfigLoader::new()
        .ignore_env()
        .with_config_path(path)
        .load()
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::DangerousCorsWildcard)
    ));
}
