//! Integration tests for loading configuration from disk

use std::fs;
use std::time::Duration;

use tempfile::TempDir;

use switchboard::config::{Config, DEFAULT_SERVER_URL};

#[test]
fn test_missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(&dir.path().join("config.toml"));

    assert_eq!(config, Config::default());
    assert_eq!(config.server_url, DEFAULT_SERVER_URL);
    assert_eq!(config.websocket_url(), "ws://localhost:3000/ws");
}

#[test]
fn test_file_overrides_connection_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[server]
url = "https://relay.example.org"
max_frame_bytes = 32768

[connection]
reconnect_delay_ms = 1000
max_consecutive_failures = 5

[agents]
interrupt_grace_secs = 2
"#,
    )
    .unwrap();

    let config = Config::load_from(&path);
    assert_eq!(config.websocket_url(), "wss://relay.example.org/ws");
    assert_eq!(config.max_frame_bytes, 32768);

    let settings = config.session_settings();
    assert_eq!(settings.reconnect.delay, Duration::from_secs(1));
    assert_eq!(settings.reconnect.max_consecutive_failures, 5);
    assert_eq!(settings.interrupt_grace, Duration::from_secs(2));
    assert_eq!(config.endpoint().url, "wss://relay.example.org/ws");
}

#[test]
fn test_invalid_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[server\nurl = ").unwrap();

    assert_eq!(Config::load_from(&path), Config::default());
}
