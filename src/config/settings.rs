use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::connection::{Endpoint, ReconnectPolicy};
use crate::core::{ProviderCredentials, SessionSettings};
use crate::protocol::DEFAULT_MAX_FRAME_BYTES;
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the backend (REST); the socket URL is derived from it
    pub server_url: String,
    /// Largest outbound frame, in bytes
    pub max_frame_bytes: usize,
    pub reconnect_delay: Duration,
    pub max_consecutive_failures: u32,
    pub connect_timeout: Duration,
    /// Window before a permission request expires locally
    pub permission_timeout: Duration,
    /// Wait after an interrupt before offering force stop
    pub interrupt_grace: Duration,
    /// Bring-your-own-key credentials
    pub provider: Option<ProviderCredentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            reconnect_delay: Duration::from_millis(3000),
            max_consecutive_failures: 3,
            connect_timeout: Duration::from_millis(10_000),
            permission_timeout: Duration::from_secs(300),
            interrupt_grace: Duration::from_secs(5),
            provider: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlServerConfig {
    pub url: Option<String>,
    pub max_frame_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConnectionConfig {
    pub reconnect_delay_ms: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlPermissionsConfig {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlAgentsConfig {
    pub interrupt_grace_secs: Option<u64>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub server: Option<TomlServerConfig>,
    pub connection: Option<TomlConnectionConfig>,
    pub permissions: Option<TomlPermissionsConfig>,
    pub agents: Option<TomlAgentsConfig>,
    pub provider: Option<ProviderCredentials>,
}

impl Config {
    /// Load configuration from the data directory, merging with defaults.
    /// An example file is written on first run.
    pub fn load() -> Self {
        let config_file = config_path();

        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        Self::load_from(&config_file)
    }

    /// Load from an explicit path. Unreadable or invalid files fall back to
    /// the defaults.
    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No config file, using defaults");
                return Config::default();
            }
        };

        match toml::from_str::<TomlConfig>(&contents) {
            Ok(toml_config) => Config::default().merge(toml_config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                Config::default()
            }
        }
    }

    fn merge(mut self, toml_config: TomlConfig) -> Self {
        if let Some(server) = toml_config.server {
            if let Some(url) = server.url {
                self.server_url = url;
            }
            if let Some(max) = server.max_frame_bytes {
                self.max_frame_bytes = max;
            }
        }

        if let Some(connection) = toml_config.connection {
            if let Some(ms) = connection.reconnect_delay_ms {
                self.reconnect_delay = Duration::from_millis(ms);
            }
            if let Some(max) = connection.max_consecutive_failures {
                self.max_consecutive_failures = max.max(1);
            }
            if let Some(ms) = connection.connect_timeout_ms {
                self.connect_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(secs) = toml_config.permissions.and_then(|p| p.timeout_secs) {
            self.permission_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = toml_config.agents.and_then(|a| a.interrupt_grace_secs) {
            self.interrupt_grace = Duration::from_secs(secs);
        }

        if toml_config.provider.is_some() {
            self.provider = toml_config.provider;
        }

        self
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// WebSocket URL derived from the server URL
    pub fn websocket_url(&self) -> String {
        let base = self
            .server_url
            .trim_end_matches('/')
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/ws", base)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.websocket_url()).with_connect_timeout(self.connect_timeout)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            reconnect: ReconnectPolicy {
                delay: self.reconnect_delay,
                max_consecutive_failures: self.max_consecutive_failures,
            },
            permission_timeout: self.permission_timeout,
            interrupt_grace: self.interrupt_grace,
            max_frame_bytes: self.max_frame_bytes,
            credentials: self.provider.clone(),
        }
    }
}
