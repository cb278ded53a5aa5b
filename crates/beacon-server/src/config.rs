//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (BEACON_*)
//! - TOML configuration file (`BEACON_CONFIG`, then the default paths)

use anyhow::{Context, Result};
use beacon_core::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Port used when none, or `0`, is configured.
pub const DEFAULT_PORT: u16 = 21100;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on. `0` means [`DEFAULT_PORT`].
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Record and upload locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum rooms per connection.
    #[serde(default = "default_max_rooms")]
    pub max_rooms_per_connection: usize,

    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum HTTP upload body size in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding media records.
    #[serde(default = "default_media_file")]
    pub media_file: PathBuf,

    /// JSON file holding trigger records.
    #[serde(default = "default_trigger_file")]
    pub trigger_file: PathBuf,

    /// Directory uploaded files are written to and served from.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    HubConfig::default().max_connections
}

fn default_max_rooms() -> usize {
    HubConfig::default().max_rooms_per_connection
}

fn default_max_message_size() -> usize {
    beacon_protocol::MAX_FRAME_SIZE
}

fn default_max_upload_size() -> usize {
    100 * 1024 * 1024 // 100 MiB
}

fn default_media_file() -> PathBuf {
    PathBuf::from("media/media.json")
}

fn default_trigger_file() -> PathBuf {
    PathBuf::from("triggers/triggers.json")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_rooms_per_connection: default_max_rooms(),
            max_message_size: default_max_message_size(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_file: default_media_file(),
            trigger_file: default_trigger_file(),
            uploads_dir: default_uploads_dir(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("BEACON_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        if config.port == 0 {
            config.port = DEFAULT_PORT;
        }
        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Hub limits derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.limits.max_connections,
            max_rooms_per_connection: self.limits.max_rooms_per_connection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.max_message_size, 1024 * 1024);
        assert_eq!(config.storage.uploads_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "127.0.0.1"
            port = 9000

            [limits]
            max_connections = 50000

            [storage]
            uploads_dir = "/srv/beacon/uploads"
        "#;

        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.max_rooms_per_connection, 100);
        assert_eq!(config.storage.uploads_dir, PathBuf::from("/srv/beacon/uploads"));
        assert_eq!(config.storage.media_file, PathBuf::from("media/media.json"));
        assert_eq!(config.bind_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_zero_port_means_default() {
        let config = Config::from_toml("port = 0").unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_bind_addr() {
        let config = Config::from_toml(r#"host = "not a host""#).unwrap();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_hub_config() {
        let config = Config::from_toml("[limits]\nmax_rooms_per_connection = 3").unwrap();
        assert_eq!(config.hub_config().max_rooms_per_connection, 3);
    }
}
