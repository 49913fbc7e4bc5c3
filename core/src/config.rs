//! Network configuration (`<config dir>/racelink.toml`)
//!
//! Handles loading, saving, and providing defaults for discovery and session
//! settings. Every field has a serde default so a partial file (or none at
//! all) yields a working configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use racelink_shared::{DEFAULT_DISCOVERY_PORT, DEFAULT_SERVICE_ID};
use serde::{Deserialize, Serialize};

/// File name used inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "racelink.toml";

/// Errors from reading or writing a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Discovery and session settings shared by both roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Service identifier both roles must share (default: "race-v1")
    #[serde(default = "default_service_id")]
    pub service_id: String,
    /// Local display name shown to the other side (default: "Racer")
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Interface to bind (default: 0.0.0.0)
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,
    /// Port a Display listens on (default: 47820, 0 = any)
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Where a Controller sends probes (default: broadcast on `discovery_port`)
    #[serde(default)]
    pub discovery_targets: Vec<SocketAddr>,
    /// How long an invitation may stay unanswered (default: 5000)
    #[serde(default = "default_invite_timeout_ms")]
    pub invite_timeout_ms: u64,
    /// Probe and invitation retransmit period (default: 500)
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// A discovered Display not re-announced for this long is lost (default: 3000)
    #[serde(default = "default_discovery_expiry_ms")]
    pub discovery_expiry_ms: u64,
    /// Keepalive ping period for connected peers (default: 250)
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Silence after which a connected peer is considered lost (default: 3000)
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
    /// Outbound queue depth; sends beyond it fail fast (default: 64)
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    /// Controllers a Display accepts before it stops advertising (default: 1)
    #[serde(default = "default_max_controllers")]
    pub max_controllers: usize,
    /// Controller invites the first Display it finds (default: false)
    #[serde(default)]
    pub auto_invite: bool,
    /// Start a new discovery cycle once the last peer is lost (default: true)
    #[serde(default = "default_true")]
    pub restart_on_peer_loss: bool,
}

fn default_service_id() -> String {
    DEFAULT_SERVICE_ID.to_string()
}
fn default_display_name() -> String {
    "Racer".to_string()
}
fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_invite_timeout_ms() -> u64 {
    5000
}
fn default_probe_interval_ms() -> u64 {
    500
}
fn default_discovery_expiry_ms() -> u64 {
    3000
}
fn default_keepalive_interval_ms() -> u64 {
    250
}
fn default_peer_timeout_ms() -> u64 {
    3000
}
fn default_send_queue_capacity() -> usize {
    64
}
fn default_max_controllers() -> usize {
    1
}
fn default_true() -> bool {
    true
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            display_name: default_display_name(),
            bind_ip: default_bind_ip(),
            discovery_port: default_discovery_port(),
            discovery_targets: Vec::new(),
            invite_timeout_ms: default_invite_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            discovery_expiry_ms: default_discovery_expiry_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            peer_timeout_ms: default_peer_timeout_ms(),
            send_queue_capacity: default_send_queue_capacity(),
            max_controllers: default_max_controllers(),
            auto_invite: false,
            restart_on_peer_loss: default_true(),
        }
    }
}

impl NetConfig {
    pub fn invite_timeout(&self) -> Duration {
        Duration::from_millis(self.invite_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn discovery_expiry(&self) -> Duration {
        Duration::from_millis(self.discovery_expiry_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Probe destinations, falling back to the IPv4 broadcast address.
    pub fn probe_targets(&self) -> Vec<SocketAddr> {
        if self.discovery_targets.is_empty() {
            vec![SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                self.discovery_port,
            )]
        } else {
            self.discovery_targets.clone()
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Write this configuration, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\racelink\config`
/// On macOS: `~/Library/Application Support/io.racelink.racelink`
/// On Linux: `~/.config/racelink`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.racelink", "", "racelink")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads `racelink.toml` from the platform config directory.
///
/// Returns defaults if the file doesn't exist or cannot be parsed.
pub fn load() -> NetConfig {
    let Some(path) = config_dir().map(|dir| dir.join(CONFIG_FILE_NAME)) else {
        return NetConfig::default();
    };
    match NetConfig::load_from(&path) {
        Ok(config) => config,
        Err(ConfigError::Io { .. }) => NetConfig::default(),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Ignoring invalid config");
            NetConfig::default()
        }
    }
}
