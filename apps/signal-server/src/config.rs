//! Signaling server configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/quickshare/signal.toml`
//! - Windows: `%APPDATA%/quickshare/signal.toml`

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use quickshare_protocol::constants::WS_MAX_MESSAGE_SIZE;
use quickshare_signaling::ServerConfig;

/// Signaling server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Interface to bind.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// TCP port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between room statistics log lines.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Largest accepted signaling frame in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3001
}

fn default_stats_interval() -> u64 {
    300
}

fn default_max_message_size() -> usize {
    WS_MAX_MESSAGE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            stats_interval_secs: default_stats_interval(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Config {
    /// Loads `path`, or the platform config file when `path` is `None`.
    ///
    /// A missing platform file yields the defaults; a missing explicit
    /// path is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let path = config_path()?;
                if path.exists() {
                    Self::read(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration read");
        Ok(config)
    }

    /// Writes the configuration as TOML to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies the value of the `PORT` environment variable, if set.
    pub fn apply_port_override(&mut self, port: Option<&str>) -> anyhow::Result<()> {
        if let Some(port) = port.map(str::trim).filter(|p| !p.is_empty()) {
            self.port = port
                .parse()
                .with_context(|| format!("invalid PORT value {port:?}"))?;
        }
        Ok(())
    }

    pub fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind_address {:?}", self.bind_address))?;
        Ok(ServerConfig {
            bind_addr: SocketAddr::new(ip, self.port),
            max_message_size: self.max_message_size,
            stats_interval: Duration::from_secs(self.stats_interval_secs.max(1)),
        })
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("quickshare")
            .join("signal.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("quickshare").join("signal.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/quickshare/signal.toml"))
    }
}
