//! JSON configuration with per-field defaults.
//!
//! A partial file is merged over the defaults, so adding an option never
//! invalidates an existing `config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tick period in milliseconds.
    pub refresh_interval: u64,
    /// CPU percentage above which values are flagged in output.
    pub cpu_alert_threshold: f64,
    /// Temperature above which values are flagged in output.
    pub temp_alert_threshold: f64,
    /// Fixed target address; skips discovery when set.
    pub host: Option<String>,
    /// DNS name tried before scanning the subnet.
    pub host_name: String,
    /// First three octets of the subnet to scan, e.g. `192.168.1`.
    pub subnet: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub identity_file: Option<PathBuf>,
    /// Hard limit on one remote command, in milliseconds.
    pub command_timeout_ms: u64,
    /// Parallel probes during subnet discovery.
    pub discovery_workers: usize,
    /// Per-address probe timeout, in milliseconds.
    pub probe_timeout_ms: u64,
    /// Session history log.
    pub history_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval: 1000,
            cpu_alert_threshold: 90.0,
            temp_alert_threshold: 80.0,
            host: None,
            host_name: "recalbox".to_string(),
            subnet: "192.168.1".to_string(),
            ssh_port: 22,
            ssh_user: "root".to_string(),
            identity_file: None,
            command_timeout_ms: 2000,
            discovery_workers: 20,
            probe_timeout_ms: 2000,
            history_file: PathBuf::from("session_history.csv"),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is absent or
    /// unusable. Problems are logged, never returned.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(Some(config)) => {
                log::info!("configuration loaded from {}", path.display());
                config
            }
            Ok(None) => Self::default(),
            Err(e) => {
                log::error!("{e}; using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`; `Ok(None)` when the file does not exist.
    pub fn try_load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Write as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("configuration saved to {}", path.display());
        Ok(())
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_interval.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }
}
