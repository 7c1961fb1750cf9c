//! Configuration loading and server URL resolution
//!
//! Resolution priority for every setting that can come from more than one
//! place:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is never an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "LABELCHECK_CONFIG";

/// Environment variable overriding the server URL
pub const SERVER_URL_ENV_VAR: &str = "LABELCHECK_SERVER_URL";

/// Longest accepted poll interval (one hour)
pub const MAX_POLL_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Longest accepted polling budget (one day)
pub const MAX_POLL_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Compiled fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub server_url: String,
    pub log_level: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
}

impl Default for CompiledDefaults {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            log_level: "info".to_string(),
            request_timeout_secs: 30,
            poll_interval_ms: 1000,
            poll_timeout_secs: 300,
        }
    }
}

/// `[logging]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    CompiledDefaults::default().log_level
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// `[polling]` table: single-item status polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    CompiledDefaults::default().poll_interval_ms
}

fn default_poll_timeout_secs() -> u64 {
    CompiledDefaults::default().poll_timeout_secs
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Both values must be non-zero (tokio intervals panic on zero) and
    /// small enough that deadline arithmetic cannot overflow
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 || self.interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(Error::Config(format!(
                "polling.interval_ms must be between 1 and {}",
                MAX_POLL_INTERVAL_MS
            )));
        }
        if self.timeout_secs == 0 || self.timeout_secs > MAX_POLL_TIMEOUT_SECS {
            return Err(Error::Config(format!(
                "polling.timeout_secs must be between 1 and {}",
                MAX_POLL_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            timeout_secs: default_poll_timeout_secs(),
        }
    }
}

/// What the batch subscriber does when its event stream drops before a
/// terminal snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionLossPolicy {
    /// Report "connection lost" and treat the batch as finished so the
    /// results fetch still runs
    #[default]
    Complete,
    /// Report "connection lost" and leave the batch unfinished
    Halt,
}

/// `[stream]` table: batch progress stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub connection_loss: ConnectionLossPolicy,
}

/// On-disk configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl TomlConfig {
    /// Config file with every compiled default spelled out
    pub fn with_defaults() -> Self {
        let defaults = CompiledDefaults::default();
        Self {
            server_url: Some(defaults.server_url),
            request_timeout_secs: Some(defaults.request_timeout_secs),
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or_else(|| CompiledDefaults::default().request_timeout_secs),
        )
    }
}

/// Default config file location: `<config_dir>/labelcheck/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("labelcheck").join("config.toml"))
}

/// Config file path: CLI argument, then `LABELCHECK_CONFIG`, then the
/// platform default
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path()
}

/// Parse a config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    config.polling.validate()?;
    Ok(config)
}

/// Load the config file if present, falling back to defaults
///
/// Missing file: silent defaults. Unreadable or invalid file: warning plus
/// defaults.
pub fn load_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        return TomlConfig::default();
    };

    if !path.exists() {
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Ignoring config file {}: {}", path.display(), e);
            TomlConfig::default()
        }
    }
}

/// Server base URL: CLI argument, then `LABELCHECK_SERVER_URL`, then TOML,
/// then the compiled default. Trailing slashes are stripped.
pub fn resolve_server_url(cli_arg: Option<&str>, config: &TomlConfig) -> String {
    let env_value = std::env::var(SERVER_URL_ENV_VAR).ok();

    let chosen = cli_arg
        .map(str::to_string)
        .or(env_value.filter(|v| !v.trim().is_empty()))
        .or_else(|| config.server_url.clone())
        .unwrap_or_else(|| CompiledDefaults::default().server_url);

    chosen.trim().trim_end_matches('/').to_string()
}

/// Write a config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    std::fs::write(&temp_path, content)?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}
