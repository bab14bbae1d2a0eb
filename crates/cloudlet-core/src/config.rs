//! Launcher configuration
//!
//! Configuration for the cloudlet launcher: registry endpoint, polling
//! timings, and paths to the locally provisioned identity and VPN
//! template files. Loaded once at startup; missing local files degrade
//! to empty values instead of aborting the service.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default cloudlet registry endpoint
pub const DEFAULT_REGISTRY_URL: &str = "http://8.225.186.10:9127";

/// Default connect timeout for registry requests (milliseconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

/// Default read timeout for registry requests (milliseconds)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 15_000;

/// Default delay before the first status poll (milliseconds)
pub const DEFAULT_FIRST_POLL_DELAY_MS: u64 = 10_000;

/// Default interval between status polls (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

/// Default upper bound on status poll attempts per session
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 100;

/// Complete launcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LauncherConfig {
    /// Cloudlet registry endpoint settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Tunnel-address polling settings
    #[serde(default)]
    pub polling: PollingConfig,

    /// Path to the file holding the device/user identifier
    #[serde(default)]
    pub user_id_path: Option<PathBuf>,

    /// Path to the VPN client configuration template
    #[serde(default)]
    pub vpn_config_path: Option<PathBuf>,
}

/// Registry endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the cloudlet registry
    pub base_url: String,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_URL.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// Polling scheduler configuration
///
/// The poller is a fixed-delay loop, not exponential backoff: one initial
/// delay, then a constant interval until an address arrives or the attempt
/// budget is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay before the first poll in milliseconds
    pub first_delay_ms: u64,

    /// Interval between polls in milliseconds
    pub interval_ms: u64,

    /// Maximum number of poll attempts before the session is considered
    /// abandoned and a timeout is surfaced
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            first_delay_ms: DEFAULT_FIRST_POLL_DELAY_MS,
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl LauncherConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load the device/user identifier from the configured path
    ///
    /// Only the first line of the file is used. A missing path or an
    /// unreadable file degrades to an empty identifier.
    pub fn load_user_id(&self) -> String {
        match &self.user_id_path {
            Some(path) => read_first_line(path),
            None => {
                tracing::warn!("No user id file configured, using empty user id");
                String::new()
            }
        }
    }

    /// Load the VPN client configuration template from the configured path
    ///
    /// An unreadable file degrades to an empty template.
    pub fn load_vpn_template(&self) -> String {
        match &self.vpn_config_path {
            Some(path) => match fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Error reading VPN config file {}: {}", path.display(), e);
                    String::new()
                }
            },
            None => {
                tracing::warn!("No VPN config template configured");
                String::new()
            }
        }
    }
}

fn read_first_line(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(text) => text.lines().next().unwrap_or_default().trim().to_string(),
        Err(e) => {
            tracing::error!("Error reading id file {}: {}", path.display(), e);
            String::new()
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
