//! Installer Configuration
//!
//! Settings that shape every provisioning run:
//! - SDK root and download cache locations
//! - Network retry and timeout policy
//! - Defaults for build-tools and AVD device profiles

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use directories::ProjectDirs;
use tracing::{info, debug};

use crate::error::{InstallerError, Result};

/// Network retry and timeout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Attempts per retryable operation, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on every further attempt
    pub base_delay_ms: u64,
    /// Upper bound for a single archive download
    pub download_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            download_timeout_secs: 1800,
        }
    }
}

impl NetworkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        NetworkConfig::default().retry_policy()
    }
}

/// External tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Upper bound for a single sdkmanager/avdmanager invocation
    pub command_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 1800,
        }
    }
}

impl ToolsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Request defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Device profile passed to `avdmanager -d`
    pub device: String,
    /// Build-tools version installed when a request asks for build-tools without a version
    pub build_tools: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            device: "pixel_6".to_string(),
            build_tools: "34.0.0".to_string(),
        }
    }
}

/// Main installer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Android SDK root; see [`InstallerConfig::resolve_sdk_root`] for the fallback chain
    pub sdk_root: Option<PathBuf>,
    /// Where downloaded archives are kept between attempts
    pub cache_dir: Option<PathBuf>,
    /// Answer `y` to SDK license prompts
    pub accept_licenses: bool,
    /// Draw download progress bars on stderr
    pub show_progress: bool,
    /// JSON-Lines file receiving one record per plan step event
    pub step_log: Option<PathBuf>,
    pub network: NetworkConfig,
    pub tools: ToolsConfig,
    pub defaults: DefaultsConfig,
}

impl InstallerConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "droidup", "droidup")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "droidup", "droidup")
            .map(|dirs| dirs.data_local_dir().to_path_buf())
    }

    /// Load configuration from the default location, falling back to defaults
    pub async fn load() -> Result<Self> {
        match Self::config_file() {
            Some(path) => Self::load_from(&path).await,
            None => {
                info!("Cannot determine config path, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file; a missing file yields defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        debug!("Loading config from {:?}", path);
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| InstallerError::io_at(path, e))?;
        let config: InstallerConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| InstallerError::io_at(parent, e))?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| InstallerError::io_at(path, e))?;

        debug!("Config saved to {:?}", path);
        Ok(())
    }

    /// Resolve the SDK root.
    ///
    /// Order: explicit override, config file, `ANDROID_SDK_ROOT`, `ANDROID_HOME`,
    /// then a droidup-owned directory under the local data dir.
    pub fn resolve_sdk_root(&self, override_root: Option<&Path>) -> Result<PathBuf> {
        if let Some(root) = override_root {
            return Ok(root.to_path_buf());
        }
        if let Some(root) = &self.sdk_root {
            return Ok(root.clone());
        }
        for var in ["ANDROID_SDK_ROOT", "ANDROID_HOME"] {
            if let Some(value) = std::env::var_os(var).filter(|v| !v.is_empty()) {
                return Ok(PathBuf::from(value));
            }
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("droidup").join("sdk"))
            .ok_or_else(|| InstallerError::Config("cannot determine a default SDK root".into()))
    }

    /// Resolve the archive cache directory for a given SDK root
    pub fn resolve_cache_dir(&self, sdk_root: &Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| sdk_root.join(".droidup-cache"))
    }
}
