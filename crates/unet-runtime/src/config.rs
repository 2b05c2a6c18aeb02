//! Host configuration

use crate::error::{Result, UnetError};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use unet_interop::DEFAULT_BUNDLE_EXTENSION;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "UNET_CONFIG";

/// Configuration file looked up inside the plugins directory
pub const DEFAULT_CONFIG_FILE: &str = "unet.toml";

/// Plugin host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// File extension (without the dot) identifying plugin bundles
    pub bundle_extension: String,

    /// Default console log filter (overridden by `UNET_LOG`)
    pub log_level: String,

    /// Load a private copy of each bundle so the original can be replaced
    pub shadow_copy: bool,

    /// Release module code on unload; when false the code stays mapped
    pub unloadable: bool,

    /// Unload modules appended earlier in a load pass that later fails
    pub rollback_on_failure: bool,

    /// What metadata refresh does after a module reloads
    pub refresh: RefreshPolicy,

    /// Post-unload reclamation check
    pub reclaim: ReclaimPolicy,

    /// Bundle file watching
    pub hot_reload: HotReloadConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bundle_extension: DEFAULT_BUNDLE_EXTENSION.to_string(),
            log_level: "info".to_string(),
            shadow_copy: true,
            unloadable: true,
            rollback_on_failure: false,
            refresh: RefreshPolicy::default(),
            reclaim: ReclaimPolicy::default(),
            hot_reload: HotReloadConfig::default(),
        }
    }
}

/// Metadata refresh behaviour after a module reload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// Re-issue `register_class` for every descriptor the reloaded module yields
    #[default]
    Reregister,

    /// Only check that the reloaded module still carries the plugin marker
    Revalidate,
}

/// How long to wait for a torn-down module arena to be reclaimed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimPolicy {
    /// Number of checks before giving up
    pub attempts: u32,

    /// Pause between checks
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_millis(20),
        }
    }
}

/// Bundle watcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Reload a module when its bundle file changes
    pub enabled: bool,

    /// Quiet period after the last change to a bundle before it reloads
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: Duration::from_millis(500),
        }
    }
}

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML
    Toml,
    /// YAML
    Yaml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            other => Err(UnetError::config(format!(
                "Unsupported config format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}

impl HostConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .map_err(|e| UnetError::config(format!("Failed to read config file: {e}")))?;

        Self::load_from_str(&content, ConfigFormat::from_path(path)?)
    }

    /// Load configuration from a string
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Self> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| UnetError::config(format!("Failed to parse TOML: {e}")))?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| UnetError::config(format!("Failed to parse YAML: {e}")))?,
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| UnetError::config(format!("Failed to parse JSON: {e}")))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Find the configuration for a plugins directory
    ///
    /// `$UNET_CONFIG` wins, then `unet.toml` inside the plugins directory,
    /// then the defaults.
    pub fn discover(plugins_path: &Path) -> Result<Self> {
        if let Some(explicit) = env::var_os(CONFIG_ENV_VAR) {
            return Self::load_from_file(PathBuf::from(explicit));
        }

        let candidate = plugins_path.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            return Self::load_from_file(candidate);
        }

        Ok(Self::default())
    }

    /// Check configuration values
    pub fn validate(&self) -> Result<()> {
        if self.bundle_extension.is_empty() {
            return Err(UnetError::config("bundle_extension must not be empty"));
        }
        if self.bundle_extension.contains('.') {
            return Err(UnetError::config(format!(
                "bundle_extension must not contain '.': {}",
                self.bundle_extension
            )));
        }
        if self.reclaim.attempts == 0 {
            return Err(UnetError::config("reclaim.attempts must be at least 1"));
        }
        Ok(())
    }

    /// Whether a path carries the bundle extension, compared case-sensitively
    pub fn is_bundle(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == self.bundle_extension)
            .unwrap_or(false)
    }
}
