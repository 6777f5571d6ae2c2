//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use redir_cache::fs::CacheOptions;
use redir_cache::fs::resolver::DEFAULT_MAX_HOPS;

const APP_DIR: &str = "redir-cache";
const CONFIG_FILE: &str = "config.toml";

fn default_max_resolve_hops() -> usize {
    DEFAULT_MAX_HOPS
}

fn default_server_name() -> String {
    "AFS".to_owned()
}

fn default_sysnames() -> Vec<String> {
    vec!["amd64_linux26".to_owned()]
}

fn default_color() -> bool {
    true
}

/// Namespace cache tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Evaluations allowed per redirect resolution.
    #[serde(default = "default_max_resolve_hops")]
    pub max_resolve_hops: usize,

    /// Name of the namespace root.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// `@sys` substitutions for 32-bit callers.
    #[serde(default = "default_sysnames")]
    pub sysnames_32: Vec<String>,

    /// `@sys` substitutions for 64-bit callers.
    #[serde(default = "default_sysnames")]
    pub sysnames_64: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_resolve_hops: default_max_resolve_hops(),
            server_name: default_server_name(),
            sysnames_32: default_sysnames(),
            sysnames_64: default_sysnames(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogConfig {
    /// An `EnvFilter` directive used when no environment filter is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Whether to emit ANSI colors.
    #[serde(default = "default_color")]
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: None,
            color: default_color(),
        }
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` listing every problem otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.cache.max_resolve_hops == 0 {
            errors.push("cache.max-resolve-hops must be at least 1.".to_owned());
        }

        if self.cache.server_name.trim().is_empty() {
            errors.push("cache.server-name must not be empty.".to_owned());
        }

        for (key, names) in [
            ("sysnames-32", &self.cache.sysnames_32),
            ("sysnames-64", &self.cache.sysnames_64),
        ] {
            if names.iter().any(|name| name.is_empty()) {
                errors.push(format!("cache.{key} must not contain empty names."));
            }
        }

        if let Some(filter) = &self.log.filter
            && let Err(e) = tracing_subscriber::EnvFilter::try_new(filter)
        {
            errors.push(format!("log.filter '{filter}' is invalid: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The library-facing options.
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            max_resolve_hops: self.cache.max_resolve_hops,
            server_name: self.cache.server_name.clone(),
            sysnames_32: self.cache.sysnames_32.clone(),
            sysnames_64: self.cache.sysnames_64.clone(),
        }
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join(APP_DIR).join(CONFIG_FILE));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join(APP_DIR).join(CONFIG_FILE));
        }

        paths.push(PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILE));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration from the first found config file, or the external path if given.
    pub fn load(external_config_path: Option<&Path>) -> Option<Result<Self, ConfigError>> {
        if let Some(path) = external_config_path {
            return Some(Self::load_from_file(path));
        }

        Self::find_config_file().map(|path| Self::load_from_file(&path))
    }

    /// Loads and validates config, falling back to defaults if none exists.
    /// Errors if a config file exists but is malformed.
    pub fn load_or_default(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(res) = Self::load(external_config_path) else {
            debug!("No configuration file found, using defaults.");
            return Ok(Self::default());
        };
        let config = res?;
        config.validate().map_err(ConfigError::ValidationErrors)?;
        debug!("Loaded configuration successfully.");
        Ok(config)
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
