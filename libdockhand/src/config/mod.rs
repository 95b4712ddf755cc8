//! Library configuration.
//!
//! Compiled defaults merged with an optional YAML file. Every field has a
//! default, so partial files are valid.

use crate::error::{DockhandError, Result};
use config::{Config as ConfigRs, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};


/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub auth: Auth,
    /// Default platform for pulls, e.g. `linux/arm64`
    #[serde(default)]
    pub platform: Option<String>,
}

impl Config {
    /// Parses a `Config` from a YAML string.
    ///
    /// # Examples
    ///
    /// ```
    /// use libdockhand::config::Config;
    ///
    /// let config = Config::from_yaml_str("network:\n  timeout: 90\n").unwrap();
    /// assert_eq!(config.network.timeout, 90);
    /// assert!(config.cache.enabled);
    /// ```
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let builder = Self::defaults()?.add_source(File::from_str(s, FileFormat::Yaml));
        Self::from_builder(builder, None)
    }

    /// Loads a `Config` from an optional YAML file.
    ///
    /// Without a path, the defaults are returned. A given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::defaults()?;

        if let Some(p) = path {
            builder = builder.add_source(File::from(p).format(FileFormat::Yaml).required(true));
        }

        Self::from_builder(builder, path)
    }

    /// Returns the blob cache directory, falling back to the per-user cache dir.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(crate::cache::DiskBlobCache::default_dir)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = ConfigRs::try_from(&Config::default()).map_err(|e| {
            DockhandError::config_with_source("Failed to build default configuration", None, e)
        })?;
        Ok(ConfigRs::builder().add_source(defaults))
    }

    /// Creates a `Config` from a `config::ConfigBuilder`.
    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        path: Option<&Path>,
    ) -> Result<Self> {
        builder
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| {
                DockhandError::config_with_source(
                    "Failed to deserialize configuration".to_string(),
                    path.map(|p| p.display().to_string()),
                    e,
                )
            })
    }
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    /// Request timeout in seconds
    #[serde(default = "default_network_timeout")]
    pub timeout: u64,

    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            timeout: default_network_timeout(),
            max_idle_per_host: default_max_idle_per_host(),
        }
    }
}

fn default_network_timeout() -> u64 {
    30
}

fn default_max_idle_per_host() -> usize {
    10
}

/// Blob cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Cache directory; `None` means `<user cache dir>/dockhand/blobs`
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_cache_memory_entries")]
    pub memory_entries: usize,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: None,
            memory_entries: default_cache_memory_entries(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_memory_entries() -> usize {
    64
}

/// Credential store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Auth {
    /// Credentials file; `None` means `~/.dockhand/config.json`
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}
