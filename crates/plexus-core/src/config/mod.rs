//! # Plexus Configuration
//!
//! File formats shared by plugin descriptors and host configuration, and the
//! [`EnvironmentConfig`] a host program uses to set up an environment.
//!
//! JSON is always available. YAML and TOML support are enabled by the
//! `yaml-config` and `toml-config` features (both on by default).
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::kernel::error::{Error, Result};
use crate::plugin_system::scanner::ScanFlags;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }

    /// Deserialize a value from text in this format.
    ///
    /// `path` only serves error reporting.
    pub fn deserialize<T: DeserializeOwned>(&self, data: &str, path: Option<&Path>) -> Result<T> {
        let malformed = |message: String| Error::malformed(path.map(Path::to_path_buf), message);
        match self {
            ConfigFormat::Json => serde_json::from_str(data)
                .map_err(|e| malformed(format!("Failed to deserialize from JSON: {}", e))),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data)
                .map_err(|e| malformed(format!("Failed to deserialize from YAML: {}", e))),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data)
                .map_err(|e| malformed(format!("Failed to deserialize from TOML: {}", e))),
        }
    }
}

/// Host-side environment setup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Plugin collection directories to register
    pub collections: Vec<PathBuf>,
    /// Scan policy used when installing from the collections
    pub scan: ScanFlags,
    /// Plugins to start once the collections have been scanned
    pub start: Vec<String>,
    /// Startup arguments made available to plugins
    pub args: Vec<String>,
    /// Whether the host should drive run functions until none remain
    pub run_plugins: bool,
}

impl EnvironmentConfig {
    /// Load a configuration file, choosing the format from its extension.
    ///
    /// Relative collection paths are interpreted relative to the directory
    /// containing the file.
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            Error::malformed(Some(path.to_path_buf()), "unsupported configuration file extension")
        })?;
        let data = std::fs::read_to_string(path).map_err(|e| Error::io(e, "read_config", path))?;
        let mut config: EnvironmentConfig = format.deserialize(&data, Some(path))?;
        if let Some(base) = path.parent() {
            for collection in config.collections.iter_mut() {
                if collection.is_relative() {
                    *collection = base.join(&*collection);
                }
            }
        }
        log::debug!("Loaded environment configuration from {}", path.display());
        Ok(config)
    }

    /// Register the configured collections and arguments with a context.
    pub fn apply(&self, ctx: &Context) -> Result<()> {
        for collection in &self.collections {
            ctx.register_collection(collection)?;
        }
        if !self.args.is_empty() {
            ctx.set_args(self.args.clone());
        }
        Ok(())
    }
}
