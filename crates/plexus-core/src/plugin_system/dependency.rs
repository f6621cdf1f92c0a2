use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::plugin_system::version::PluginVersion;

/// An import declared by a plugin descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginImport {
    /// Identifier of the imported plugin
    pub plugin_id: String,

    /// Version the importing plugin was built against, if any
    pub version: Option<PluginVersion>,

    /// Optional imports are skipped when the plugin is not installed
    pub optional: bool,
}

/// Error that can occur when resolving dependencies
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    /// A mandatory import is not installed
    #[error("Plugin '{plugin_id}' imports '{import_id}' which is not installed")]
    MissingPlugin { plugin_id: String, import_id: String },

    /// The imported plugin is installed but its version is not compatible
    #[error("Plugin '{plugin_id}' imports '{import_id}' version {required} but version {}{} is installed",
        actual.as_deref().unwrap_or("<unversioned>"),
        floor.as_ref().map(|f| format!(" (compatible back to {})", f)).unwrap_or_default())]
    IncompatibleVersion {
        plugin_id: String,
        import_id: String,
        required: String,
        actual: Option<String>,
        floor: Option<String>,
    },

    /// The plugin requires a newer framework release
    #[error("Plugin '{plugin_id}' requires framework version {required}, running {running}")]
    IncompatibleFramework {
        plugin_id: String,
        required: String,
        running: String,
    },
}

impl PluginImport {
    /// Create a mandatory import of any version
    pub fn required(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            version: None,
            optional: false,
        }
    }

    /// Create an optional import of any version
    pub fn optional(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            version: None,
            optional: true,
        }
    }

    /// Pin the import to the version it was built against
    pub fn with_version(mut self, version: PluginVersion) -> Self {
        self.version = Some(version);
        self
    }
}

impl fmt::Display for PluginImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.plugin_id)?;
        if let Some(version) = &self.version {
            write!(f, " {}", version)?;
        }
        if self.optional {
            write!(f, " (optional)")?;
        }
        Ok(())
    }
}
