use std::fmt;

use serde::{Deserialize, Serialize};

use crate::plugin_system::plugin::PluginState;

/// Severity of a framework log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogSeverity {
    /// Matching level of the `log` facade
    pub fn level(self) -> log::Level {
        match self {
            LogSeverity::Debug => log::Level::Debug,
            LogSeverity::Info => log::Level::Info,
            LogSeverity::Warning => log::Level::Warn,
            LogSeverity::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogSeverity::Debug => "debug",
            LogSeverity::Info => "info",
            LogSeverity::Warning => "warning",
            LogSeverity::Error => "error",
        };
        f.write_str(s)
    }
}

/// A plugin changed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEvent {
    pub plugin_id: String,
    pub old_state: PluginState,
    pub new_state: PluginState,
}

impl PluginEvent {
    pub fn new(plugin_id: &str, old_state: PluginState, new_state: PluginState) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            old_state,
            new_state,
        }
    }
}

impl fmt::Display for PluginEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin '{}' {} -> {}", self.plugin_id, self.old_state, self.new_state)
    }
}
