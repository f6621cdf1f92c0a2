pub mod config;
pub mod context;
pub mod event;
pub mod kernel;
pub mod plugin_system;
pub mod utils;

// Re-export key public types for the console and for plugins
pub use config::{ConfigFormat, EnvironmentConfig};
pub use context::{Context, ContextBuilder};
pub use event::{HandlerId, LogSeverity, PluginEvent};
pub use kernel::error::{Error, ErrorKind, Result};
pub use plugin_system::{
    DescriptorBuilder, DynamicLoader, InstanceData, PluginDescriptor, PluginRuntime, PluginState, RawRuntimeFuncs,
    ScanFlags, StaticLibrary, StaticLoader, SymbolAddress,
};

#[cfg(test)]
mod tests;
