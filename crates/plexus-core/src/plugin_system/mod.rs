//! # Plexus Plugin System
//!
//! The plugin lifecycle and dependency resolution engine. Plugins are
//! installed from descriptors, resolved against their imports, started and
//! stopped along the import graph and finally uninstalled.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`descriptor`]** and **[`parser`]**: Plugin metadata ([`PluginDescriptor`])
//!   and the loading of descriptor files in JSON, YAML or TOML.
//! - **[`dependency`]** and **[`version`]**: Import declarations and the
//!   version compatibility rule applied while resolving.
//! - **[`loader`]** and **[`adapter`]**: Opening runtime libraries and
//!   wrapping their exported function tables as [`PluginRuntime`]s.
//! - **[`registry`]**: Installation and removal of plugins.
//! - **[`resolver`]**: Recursive resolution tolerant of import cycles.
//! - Start and stop propagation, cross-plugin [`symbols`], the run-function
//!   [`scheduler`] and the collection [`scanner`].
pub mod adapter;
pub mod dependency;
pub mod descriptor;
pub mod error;
mod lifecycle;
pub mod loader;
pub mod parser;
pub mod plugin;
mod registry;
mod resolver;
pub mod scanner;
pub mod scheduler;
pub mod symbols;
pub mod traits;
pub mod version;

pub use adapter::{NativeRuntime, RawRuntimeFuncs};
pub use dependency::{DependencyError, PluginImport};
pub use descriptor::{CfgElement, DescriptorBuilder, Extension, ExtensionPoint, PluginDescriptor, RuntimeRef};
pub use error::LoaderError;
pub use loader::{DynamicLoader, NativeLibrary, NativeLoader, StaticLibrary, StaticLoader, SymbolAddress};
pub use parser::{DescriptorParser, SerdeDescriptorParser};
pub use plugin::PluginState;
pub use scanner::ScanFlags;
pub use scheduler::RunFunction;
pub use traits::{InstanceData, PluginRuntime};
pub use version::PluginVersion;
