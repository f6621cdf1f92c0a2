/// Framework name
pub const FRAMEWORK_NAME: &str = "plexus";

/// Framework release version
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oldest framework version plugins built against remain binary compatible with
pub const FRAMEWORK_ABI_COMPATIBILITY: &str = "0.1.0";

/// Descriptor file names searched for in a plugin directory, in order
pub const DESCRIPTOR_FILE_NAMES: &[&str] = &[
    "plugin.json",
    #[cfg(feature = "yaml-config")]
    "plugin.yaml",
    #[cfg(feature = "yaml-config")]
    "plugin.yml",
    #[cfg(feature = "toml-config")]
    "plugin.toml",
];

/// Separator between a plugin identifier and a local extension (point) identifier
pub const IDENTIFIER_SEPARATOR: char = '.';
