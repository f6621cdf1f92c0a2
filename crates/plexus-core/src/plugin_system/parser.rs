use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::ConfigFormat;
use crate::kernel::error::{Error, Result};
use crate::plugin_system::dependency::PluginImport;
use crate::plugin_system::descriptor::{global_id, CfgElement, Extension, ExtensionPoint, PluginDescriptor, RuntimeRef};
use crate::plugin_system::version::PluginVersion;
use crate::utils::fs::find_descriptor;

/// Turns descriptor file contents into plugin descriptors.
pub trait DescriptorParser: Send + Sync {
    /// Parse a descriptor. `plugin_path` is the plugin directory, recorded in
    /// the descriptor and used for error reporting.
    fn parse(&self, data: &[u8], format: ConfigFormat, plugin_path: Option<&Path>) -> Result<PluginDescriptor>;
}

/// Loads the descriptor stored in a plugin directory.
pub fn load_from_dir(parser: &dyn DescriptorParser, dir: &Path) -> Result<PluginDescriptor> {
    let (file, format) = find_descriptor(dir)?;
    let data = std::fs::read(&file).map_err(|e| Error::io(e, "read_descriptor", &file))?;
    parser.parse(&data, format, Some(dir))
}

#[derive(Deserialize, Debug)]
struct RawImport {
    plugin: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    optional: bool,
}

#[derive(Deserialize, Debug)]
struct RawRuntime {
    library: String,
    #[serde(default)]
    funcs: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawExtensionPoint {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    schema: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawCfgElement {
    name: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    children: Vec<RawCfgElement>,
}

#[derive(Deserialize, Debug)]
struct RawExtension {
    point: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    children: Vec<RawCfgElement>,
}

#[derive(Deserialize, Debug)]
struct RawDescriptor {
    #[serde(alias = "id")]
    identifier: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    provider_name: Option<String>,
    #[serde(default)]
    abi_compatibility: Option<String>,
    #[serde(default)]
    api_compatibility: Option<String>,
    #[serde(default)]
    required_framework: Option<String>,
    #[serde(default)]
    imports: Vec<RawImport>,
    #[serde(default)]
    runtime: Option<RawRuntime>,
    #[serde(default)]
    extension_points: Vec<RawExtensionPoint>,
    #[serde(default)]
    extensions: Vec<RawExtension>,
}

/// Descriptor parser for the serde formats in [`ConfigFormat`].
///
/// ```json
/// {
///   "identifier": "org.example.sink",
///   "version": "1.2.0",
///   "imports": [{ "plugin": "org.example.core", "version": "1.0" }],
///   "runtime": { "library": "sink", "funcs": "sink_runtime" },
///   "extension_points": [{ "id": "formats" }],
///   "extensions": [{ "point": "org.example.core.sinks", "attributes": { "kind": "file" } }]
/// }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SerdeDescriptorParser;

impl SerdeDescriptorParser {
    pub fn new() -> Self {
        Self
    }
}

struct Validator<'a> {
    path: Option<&'a Path>,
}

impl Validator<'_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::malformed(self.path.map(Path::to_path_buf), message)
    }

    fn identifier(&self, what: &str, value: &str) -> Result<()> {
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(self.error(format!("invalid {} '{}'", what, value)));
        }
        Ok(())
    }

    fn version(&self, what: &str, value: Option<String>) -> Result<Option<PluginVersion>> {
        value
            .map(|v| PluginVersion::parse(&v).map_err(|e| self.error(format!("invalid {}: {}", what, e))))
            .transpose()
    }
}

fn convert_cfg(raw: RawCfgElement) -> CfgElement {
    CfgElement {
        name: raw.name,
        attributes: raw.attributes.into_iter().collect(),
        value: raw.value,
        children: raw.children.into_iter().map(convert_cfg).collect(),
    }
}

impl DescriptorParser for SerdeDescriptorParser {
    fn parse(&self, data: &[u8], format: ConfigFormat, plugin_path: Option<&Path>) -> Result<PluginDescriptor> {
        let v = Validator { path: plugin_path };
        let text = std::str::from_utf8(data).map_err(|e| v.error(format!("descriptor is not valid UTF-8: {}", e)))?;
        let raw: RawDescriptor = format.deserialize(text, plugin_path)?;

        v.identifier("plugin identifier", &raw.identifier)?;
        let identifier = raw.identifier;

        let mut imports = Vec::with_capacity(raw.imports.len());
        let mut seen_imports = HashSet::new();
        for import in raw.imports {
            v.identifier("import", &import.plugin)?;
            if import.plugin == identifier {
                return Err(v.error(format!("plugin '{}' imports itself", identifier)));
            }
            if !seen_imports.insert(import.plugin.clone()) {
                return Err(v.error(format!("plugin '{}' is imported twice", import.plugin)));
            }
            let version = v.version("import version", import.version)?;
            imports.push(PluginImport {
                plugin_id: import.plugin,
                version,
                optional: import.optional,
            });
        }

        let runtime = match raw.runtime {
            Some(rt) if rt.library.is_empty() => return Err(v.error("runtime library name is empty")),
            Some(rt) => Some(RuntimeRef {
                library: rt.library,
                funcs: rt.funcs,
            }),
            None => None,
        };

        let mut ext_points = Vec::with_capacity(raw.extension_points.len());
        let mut seen_points = HashSet::new();
        for point in raw.extension_points {
            v.identifier("extension point identifier", &point.id)?;
            if !seen_points.insert(point.id.clone()) {
                return Err(v.error(format!("extension point '{}' declared twice", point.id)));
            }
            ext_points.push(ExtensionPoint {
                identifier: global_id(&identifier, &point.id),
                plugin_id: identifier.clone(),
                local_id: point.id,
                name: point.name,
                schema_path: point.schema,
            });
        }

        let mut extensions = Vec::with_capacity(raw.extensions.len());
        for ext in raw.extensions {
            v.identifier("extension point reference", &ext.point)?;
            if let Some(local) = &ext.id {
                v.identifier("extension identifier", local)?;
            }
            let configuration = convert_cfg(RawCfgElement {
                name: "extension".to_string(),
                attributes: ext.attributes,
                value: ext.value,
                children: ext.children,
            });
            extensions.push(Extension {
                identifier: ext.id.as_deref().map(|l| global_id(&identifier, l)),
                plugin_id: identifier.clone(),
                point_id: ext.point,
                local_id: ext.id,
                name: ext.name,
                configuration,
            });
        }

        Ok(PluginDescriptor {
            name: raw.name,
            version: v.version("plugin version", raw.version)?,
            provider_name: raw.provider_name,
            plugin_path: plugin_path.map(PathBuf::from),
            abi_bw_compatibility: v.version("ABI compatibility version", raw.abi_compatibility)?,
            api_bw_compatibility: v.version("API compatibility version", raw.api_compatibility)?,
            required_framework: v.version("required framework version", raw.required_framework)?,
            imports,
            runtime,
            ext_points,
            extensions,
            identifier,
        })
    }
}
