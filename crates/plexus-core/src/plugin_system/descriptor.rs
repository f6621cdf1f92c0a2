use std::path::PathBuf;

use serde::Serialize;

use crate::kernel::constants::IDENTIFIER_SEPARATOR;
use crate::plugin_system::dependency::PluginImport;
use crate::plugin_system::version::PluginVersion;

/// Describes an installable plugin.
///
/// Descriptors are immutable once built. The environment shares them through
/// `Arc` and tracks the references it hands out to callers in its info
/// registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDescriptor {
    /// Unique identifier for the plugin
    pub identifier: String,

    /// Human-readable name
    pub name: Option<String>,

    /// Plugin release version
    pub version: Option<PluginVersion>,

    /// Name of the plugin provider
    pub provider_name: Option<String>,

    /// Directory the plugin was loaded from
    pub plugin_path: Option<PathBuf>,

    /// Oldest release this version is binary compatible with
    pub abi_bw_compatibility: Option<PluginVersion>,

    /// Oldest release this version is source compatible with
    pub api_bw_compatibility: Option<PluginVersion>,

    /// Oldest framework release the plugin runs on
    pub required_framework: Option<PluginVersion>,

    /// Plugins this one imports
    pub imports: Vec<PluginImport>,

    /// Native runtime, if the plugin has one
    pub runtime: Option<RuntimeRef>,

    /// Extension points declared by the plugin
    pub ext_points: Vec<ExtensionPoint>,

    /// Extensions the plugin attaches to extension points
    pub extensions: Vec<Extension>,
}

/// Reference to the native runtime of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeRef {
    /// Library name without platform prefix or extension
    pub library: String,

    /// Symbol of the exported runtime function table
    pub funcs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionPoint {
    /// Declaring plugin
    pub plugin_id: String,
    pub local_id: String,
    /// Global identifier, `<plugin id>.<local id>`
    pub identifier: String,
    pub name: Option<String>,
    /// Path of the extension schema relative to the plugin directory
    pub schema_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    /// Declaring plugin
    pub plugin_id: String,
    /// Global identifier of the extended extension point
    pub point_id: String,
    pub local_id: Option<String>,
    pub identifier: Option<String>,
    pub name: Option<String>,
    pub configuration: CfgElement,
}

/// A node of an extension configuration tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CfgElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub value: Option<String>,
    pub children: Vec<CfgElement>,
}

pub(crate) fn global_id(plugin_id: &str, local_id: &str) -> String {
    format!("{}{}{}", plugin_id, IDENTIFIER_SEPARATOR, local_id)
}

impl PluginDescriptor {
    /// Create a descriptor carrying only an identifier
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            name: None,
            version: None,
            provider_name: None,
            plugin_path: None,
            abi_bw_compatibility: None,
            api_bw_compatibility: None,
            required_framework: None,
            imports: Vec::new(),
            runtime: None,
            ext_points: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// Returns the import of `plugin_id`, if declared
    pub fn import(&self, plugin_id: &str) -> Option<&PluginImport> {
        self.imports.iter().find(|i| i.plugin_id == plugin_id)
    }
}

impl CfgElement {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Value of the named attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// First child element with the given name
    pub fn child(&self, name: &str) -> Option<&CfgElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Looks up a descendant element by a `/`-separated path of element
    /// names. `..` selects the parent and empty components are ignored, so an
    /// empty path returns this element. Paths cannot leave this element's
    /// subtree upwards.
    pub fn lookup(&self, path: &str) -> Option<&CfgElement> {
        let mut trail: Vec<&CfgElement> = vec![self];
        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    if trail.len() == 1 {
                        return None;
                    }
                    trail.pop();
                }
                name => {
                    let current = trail.last()?;
                    trail.push(current.child(name)?);
                }
            }
        }
        trail.last().copied()
    }

    /// Looks up a value. The path selects an element as in
    /// [`CfgElement::lookup`]; a final `@name` component selects an attribute
    /// of that element instead of its text value.
    pub fn lookup_value(&self, path: &str) -> Option<&str> {
        let (element_path, attribute) = match path.rsplit_once('/') {
            Some((head, tail)) if tail.starts_with('@') => (head, Some(&tail[1..])),
            None if path.starts_with('@') => ("", Some(&path[1..])),
            _ => (path, None),
        };
        let element = self.lookup(element_path)?;
        match attribute {
            Some(name) => element.attribute(name),
            None => element.value.as_deref(),
        }
    }
}

/// Builder for creating a plugin descriptor
pub struct DescriptorBuilder {
    descriptor: PluginDescriptor,
}

impl DescriptorBuilder {
    /// Create a new descriptor builder
    pub fn new(identifier: &str) -> Self {
        Self {
            descriptor: PluginDescriptor::new(identifier),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.descriptor.name = Some(name.to_string());
        self
    }

    /// Set the release version. Unparsable versions are ignored with a warning.
    pub fn version(mut self, version: &str) -> Self {
        match PluginVersion::parse(version) {
            Ok(v) => self.descriptor.version = Some(v),
            Err(e) => log::warn!("Ignoring version of plugin '{}': {}", self.descriptor.identifier, e),
        }
        self
    }

    pub fn provider(mut self, provider_name: &str) -> Self {
        self.descriptor.provider_name = Some(provider_name.to_string());
        self
    }

    pub fn plugin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.descriptor.plugin_path = Some(path.into());
        self
    }

    pub fn abi_compatibility(mut self, floor: PluginVersion) -> Self {
        self.descriptor.abi_bw_compatibility = Some(floor);
        self
    }

    pub fn api_compatibility(mut self, floor: PluginVersion) -> Self {
        self.descriptor.api_bw_compatibility = Some(floor);
        self
    }

    pub fn required_framework(mut self, version: PluginVersion) -> Self {
        self.descriptor.required_framework = Some(version);
        self
    }

    /// Add an import
    pub fn import(mut self, import: PluginImport) -> Self {
        self.descriptor.imports.push(import);
        self
    }

    /// Set the native runtime library and the symbol of its function table
    pub fn runtime(mut self, library: &str, funcs: Option<&str>) -> Self {
        self.descriptor.runtime = Some(RuntimeRef {
            library: library.to_string(),
            funcs: funcs.map(str::to_string),
        });
        self
    }

    /// Declare an extension point with the given local identifier
    pub fn ext_point(mut self, local_id: &str, name: Option<&str>) -> Self {
        let plugin_id = self.descriptor.identifier.clone();
        self.descriptor.ext_points.push(ExtensionPoint {
            identifier: global_id(&plugin_id, local_id),
            plugin_id,
            local_id: local_id.to_string(),
            name: name.map(str::to_string),
            schema_path: None,
        });
        self
    }

    /// Attach an extension to the extension point `point_id`
    pub fn extension(mut self, point_id: &str, local_id: Option<&str>, configuration: CfgElement) -> Self {
        let plugin_id = self.descriptor.identifier.clone();
        self.descriptor.extensions.push(Extension {
            identifier: local_id.map(|l| global_id(&plugin_id, l)),
            plugin_id,
            point_id: point_id.to_string(),
            local_id: local_id.map(str::to_string),
            name: None,
            configuration,
        });
        self
    }

    /// Build the descriptor
    pub fn build(self) -> PluginDescriptor {
        self.descriptor
    }
}
