use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;

use crate::plugin_system::adapter::{NativeRuntime, RawRuntimeFuncs};
use crate::plugin_system::error::LoaderError;
use crate::plugin_system::traits::PluginRuntime;

/// Address of a symbol exported or defined by a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolAddress(usize);

impl SymbolAddress {
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Address of a value with static lifetime
    pub fn of<T>(value: &'static T) -> Self {
        Self::from_ptr(value as *const T)
    }

    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SymbolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opens plugin runtime libraries.
pub trait NativeLoader: Send + Sync {
    /// Open `library` for the plugin installed in `plugin_path`.
    fn open(&self, plugin_path: Option<&Path>, library: &str) -> Result<Box<dyn NativeLibrary>, LoaderError>;
}

/// An open runtime library. Dropping it closes the library.
pub trait NativeLibrary: Send + Sync {
    fn name(&self) -> &str;

    /// Address of an exported symbol
    fn symbol(&self, name: &str) -> Option<SymbolAddress>;

    /// Runtime described by the function table exported as `funcs`
    fn runtime(&self, funcs: &str) -> Result<Arc<dyn PluginRuntime>, LoaderError>;
}

/// Loads shared libraries from plugin directories with `libloading`.
///
/// The file name is derived from the library name with the platform's
/// conventions (`libfoo.so`, `libfoo.dylib`, `foo.dll`).
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

impl DynamicLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn library_path(plugin_path: Option<&Path>, library: &str) -> PathBuf {
        let file_name = libloading::library_filename(library);
        match plugin_path {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

struct DynamicLibrary {
    name: String,
    library: Arc<Library>,
}

impl DynamicLibrary {
    fn raw_symbol(&self, name: &str) -> Option<*const c_void> {
        let mut symbol_name = Vec::with_capacity(name.len() + 1);
        symbol_name.extend_from_slice(name.as_bytes());
        symbol_name.push(0);
        // Safety: the symbol is only read as an address, never called here.
        let symbol = unsafe { self.library.get::<*const c_void>(&symbol_name) }.ok()?;
        let address = *symbol;
        (!address.is_null()).then_some(address)
    }
}

impl NativeLoader for DynamicLoader {
    fn open(&self, plugin_path: Option<&Path>, library: &str) -> Result<Box<dyn NativeLibrary>, LoaderError> {
        if library.contains("..") || Path::new(library).is_absolute() {
            return Err(LoaderError::Open {
                path: PathBuf::from(library),
                message: "library name must be relative and not traverse upwards".to_string(),
            });
        }
        let path = Self::library_path(plugin_path, library);
        // Safety: loading runs the library's initializers; plugin libraries
        // are trusted by whoever installed them.
        let handle = unsafe { Library::new(&path) }.map_err(|e| LoaderError::Open {
            path: path.clone(),
            message: e.to_string(),
        })?;
        log::debug!("Opened runtime library {}", path.display());
        Ok(Box::new(DynamicLibrary {
            name: library.to_string(),
            library: Arc::new(handle),
        }))
    }
}

impl NativeLibrary for DynamicLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self, name: &str) -> Option<SymbolAddress> {
        self.raw_symbol(name).map(SymbolAddress::from_ptr)
    }

    fn runtime(&self, funcs: &str) -> Result<Arc<dyn PluginRuntime>, LoaderError> {
        let table = self.raw_symbol(funcs).ok_or_else(|| LoaderError::MissingSymbol {
            library: self.name.clone(),
            symbol: funcs.to_string(),
        })?;
        // Safety: the exported symbol is declared to be a RawRuntimeFuncs table
        // and the Arc keeps the library mapped for the runtime's lifetime.
        let runtime = unsafe { NativeRuntime::new(&self.name, table as *const RawRuntimeFuncs, Some(Arc::clone(&self.library))) };
        Ok(Arc::new(runtime))
    }
}

/// A library linked into the host program
#[derive(Clone, Default)]
pub struct StaticLibrary {
    symbols: HashMap<String, SymbolAddress>,
    runtimes: HashMap<String, Arc<dyn PluginRuntime>>,
}

impl StaticLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, name: &str, address: SymbolAddress) -> Self {
        self.symbols.insert(name.to_string(), address);
        self
    }

    pub fn with_runtime(mut self, funcs: &str, runtime: Arc<dyn PluginRuntime>) -> Self {
        self.runtimes.insert(funcs.to_string(), runtime);
        self
    }

    /// Register a native function table linked into the host program
    pub fn with_raw_runtime(self, funcs: &str, table: &'static RawRuntimeFuncs) -> Self {
        let runtime = Arc::new(NativeRuntime::from_static(funcs, table));
        self.with_runtime(funcs, runtime)
    }
}

struct OpenStaticLibrary {
    name: String,
    library: StaticLibrary,
}

impl NativeLibrary for OpenStaticLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self, name: &str) -> Option<SymbolAddress> {
        self.library.symbols.get(name).copied()
    }

    fn runtime(&self, funcs: &str) -> Result<Arc<dyn PluginRuntime>, LoaderError> {
        self.library
            .runtimes
            .get(funcs)
            .cloned()
            .ok_or_else(|| LoaderError::MissingSymbol {
                library: self.name.clone(),
                symbol: funcs.to_string(),
            })
    }
}

/// Serves libraries registered in-process, optionally falling back to
/// another loader for unknown names.
#[derive(Default)]
pub struct StaticLoader {
    libraries: HashMap<String, StaticLibrary>,
    fallback: Option<Box<dyn NativeLoader>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, library: StaticLibrary) -> &mut Self {
        self.libraries.insert(name.to_string(), library);
        self
    }

    pub fn with_library(mut self, name: &str, library: StaticLibrary) -> Self {
        self.register(name, library);
        self
    }

    pub fn with_fallback(mut self, fallback: impl NativeLoader + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }
}

impl NativeLoader for StaticLoader {
    fn open(&self, plugin_path: Option<&Path>, library: &str) -> Result<Box<dyn NativeLibrary>, LoaderError> {
        if let Some(found) = self.libraries.get(library) {
            return Ok(Box::new(OpenStaticLibrary {
                name: library.to_string(),
                library: found.clone(),
            }));
        }
        match &self.fallback {
            Some(fallback) => fallback.open(plugin_path, library),
            None => Err(LoaderError::Open {
                path: PathBuf::from(library),
                message: "library is not linked into the host program".to_string(),
            }),
        }
    }
}
