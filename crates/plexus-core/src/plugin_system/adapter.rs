//! Adapter between the C function table exported by native plugin libraries
//! and [`PluginRuntime`].
use std::ffi::c_void;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use libloading::Library;

use crate::context::Context;
use crate::plugin_system::traits::{InstanceData, PluginRuntime};

/// Runtime function table exported by a native plugin library.
///
/// `create` receives a pointer to the plugin's [`Context`] which is valid
/// only for the duration of the call; plugins keep a clone of it. A null
/// return from `create` is a failure. `start` returns zero on success.
#[repr(C)]
pub struct RawRuntimeFuncs {
    pub create: Option<unsafe extern "C" fn(ctx: *const c_void) -> *mut c_void>,
    pub start: Option<unsafe extern "C" fn(data: *mut c_void) -> c_int>,
    pub stop: Option<unsafe extern "C" fn(data: *mut c_void)>,
    pub destroy: Option<unsafe extern "C" fn(data: *mut c_void)>,
}

/// Instance pointer returned by a native `create` function
#[derive(Debug)]
pub struct NativeInstance(*mut c_void);

// The pointer is owned by the plugin; the engine only passes it back to the
// plugin's own hooks.
unsafe impl Send for NativeInstance {}
unsafe impl Sync for NativeInstance {}

impl NativeInstance {
    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

struct UnsafeFuncsPtr(*const RawRuntimeFuncs);
unsafe impl Send for UnsafeFuncsPtr {}
unsafe impl Sync for UnsafeFuncsPtr {}

/// [`PluginRuntime`] calling through a [`RawRuntimeFuncs`] table
pub struct NativeRuntime {
    name: String,
    funcs: UnsafeFuncsPtr,
    /// Keeps the library mapped while the table is in use
    _library: Option<Arc<Library>>,
}

impl NativeRuntime {
    /// # Safety
    ///
    /// `funcs` must point to a valid function table that outlives the runtime,
    /// which `library` keeps mapped when given.
    pub unsafe fn new(name: &str, funcs: *const RawRuntimeFuncs, library: Option<Arc<Library>>) -> Self {
        Self {
            name: name.to_string(),
            funcs: UnsafeFuncsPtr(funcs),
            _library: library,
        }
    }

    /// Runtime over a table linked into the host program.
    pub fn from_static(name: &str, funcs: &'static RawRuntimeFuncs) -> Self {
        // Safety: a static table lives for the whole program.
        unsafe { Self::new(name, funcs, None) }
    }

    fn funcs(&self) -> &RawRuntimeFuncs {
        // Safety: guaranteed by the constructor contract.
        unsafe { &*self.funcs.0 }
    }

    fn native_ptr(instance: &InstanceData) -> *mut c_void {
        instance
            .downcast_ref::<NativeInstance>()
            .map_or(std::ptr::null_mut(), NativeInstance::as_ptr)
    }
}

impl PluginRuntime for NativeRuntime {
    fn create(&self, ctx: &Context) -> Result<InstanceData, String> {
        let Some(create) = self.funcs().create else {
            return Ok(Arc::new(NativeInstance(std::ptr::null_mut())));
        };
        let ctx_ptr = ctx as *const Context as *const c_void;
        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { create(ctx_ptr) }));
        match result {
            Ok(ptr) if ptr.is_null() => Err(format!("'{}' create function returned no instance", self.name)),
            Ok(ptr) => Ok(Arc::new(NativeInstance(ptr))),
            Err(_) => Err(format!("'{}' create function panicked", self.name)),
        }
    }

    fn has_start(&self) -> bool {
        self.funcs().start.is_some()
    }

    fn start(&self, instance: &InstanceData) -> Result<(), String> {
        let Some(start) = self.funcs().start else {
            return Ok(());
        };
        let data = Self::native_ptr(instance);
        match panic::catch_unwind(AssertUnwindSafe(|| unsafe { start(data) })) {
            Ok(0) => Ok(()),
            Ok(status) => Err(format!("'{}' start function returned {}", self.name, status)),
            Err(_) => Err(format!("'{}' start function panicked", self.name)),
        }
    }

    fn has_stop(&self) -> bool {
        self.funcs().stop.is_some()
    }

    fn stop(&self, instance: &InstanceData) {
        if let Some(stop) = self.funcs().stop {
            let data = Self::native_ptr(instance);
            if panic::catch_unwind(AssertUnwindSafe(|| unsafe { stop(data) })).is_err() {
                log::error!("'{}' stop function panicked", self.name);
            }
        }
    }

    fn destroy(&self, instance: InstanceData) {
        if let Some(destroy) = self.funcs().destroy {
            let data = Self::native_ptr(&instance);
            if panic::catch_unwind(AssertUnwindSafe(|| unsafe { destroy(data) })).is_err() {
                log::error!("'{}' destroy function panicked", self.name);
            }
        }
    }
}
