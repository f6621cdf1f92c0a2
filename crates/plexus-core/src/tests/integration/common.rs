#![cfg(test)]

use std::sync::{Arc, Mutex};

use crate::context::Context;
use crate::kernel::fatal::set_fatal_error_handler;
use crate::plugin_system::descriptor::{DescriptorBuilder, PluginDescriptor};
use crate::plugin_system::loader::{StaticLibrary, StaticLoader};
use crate::plugin_system::traits::{InstanceData, PluginRuntime};

/// Ordered record of the hooks run in one test, e.g. `"start:alpha"`
pub type Journal = Arc<Mutex<Vec<String>>>;

type StartHook = Arc<dyn Fn(&Context) -> Result<(), String> + Send + Sync>;
type StopHook = Arc<dyn Fn(&Context) + Send + Sync>;

/// Symbol name under which test libraries export their runtime
pub const RUNTIME_FUNCS: &str = "runtime";

/// Instance data created by [`TestRuntime`]
pub struct TestInstance {
    pub ctx: Context,
}

/// Runtime recording every hook into a journal, with optional start and
/// stop behaviour supplied by the test.
#[derive(Clone)]
pub struct TestRuntime {
    name: String,
    journal: Journal,
    on_start: Option<StartHook>,
    on_stop: Option<StopHook>,
    has_stop: bool,
}

impl TestRuntime {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: Arc::clone(journal),
            on_start: None,
            on_stop: None,
            has_stop: true,
        }
    }

    pub fn on_start(mut self, hook: impl Fn(&Context) -> Result<(), String> + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    pub fn on_stop(mut self, hook: impl Fn(&Context) + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(hook));
        self
    }

    pub fn failing_start(self, message: &str) -> Self {
        let message = message.to_string();
        self.on_start(move |_| Err(message.clone()))
    }

    pub fn without_stop(mut self) -> Self {
        self.has_stop = false;
        self
    }

    fn record(&self, hook: &str) {
        self.journal.lock().unwrap().push(format!("{}:{}", hook, self.name));
    }
}

pub fn instance_context(instance: &InstanceData) -> Context {
    instance.downcast_ref::<TestInstance>().expect("test instance").ctx.clone()
}

impl PluginRuntime for TestRuntime {
    fn create(&self, ctx: &Context) -> Result<InstanceData, String> {
        self.record("create");
        Ok(Arc::new(TestInstance { ctx: ctx.clone() }))
    }

    fn start(&self, instance: &InstanceData) -> Result<(), String> {
        self.record("start");
        match &self.on_start {
            Some(hook) => hook(&instance_context(instance)),
            None => Ok(()),
        }
    }

    fn has_stop(&self) -> bool {
        self.has_stop
    }

    fn stop(&self, instance: &InstanceData) {
        self.record("stop");
        if let Some(hook) = &self.on_stop {
            hook(&instance_context(instance));
        }
    }

    fn destroy(&self, _instance: InstanceData) {
        self.record("destroy");
    }
}

/// Make contract violations panic so tests can observe them.
pub fn panic_on_fatal() {
    fn raise(message: &str) {
        panic!("fatal: {}", message);
    }
    set_fatal_error_handler(Some(raise));
}

/// An environment whose loader serves the given runtimes, each from a
/// library named after its plugin.
pub struct TestWorld {
    pub ctx: Context,
    pub journal: Journal,
    destroyed: bool,
}

impl TestWorld {
    pub fn new(journal: &Journal, runtimes: Vec<TestRuntime>) -> Self {
        Self::with_libraries(journal, runtimes, Vec::new())
    }

    pub fn with_libraries(journal: &Journal, runtimes: Vec<TestRuntime>, libraries: Vec<(&str, StaticLibrary)>) -> Self {
        panic_on_fatal();
        let mut loader = StaticLoader::new();
        for runtime in runtimes {
            let name = runtime.name.clone();
            loader.register(&name, StaticLibrary::new().with_runtime(RUNTIME_FUNCS, Arc::new(runtime)));
        }
        for (name, library) in libraries {
            loader.register(name, library);
        }
        let ctx = Context::builder().loader(loader).build();
        Self {
            ctx,
            journal: Arc::clone(journal),
            destroyed: false,
        }
    }

    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.ctx.destroy();
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }

    /// Install a descriptor, panicking on failure
    pub fn install(&self, builder: DescriptorBuilder) -> Arc<PluginDescriptor> {
        let descriptor = Arc::new(builder.build());
        self.ctx.install_plugin(&descriptor).expect("install");
        descriptor
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.destroy();
        }
    }
}

/// Descriptor of a plugin with a runtime served by [`TestWorld`]
pub fn plugin(id: &str) -> DescriptorBuilder {
    DescriptorBuilder::new(id).version("1.0.0").runtime(id, Some(RUNTIME_FUNCS))
}

/// Descriptor of a plugin without a runtime library
pub fn passive_plugin(id: &str) -> DescriptorBuilder {
    DescriptorBuilder::new(id).version("1.0.0")
}

pub fn new_journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}
