//! Sample plexus plugin.
//!
//! Exports the `counter_runtime` function table. When started the plugin
//! defines the `ticks` symbol (an `AtomicU64`) and registers a run function
//! that increments it until the limit given by a `--ticks=<n>` startup
//! argument (default 3) is reached.
use std::ffi::c_void;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, Ordering};

use plexus_core::{Context, LogSeverity, RawRuntimeFuncs, SymbolAddress};

/// Symbol name of the tick counter
pub const TICKS_SYMBOL: &str = "ticks";

const DEFAULT_LIMIT: u64 = 3;

/// Ticks counted by the running instance
pub static TICKS: AtomicU64 = AtomicU64::new(0);

struct Counter {
    ctx: Context,
}

/// Limit requested through the startup arguments
fn tick_limit(args: &[String]) -> u64 {
    args.iter()
        .filter_map(|arg| arg.strip_prefix("--ticks="))
        .filter_map(|value| value.parse().ok())
        .last()
        .unwrap_or(DEFAULT_LIMIT)
}

unsafe extern "C" fn create(ctx: *const c_void) -> *mut c_void {
    if ctx.is_null() {
        return std::ptr::null_mut();
    }
    // Safety: the framework passes its plugin context, valid for this call
    let ctx = (*(ctx as *const Context)).clone();
    Box::into_raw(Box::new(Counter { ctx })) as *mut c_void
}

unsafe extern "C" fn start(data: *mut c_void) -> c_int {
    // Safety: `data` is the pointer returned by `create`
    let counter = &*(data as *const Counter);
    let ctx = counter.ctx.clone();

    TICKS.store(0, Ordering::SeqCst);
    if let Err(e) = ctx.define_symbol(TICKS_SYMBOL, SymbolAddress::of(&TICKS)) {
        ctx.log(LogSeverity::Error, &format!("could not define {}: {}", TICKS_SYMBOL, e));
        return 1;
    }

    let limit = tick_limit(&ctx.args());
    let logger = ctx.clone();
    let registered = ctx.register_run_function(move |_| {
        let ticks = TICKS.fetch_add(1, Ordering::SeqCst) + 1;
        logger.log(LogSeverity::Info, &format!("tick {}/{}", ticks, limit));
        ticks < limit
    });
    match registered {
        Ok(()) => 0,
        Err(e) => {
            ctx.log(LogSeverity::Error, &format!("could not register run function: {}", e));
            1
        }
    }
}

unsafe extern "C" fn stop(data: *mut c_void) {
    // Safety: `data` is the pointer returned by `create`
    let counter = &*(data as *const Counter);
    counter.ctx.log(
        LogSeverity::Info,
        &format!("stopped after {} ticks", TICKS.load(Ordering::SeqCst)),
    );
}

unsafe extern "C" fn destroy(data: *mut c_void) {
    if !data.is_null() {
        // Safety: reclaims the box leaked by `create`
        drop(Box::from_raw(data as *mut Counter));
    }
}

/// Runtime function table of the plugin
#[allow(non_upper_case_globals)]
#[no_mangle]
pub static counter_runtime: RawRuntimeFuncs = RawRuntimeFuncs {
    create: Some(create),
    start: Some(start),
    stop: Some(stop),
    destroy: Some(destroy),
};
