mod cli;

use std::process::ExitCode;

use clap::Parser;
use log::{debug, warn};
use plexus_core::{Context, DynamicLoader, EnvironmentConfig, LogSeverity, Result, ScanFlags, StaticLibrary, StaticLoader};
use tracing_subscriber::EnvFilter;

use cli::{CliArgs, Command};

/// Library name of the statically linked sample plugin
const COUNTER_LIBRARY: &str = "counter";
const COUNTER_FUNCS: &str = "counter_runtime";

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Main context whose loader serves the sample plugin from the binary and
/// everything else from shared libraries.
fn create_context() -> Context {
    let builtin = StaticLibrary::new().with_raw_runtime(COUNTER_FUNCS, &counter::counter_runtime);
    let loader = StaticLoader::new()
        .with_library(COUNTER_LIBRARY, builtin)
        .with_fallback(DynamicLoader::new());
    Context::builder().loader(loader).build()
}

fn load_config(args: &CliArgs) -> Result<EnvironmentConfig> {
    let mut config = match &args.config {
        Some(path) => EnvironmentConfig::load(path)?,
        None => EnvironmentConfig::default(),
    };
    config.collections.extend(args.collections.iter().cloned());
    config.args.extend(args.plugin_args.iter().cloned());
    Ok(config)
}

/// Scan, reporting a partial failure without aborting the command.
fn scan_lenient(ctx: &Context, flags: ScanFlags) {
    if let Err(e) = ctx.scan_plugins(flags) {
        warn!("Some plugins could not be installed: {}", e);
        eprintln!("warning: some plugins could not be installed ({})", e);
    }
}

/// Print messages attributed to plugins.
fn echo_plugin_messages(ctx: &Context) {
    ctx.register_logger(LogSeverity::Info, |severity, message, origin| {
        if let Some(plugin) = origin {
            println!("[{}] {}: {}", plugin, severity, message);
        }
    });
}

fn print_states(ctx: &Context, ids: &[String]) {
    for id in ids {
        println!("{}: {}", id, ctx.plugin_state(id));
    }
}

fn list(ctx: &Context) {
    let plugins = ctx.plugins_info();
    if plugins.is_empty() {
        println!("No plugins installed.");
    }
    for descriptor in plugins.iter() {
        let version = descriptor.version.as_ref().map_or_else(|| "-".to_string(), ToString::to_string);
        let name = descriptor.name.as_deref().unwrap_or("");
        println!(
            "{} {} {} {}",
            descriptor.identifier,
            version,
            ctx.plugin_state(&descriptor.identifier),
            name
        );
    }
    ctx.release_info(&plugins);
}

fn info(ctx: &Context, id: &str) -> Result<()> {
    let descriptor = ctx.plugin_info(id)?;
    match serde_json::to_string_pretty(&*descriptor) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize descriptor of '{}': {}", id, e),
    }
    ctx.release_info(&descriptor);
    Ok(())
}

/// Start plugins, driving their run functions when the configuration asks
/// for it.
fn start(ctx: &Context, ids: &[String], drive: bool) -> Result<()> {
    if drive {
        echo_plugin_messages(ctx);
    }
    for id in ids {
        ctx.start_plugin(id)?;
    }
    if drive {
        ctx.run_plugins();
    }
    print_states(ctx, ids);
    ctx.stop_plugins();
    Ok(())
}

fn run_plugins(ctx: &Context, ids: &[String]) -> Result<()> {
    echo_plugin_messages(ctx);
    for id in ids {
        ctx.start_plugin(id)?;
    }
    ctx.run_plugins();
    print_states(ctx, ids);
    ctx.stop_plugins();
    Ok(())
}

fn execute(args: CliArgs) -> Result<()> {
    let config = load_config(&args)?;
    let ctx = create_context();
    config.apply(&ctx)?;
    debug!("Using plugin collections {:?}", ctx.collections());

    let outcome = match &args.command {
        Command::Scan(scan) => ctx.scan_plugins(scan.merge(config.scan)).map(|()| {
            let installed = ctx.plugins_info();
            println!("Installed {} plugin(s).", installed.len());
            ctx.release_info(&installed);
        }),
        Command::List => {
            scan_lenient(&ctx, config.scan);
            list(&ctx);
            Ok(())
        }
        Command::Info { plugin } => {
            scan_lenient(&ctx, config.scan);
            info(&ctx, plugin)
        }
        Command::Start { plugins } => {
            scan_lenient(&ctx, config.scan);
            start(&ctx, plugins, config.run_plugins)
        }
        Command::Run { plugins } => {
            scan_lenient(&ctx, config.scan);
            let mut ids = config.start.clone();
            ids.extend(plugins.iter().cloned());
            run_plugins(&ctx, &ids)
        }
    };
    ctx.destroy();
    outcome
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    match execute(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
