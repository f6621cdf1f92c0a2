use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use plexus_core::ScanFlags;

/// Plexus: host for native plugin collections
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Host configuration file (JSON, YAML or TOML)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Plugin collection directory, may be repeated
    #[arg(long = "collection", short = 'C', global = true)]
    pub collections: Vec<PathBuf>,

    /// Startup argument made available to plugins, may be repeated
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    pub plugin_args: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the plugins found in the collections
    List,
    /// Install plugins from the collections and report failures
    Scan(ScanArgs),
    /// Print the descriptor of an installed plugin as JSON
    Info {
        /// Plugin identifier
        plugin: String,
    },
    /// Start plugins, report their states and stop them again
    Start {
        /// Plugin identifiers
        #[arg(required = true)]
        plugins: Vec<String>,
    },
    /// Start plugins and drive their run functions until none remain
    Run {
        /// Plugin identifiers, in addition to those in the configuration
        plugins: Vec<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct ScanArgs {
    /// Replace installed plugins with newer versions
    #[arg(long)]
    pub upgrade: bool,
    /// Stop every plugin before the first upgrade
    #[arg(long)]
    pub stop_all_on_upgrade: bool,
    /// Stop every plugin before the first new installation
    #[arg(long)]
    pub stop_all_on_install: bool,
    /// Restart plugins that were active before the scan
    #[arg(long)]
    pub restart_active: bool,
}

impl ScanArgs {
    /// Add the requested flags to the configured ones
    pub fn merge(&self, configured: ScanFlags) -> ScanFlags {
        ScanFlags {
            upgrade: configured.upgrade || self.upgrade,
            stop_all_on_upgrade: configured.stop_all_on_upgrade || self.stop_all_on_upgrade,
            stop_all_on_install: configured.stop_all_on_install || self.stop_all_on_install,
            restart_active: configured.restart_active || self.restart_active,
        }
    }
}
