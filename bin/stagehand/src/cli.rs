use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stagehand_deploy::CONFIG_FILENAME;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(
    author,
    version,
    about = "Deploy, upgrade and administer a multi-contract protocol, one network at a time"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "STAGEHAND_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// Values can be overridden with `STAGEHAND_`-prefixed environment variables,
    /// nested keys separated by `__`.
    #[arg(short, long, alias = "conf", env = "STAGEHAND_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy every component missing from the registry, then grant roles and
    /// wire the newly deployed components.
    Deploy {
        #[command(flatten)]
        network: NetworkArgs,

        /// Verify each created contract with the configured explorer.
        #[arg(long)]
        verify: bool,
    },

    /// Deploy new implementations behind existing proxies.
    Upgrade {
        #[command(flatten)]
        network: NetworkArgs,

        /// Component to upgrade. Repeat for several; defaults to every
        /// upgradeable component.
        #[arg(long = "component", value_name = "NAME")]
        components: Vec<String>,

        /// Verify each new implementation with the configured explorer.
        #[arg(long)]
        verify: bool,
    },

    /// Evaluate the role grant table only.
    Grant {
        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Print the registry entries of a network.
    Status {
        #[command(flatten)]
        network: NetworkArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct NetworkArgs {
    /// Name of the target network, as configured under `[networks.<name>]`.
    #[arg(short, long, env = "STAGEHAND_NETWORK")]
    pub network: String,
}
