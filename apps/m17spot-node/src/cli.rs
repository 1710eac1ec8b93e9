use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "m17spot-node",
    about = "M17 hotspot node",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Run the hotspot.
    Run(ConfigArgs),
    /// Validate the configuration and host files, then exit.
    #[command(name = "check-config")]
    CheckConfig(ConfigArgs),
}

#[derive(Debug, Args)]
pub(crate) struct ConfigArgs {
    #[arg(long, default_value = "/usr/local/etc/m17spot.json")]
    pub(crate) config: PathBuf,
}
