use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "run-notifier")]
#[command(
    version = env!("CARGO_PKG_VERSION"),
    about = "Delayed, best-effort HTTP notifications for job run lifecycle events",
    disable_version_flag = true,
    disable_help_subcommand = true
)]
pub(crate) struct Args {
    #[command(subcommand)]
    pub(crate) command: Subcommand,

    /// Print version
    #[arg(short, long, action = clap::ArgAction::Version)]
    version: Option<bool>,
}

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Subcommand {
    #[command(subcommand)]
    Server(Server),
    #[command(subcommand)]
    Target(Target),
}

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Server {
    /// Serve the sidecar API and deliver notifications until interrupted
    Run {
        /// Path to the TOML configuration
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Write the default configuration
    GenerateConfig {
        /// Overwrite the destination if it exists
        #[arg(long)]
        overwrite: bool,
        /// Defaults to `run-notifier.toml` in the current directory
        dst: Option<PathBuf>,
    },
}

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Target {
    /// Validate a notification target URI without storing it
    Check {
        #[arg(required(true))]
        uri: String,
    },
    /// Print the persisted notification target
    Get {
        /// Path to the TOML configuration
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Validate and persist a notification target. An empty URI clears it.
    ///
    /// Takes effect on the next `server run`. Use `PUT /v1/target` to
    /// change the target of a running server.
    Set {
        uri: String,
        /// Path to the TOML configuration
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}
