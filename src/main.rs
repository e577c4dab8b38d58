mod args;
mod command;
mod config;
mod host;
mod init;
mod server;

use crate::args::{Args, Server, Subcommand, Target};
use crate::config::config_holder::ConfigHolder;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    match Args::parse().command {
        Subcommand::Server(Server::Run { config }) => command::server::run(config).await,
        Subcommand::Server(Server::GenerateConfig { overwrite, dst }) => {
            ConfigHolder::generate_default_config(dst, overwrite).await
        }
        Subcommand::Target(Target::Check { uri }) => command::target::check(&uri),
        Subcommand::Target(Target::Get { config }) => command::target::get(config).await,
        Subcommand::Target(Target::Set { uri, config }) => {
            command::target::set(&uri, config).await
        }
    }
}
