mod cli;
mod domain;
mod infra;
mod util;
mod workflow;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run(cli::Cli::parse()).await
}
