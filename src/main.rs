use clap::Parser;
use cloud_storage::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Probe(args) => cli::probe::run(args).await,
    }
}
