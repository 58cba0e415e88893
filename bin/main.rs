use clap::Parser;

use ombudsman::cli::Cli;
use ombudsman::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    Cli::parse().execute().await
}
