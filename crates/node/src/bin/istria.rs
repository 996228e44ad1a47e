//! The Istria node binary.

use clap::Parser;
use istria_node::{telemetry, Node, NodeConfig};
use std::path::PathBuf;

/// Istanbul-BFT blockchain node.
#[derive(Debug, Parser)]
#[command(name = "istria", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "istria.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let cli = Cli::parse();
    let config = NodeConfig::load(&cli.config)?;

    let node = Node::start(config).await?;

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}
