//! cogreader CLI: sequential cognitive reading of long documents.
//!
//! Reads a hierarchical document section by section, several times over,
//! and writes a structured knowledge artifact for downstream dataset builders.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
