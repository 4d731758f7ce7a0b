//! nbci CLI: run the notebooks a change touched and report the results.
//!
//! Detects changed notebooks in a git checkout, strips cells that must not
//! run, fills in project placeholders, and submits each notebook for
//! execution.

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
