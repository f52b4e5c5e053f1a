//! keywarden - PIV token and recovery configuration control server.
//!
//! manages the lifecycle of per-compute-node hardware security tokens and
//! the fleet-wide recovery configurations used to unlock encrypted storage:
//! - an http api for provisioning and replacing piv tokens
//! - a distributed state machine for recovery configurations
//! - an orchestrator that fans key material out to the fleet

use clap::Parser;
use color_eyre::eyre::Result;
use keywarden::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(cmd) => cmd.run().await,
        Command::Transitioner(cmd) => cmd.run().await,
    }
}
