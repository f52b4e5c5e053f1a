//! cli subcommands for keywarden.
//!
//! two long-running processes share this binary:
//! - `keywarden serve` - the http api server
//! - `keywarden transitioner` - the transition orchestrator + pruner

mod serve;
mod transitioner;

pub use serve::ServeCommand;
pub use transitioner::TransitionerCommand;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// keywarden - piv token and recovery configuration control server
#[derive(Parser, Debug)]
#[command(name = "keywarden")]
#[command(about = "PIV token and recovery configuration control server", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// run the http api server
    Serve(ServeCommand),

    /// run the transition orchestrator worker
    Transitioner(TransitionerCommand),
}

/// initialize logging from a level string.
pub(crate) fn init_logging(level: &str) -> Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// parse a database url into the config representation.
pub(crate) fn database_config(
    url: Option<String>,
) -> Result<keywarden_types::DatabaseConfig> {
    use color_eyre::eyre::bail;

    let Some(url) = url else {
        return Ok(keywarden_types::DatabaseConfig::default());
    };
    if url.starts_with("postgres://") {
        Ok(keywarden_types::DatabaseConfig {
            db_type: "postgres".to_string(),
            connection_string: url,
        })
    } else if let Some(path) = url.strip_prefix("sqlite://") {
        Ok(keywarden_types::DatabaseConfig {
            db_type: "sqlite".to_string(),
            connection_string: path.to_string(),
        })
    } else {
        bail!("database URL must start with sqlite:// or postgres://");
    }
}
