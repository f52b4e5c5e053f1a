//! the `serve` subcommand - runs the http api server

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use keywarden_db::KeywardenDb;
use keywarden_types::Config;

/// run the keywarden api server
#[derive(Args, Debug)]
pub struct ServeCommand {
    /// database url (sqlite:// or postgres://)
    #[arg(long, env = "KEYWARDEN_DATABASE_URL")]
    database_url: Option<String>,

    /// address to listen on
    #[arg(long, default_value = "0.0.0.0:8080", env = "KEYWARDEN_LISTEN_ADDR")]
    listen_addr: String,

    /// name reported in the x-server-name response header
    #[arg(long, default_value = "keywarden", env = "KEYWARDEN_SERVER_NAME")]
    server_name: String,

    /// path to an openssh public key accepted as an operator signature fallback
    #[arg(long, env = "KEYWARDEN_ADMIN_KEY_FILE")]
    admin_key_file: Option<PathBuf>,

    /// freshness window for idempotent piv token re-creates, in seconds
    #[arg(long, default_value_t = 24 * 60 * 60, env = "KEYWARDEN_RECOVERY_TOKEN_DURATION")]
    recovery_token_duration: u64,

    /// log level
    #[arg(long, default_value = "info", env = "KEYWARDEN_LOG_LEVEL")]
    log_level: String,
}

impl ServeCommand {
    /// convert cli arguments into a Config struct
    fn into_config(self) -> Result<Config> {
        let database = super::database_config(self.database_url)?;

        let admin_authorized_key = match &self.admin_key_file {
            None => None,
            Some(path) => {
                let line = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read admin key file: {:?}", path))?;
                let line = line.trim().to_string();
                if line.is_empty() {
                    warn!("admin key file is empty, ignoring");
                    None
                } else {
                    Some(line)
                }
            }
        };

        Ok(Config {
            listen_addr: self.listen_addr,
            server_name: self.server_name,
            database,
            recovery_token_duration_secs: self.recovery_token_duration,
            admin_authorized_key,
            ..Default::default()
        })
    }

    /// run the serve command
    pub async fn run(self) -> Result<()> {
        super::init_logging(&self.log_level)?;

        info!("starting keywarden api server...");

        let config = self.into_config()?;
        info!("Database: {}", config.database.connection_string);
        info!("Listen address: {}", config.listen_addr);

        // ensure parent directory exists for sqlite databases
        if config.database.db_type == "sqlite" {
            let db_path = std::path::Path::new(&config.database.connection_string);
            if let Some(parent) = db_path.parent()
                && !parent.exists()
            {
                info!("Creating database directory: {:?}", parent);
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory: {:?}", parent)
                })?;
            }
        }

        let db = KeywardenDb::new(&config)
            .await
            .context("failed to initialize database")?;
        info!("Database initialized successfully");

        let app = crate::create_app(db, config.clone()).await;

        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .context("invalid listen address")?;

        info!("starting http server on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app).await.context("server error")?;

        Ok(())
    }
}
