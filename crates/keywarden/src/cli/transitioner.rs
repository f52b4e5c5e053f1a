//! the `transitioner` subcommand - runs the orchestrator worker and pruner

use clap::Args;
use color_eyre::eyre::{Context, Result};
use tracing::info;
use uuid::Uuid;

use keywarden_db::KeywardenDb;
use keywarden_types::{CnapiConfig, Config};

use crate::node_agent::CnapiClient;
use crate::pruner::Pruner;
use crate::transitioner::Transitioner;

/// run the transition orchestrator worker
#[derive(Args, Debug)]
pub struct TransitionerCommand {
    /// database url (sqlite:// or postgres://)
    #[arg(long, env = "KEYWARDEN_DATABASE_URL")]
    database_url: Option<String>,

    /// base url of the cnapi node-agent proxy
    #[arg(long, default_value = "http://127.0.0.1:80", env = "KEYWARDEN_CNAPI_URL")]
    cnapi_url: String,

    /// poll interval for the run loop and pruner, in seconds
    #[arg(long, default_value_t = 60, env = "KEYWARDEN_POLL_INTERVAL")]
    poll_interval: u64,

    /// retention window for history rows and expired tokens, in seconds
    #[arg(long, default_value_t = 30 * 24 * 60 * 60, env = "KEYWARDEN_HISTORY_DURATION")]
    history_duration: u64,

    /// per-task deadline, in seconds
    #[arg(long, default_value_t = 5 * 60, env = "KEYWARDEN_TASK_TIMEOUT")]
    task_timeout: u64,

    /// identity written into transition locks; random when not given
    #[arg(long, env = "KEYWARDEN_INSTANCE_UUID")]
    instance_uuid: Option<Uuid>,

    /// log level
    #[arg(long, default_value = "info", env = "KEYWARDEN_LOG_LEVEL")]
    log_level: String,
}

impl TransitionerCommand {
    /// convert cli arguments into a Config struct
    fn into_config(self) -> Result<Config> {
        let database = super::database_config(self.database_url)?;

        Ok(Config {
            database,
            cnapi: CnapiConfig {
                url: self.cnapi_url,
            },
            poll_interval_secs: self.poll_interval,
            history_duration_secs: self.history_duration,
            task_timeout_secs: self.task_timeout,
            instance_uuid: self.instance_uuid.unwrap_or_else(Uuid::new_v4),
            ..Default::default()
        })
    }

    /// run the transitioner command
    pub async fn run(self) -> Result<()> {
        super::init_logging(&self.log_level)?;

        info!("starting keywarden transitioner...");

        let config = self.into_config()?;
        info!("Database: {}", config.database.connection_string);
        info!("CNAPI: {}", config.cnapi.url);
        info!("Instance: {}", config.instance_uuid);

        let db = KeywardenDb::new(&config)
            .await
            .context("failed to initialize database")?;
        info!("Database initialized successfully");

        let pruner = Pruner::new(db.clone(), &config);
        let pruner_handle = pruner.spawn();

        let agent = CnapiClient::new(config.cnapi.url.clone());
        let transitioner = Transitioner::new(db, agent, &config);
        let orchestrator_handle = transitioner.spawn();

        // both workers run until the process is stopped
        let _ = tokio::try_join!(pruner_handle, orchestrator_handle);

        Ok(())
    }
}
