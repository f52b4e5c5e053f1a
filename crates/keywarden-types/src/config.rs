//! configuration types for keywarden.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// main configuration for keywarden.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// address to bind the http server to.
    pub listen_addr: String,

    /// name reported in the `x-server-name` response header.
    pub server_name: String,

    /// database configuration.
    pub database: DatabaseConfig,

    /// node-agent executor (cnapi) configuration.
    pub cnapi: CnapiConfig,

    /// orchestrator / pruner poll interval in seconds.
    pub poll_interval_secs: u64,

    /// how long a recovery token stays fresh for idempotent re-creates, in seconds.
    pub recovery_token_duration_secs: u64,

    /// retention window for history rows and expired recovery tokens, in seconds.
    pub history_duration_secs: u64,

    /// deadline for a single node-agent task, in seconds.
    pub task_timeout_secs: u64,

    /// identity this orchestrator instance writes into `locked_by`.
    pub instance_uuid: Uuid,

    /// operator admin public key (openssh line) accepted as a signature
    /// fallback on authenticated routes.
    pub admin_authorized_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            server_name: "keywarden".to_string(),
            database: DatabaseConfig::default(),
            cnapi: CnapiConfig::default(),
            poll_interval_secs: 60,
            recovery_token_duration_secs: 24 * 60 * 60,
            history_duration_secs: 30 * 24 * 60 * 60,
            task_timeout_secs: 5 * 60,
            instance_uuid: Uuid::new_v4(),
            admin_authorized_key: None,
        }
    }
}

/// database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// database type: "sqlite" or "postgres".
    pub db_type: String,

    /// database connection string or file path.
    pub connection_string: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            connection_string: "/var/lib/keywarden/db.sqlite".to_string(),
        }
    }
}

/// node-agent executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CnapiConfig {
    /// base url of the cnapi endpoint that proxies node-agent tasks.
    pub url: String,
}

impl Default for CnapiConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:80".to_string(),
        }
    }
}
