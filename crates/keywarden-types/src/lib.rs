//! core types for keywarden - a PIV token and recovery configuration server.
//!
//! this crate provides the fundamental data structures used throughout keywarden:
//! - [`PivToken`]: a compute node's hardware security token
//! - [`RecoveryToken`]: per-token chain of shared unlock secrets
//! - [`RecoveryConfiguration`]: fleet-wide key-escrow template with a derived state machine
//! - [`Transition`]: durable record of a fleet-wide fan-out
//! - [`Config`]: application configuration

#![warn(missing_docs)]

mod config;
mod error;
mod guid;
mod hash_uuid;
mod pivtoken;
mod pubkeys;
mod recovery_configuration;
mod recovery_token;
pub mod test_utils;
mod transition;

pub use config::{Config, CnapiConfig, DatabaseConfig};
pub use error::Error;
pub use guid::Guid;
pub use hash_uuid::hash_uuid;
pub use pivtoken::{PivToken, PivTokenHistory};
pub use pubkeys::{Attestation, Pubkeys};
pub use recovery_configuration::{ConfigAction, ConfigState, RecoveryConfiguration};
pub use recovery_token::{RecoveryToken, newest_token, newest_unexpired_token};
pub use transition::{
    DEFAULT_TRANSITION_CONCURRENCY, Transition, TransitionErr, TransitionName,
};

/// result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;
