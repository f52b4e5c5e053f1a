//! error type for keywarden domain types.

use thiserror::Error;

/// errors produced while parsing or validating domain values.
#[derive(Debug, Error)]
pub enum Error {
    /// a guid was not 32 hex digits.
    #[error("invalid guid: {0}")]
    InvalidGuid(String),

    /// a public key line did not parse as an openssh public key.
    #[error("invalid public key for slot {slot}: {reason}")]
    InvalidPubkey {
        /// the key slot ("9a", "9d" or "9e").
        slot: &'static str,
        /// parser error text.
        reason: String,
    },

    /// the required 9e authentication key was missing or empty.
    #[error("missing 9e public key")]
    MissingAuthKey,

    /// a recovery configuration template was empty after newline stripping.
    #[error("empty recovery configuration template")]
    EmptyTemplate,

    /// an unrecognized recovery configuration action.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// an unrecognized transition name.
    #[error("invalid transition name: {0}")]
    InvalidTransitionName(String),
}
