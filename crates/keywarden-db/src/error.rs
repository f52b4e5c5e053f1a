//! error type for database operations.

use thiserror::Error;

/// errors returned by the storage layer.
#[derive(Debug, Error)]
pub enum Error {
    /// failed to connect to the database.
    #[error("database connection error: {0}")]
    Connection(String),

    /// failed to run migrations.
    #[error("database migration error: {0}")]
    Migration(String),

    /// a row violated a unique index.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// a conditional write did not match the expected etag.
    ///
    /// callers should re-read and retry; the row was changed underneath them.
    #[error("etag conflict: {0}")]
    Conflict(String),

    /// a stored row could not be decoded into its domain type.
    #[error("invalid stored data: {0}")]
    InvalidData(String),

    /// any other database error.
    #[error("database error: {0}")]
    Database(sea_orm::DbErr),
}

impl From<sea_orm::DbErr> for Error {
    fn from(e: sea_orm::DbErr) -> Self {
        match e.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(detail)) => Self::Duplicate(detail),
            _ => Self::Database(e),
        }
    }
}

impl From<keywarden_types::Error> for Error {
    fn from(e: keywarden_types::Error) -> Self {
        Self::InvalidData(e.to_string())
    }
}
