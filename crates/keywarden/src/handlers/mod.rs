//! http handlers for keywarden api endpoints.

mod auth;
mod error;
mod health;
mod pivtokens;
mod recovery_configurations;
mod recovery_tokens;
mod validation;

pub use auth::{AuthMethod, HttpSignature, OptionalSignature, authenticate, authenticate_hmac};
pub use error::{ApiError, FieldError};
pub use health::health;
pub use pivtokens::router as pivtokens_router;
pub use recovery_configurations::router as recovery_configurations_router;
