//! api error handling for http handlers.
//!
//! every error becomes a structured json body:
//! `{"code": "<CamelCase>", "message": "...", "errors": [{field, code, message}]?}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

/// a single field-level validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    /// name of the offending field.
    pub field: String,
    /// machine-readable code ("missing", "invalid", ...).
    pub code: String,
    /// human-readable detail.
    pub message: String,
}

impl FieldError {
    /// a missing required field.
    pub fn missing(field: &str) -> Self {
        Self {
            field: field.to_string(),
            code: "missing".to_string(),
            message: format!("{} is required", field),
        }
    }

    /// an invalid field value.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            code: "invalid".to_string(),
            message: message.into(),
        }
    }
}

/// api error type for handler responses.
#[derive(Debug)]
pub enum ApiError {
    /// one or more fields failed validation (422).
    InvalidParams(Vec<FieldError>),
    /// a required parameter could not be supplied or derived (422).
    MissingParameter(Vec<FieldError>),
    /// an update touched an immutable field (409).
    InvalidUpdate(String),
    /// the requested action is not allowed from the entity's current state,
    /// or its fleet-wide preconditions do not hold (409).
    InvalidAction(String),
    /// a unique index was violated (409).
    Duplicate(String),
    /// an etag-conditional write lost a race; retryable (409).
    Conflict(String),
    /// entity not found (404).
    NotFound(String),
    /// signature verification failed (401).
    Unauthorized(String),
    /// the entity's state forbids the operation (412).
    PreconditionFailed(String),
    /// an unfinished transition of the same name already exists (409).
    ///
    /// the companion body carries the existing transition and configuration
    /// so the caller can observe progress instead of retrying blindly.
    TransitionAlreadyExists {
        /// serialized existing transition.
        transition: serde_json::Value,
        /// serialized configuration.
        configuration: serde_json::Value,
    },
    /// anything else (500). the cause is logged, never sent to the client.
    Internal(String),
}

impl ApiError {
    /// create an internal server error from any error type.
    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self::Internal(e.to_string())
    }

    /// create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// create an unauthorized error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// single-field invalid-params shorthand.
    pub fn invalid_param(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidParams(vec![FieldError::invalid(field, message)])
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, errors) = match &self {
            ApiError::InvalidParams(errs) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "InvalidParameters",
                "request parameters failed validation".to_string(),
                Some(errs.clone()),
            ),
            ApiError::MissingParameter(errs) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "MissingParameter",
                "a required parameter is missing".to_string(),
                Some(errs.clone()),
            ),
            ApiError::InvalidUpdate(msg) => (
                StatusCode::CONFLICT,
                "InvalidUpdate",
                msg.clone(),
                None,
            ),
            ApiError::InvalidAction(msg) => (
                StatusCode::CONFLICT,
                "InvalidAction",
                msg.clone(),
                None,
            ),
            ApiError::Duplicate(msg) => {
                (StatusCode::CONFLICT, "Duplicate", msg.clone(), None)
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", msg.clone(), None),
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "ResourceNotFound", msg.clone(), None)
            }
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "Unauthorized", msg.clone(), None)
            }
            ApiError::PreconditionFailed(msg) => (
                StatusCode::PRECONDITION_FAILED,
                "PreconditionFailed",
                msg.clone(),
                None,
            ),
            ApiError::TransitionAlreadyExists {
                transition,
                configuration,
            } => {
                let body = json!({
                    "code": "TransitionAlreadyExists",
                    "message": "an unfinished transition of this name already exists",
                    "transition": transition,
                    "configuration": configuration,
                });
                return (StatusCode::CONFLICT, Json(body)).into_response();
            }
            ApiError::Internal(cause) => {
                tracing::error!(cause = %cause, "internal error serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "internal error".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({ "code": code, "message": message });
        if let Some(errors) = errors {
            body["errors"] = serde_json::to_value(errors).unwrap_or_default();
        }
        (status, Json(body)).into_response()
    }
}

impl From<keywarden_db::Error> for ApiError {
    fn from(e: keywarden_db::Error) -> Self {
        match e {
            keywarden_db::Error::Duplicate(msg) => Self::Duplicate(msg),
            keywarden_db::Error::Conflict(msg) => Self::Conflict(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
