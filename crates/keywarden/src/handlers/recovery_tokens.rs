//! recovery token crud under `/pivtokens/{guid}/recovery-tokens`.
//!
//! every route is signature-authenticated against the owning piv token.
//! responses carry the full records, token bodies included - the caller just
//! proved it holds the hardware (or its recovery token).
//!
//! state updates drive the sibling invariants: staging a token expires the
//! previously staged sibling, activating one expires the previously active
//! sibling, both in the same transaction as the update itself.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;

use keywarden_db::Database;
use keywarden_types::{Guid, PivToken, RecoveryToken, newest_token};

use crate::AppState;
use super::auth::{OptionalSignature, authenticate};
use super::error::ApiError;
use super::validation::{validate_fields_array, validate_guid, validate_iso8601, validate_uuid};

/// fields a recovery token update may touch.
const UPDATABLE_FIELDS: [&str; 3] = ["staged", "activated", "expired"];

async fn load_authenticated(
    state: &AppState,
    guid: &str,
    sig: &OptionalSignature,
) -> Result<PivToken, ApiError> {
    let guid: Guid =
        validate_guid("guid", guid).map_err(|e| ApiError::InvalidParams(vec![e]))?;
    let token = state
        .db
        .get_pivtoken(&guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("pivtoken {} not found", guid)))?;
    authenticate(state, &token, sig.0.as_ref()).await?;
    Ok(token)
}

async fn load_chain_entry(
    state: &AppState,
    piv: &PivToken,
    uuid: &str,
) -> Result<(Vec<RecoveryToken>, RecoveryToken), ApiError> {
    let uuid = validate_uuid("uuid", uuid).map_err(|e| ApiError::InvalidParams(vec![e]))?;
    let chain = state
        .db
        .list_recovery_tokens_for_pivtoken(&piv.guid)
        .await?;
    let token = chain
        .iter()
        .find(|t| t.uuid == uuid)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("recovery token {} not found", uuid)))?;
    Ok((chain, token))
}

/// list a piv token's recovery token chain, `created` ascending.
///
/// `GET /pivtokens/{guid}/recovery-tokens`
pub async fn list(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    sig: OptionalSignature,
) -> Result<Json<Vec<RecoveryToken>>, ApiError> {
    let piv = load_authenticated(&state, &guid, &sig).await?;
    let chain = state
        .db
        .list_recovery_tokens_for_pivtoken(&piv.guid)
        .await?;
    Ok(Json(chain))
}

/// body for recovery token creation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateRecoveryTokenRequest {
    pub recovery_configuration: Option<String>,
}

/// mint a new recovery token for a piv token.
///
/// `POST /pivtokens/{guid}/recovery-tokens`
///
/// an unused predecessor (never staged, activated or expired) is expired in
/// the same transaction.
pub async fn create(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    sig: OptionalSignature,
    Json(req): Json<CreateRecoveryTokenRequest>,
) -> Result<(StatusCode, Json<RecoveryToken>), ApiError> {
    let piv = load_authenticated(&state, &guid, &sig).await?;

    let requested = req
        .recovery_configuration
        .as_deref()
        .map(|v| validate_uuid("recovery_configuration", v))
        .transpose()
        .map_err(|e| ApiError::InvalidParams(vec![e]))?;
    let config = super::pivtokens::resolve_configuration(&state, requested).await?;

    let chain = state
        .db
        .list_recovery_tokens_for_pivtoken(&piv.guid)
        .await?;
    let supersede = newest_token(&chain).filter(|t| t.is_unused());

    // appended chain entries are born bare; the sibling that currently
    // holds the staged/active role keeps it until the fleet moves over
    let mut token = RecoveryToken::generate(piv.guid.clone(), &config, Utc::now());
    if !chain.is_empty() {
        token.staged = None;
        token.activated = None;
    }
    let token = state.db.create_recovery_token(&token, supersede).await?;
    tracing::info!(guid = %piv.guid, uuid = %token.uuid, "created recovery token");

    Ok((StatusCode::CREATED, Json(token)))
}

/// get one recovery token.
///
/// `GET /pivtokens/{guid}/recovery-tokens/{uuid}`
pub async fn show(
    State(state): State<AppState>,
    Path((guid, uuid)): Path<(String, String)>,
    sig: OptionalSignature,
) -> Result<Json<RecoveryToken>, ApiError> {
    let piv = load_authenticated(&state, &guid, &sig).await?;
    let (_, token) = load_chain_entry(&state, &piv, &uuid).await?;
    Ok(Json(token))
}

/// body for recovery token updates: any of `staged`, `activated`, `expired`
/// as an iso-8601 timestamp, or null to clear.
#[derive(Debug, Deserialize)]
pub struct UpdateRecoveryTokenRequest {
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

/// update a recovery token's lifecycle timestamps.
///
/// `PUT /pivtokens/{guid}/recovery-tokens/{uuid}`
pub async fn update(
    State(state): State<AppState>,
    Path((guid, uuid)): Path<(String, String)>,
    sig: OptionalSignature,
    Json(req): Json<UpdateRecoveryTokenRequest>,
) -> Result<Json<RecoveryToken>, ApiError> {
    let piv = load_authenticated(&state, &guid, &sig).await?;
    let (chain, token) = load_chain_entry(&state, &piv, &uuid).await?;

    let names: Vec<String> = req.fields.keys().cloned().collect();
    validate_fields_array("fields", &names, &UPDATABLE_FIELDS)
        .map_err(|e| ApiError::InvalidParams(vec![e]))?;

    let mut updated = token.clone();
    for (field, value) in &req.fields {
        let parsed = match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(
                validate_iso8601(field, s).map_err(|e| ApiError::InvalidParams(vec![e]))?,
            ),
            _ => {
                return Err(ApiError::invalid_param(
                    field,
                    format!("{} must be an iso-8601 timestamp or null", field),
                ));
            }
        };
        match field.as_str() {
            "staged" => updated.staged = parsed,
            "activated" => updated.activated = parsed,
            "expired" => updated.expired = parsed,
            _ => {} // whitelist-checked above
        }
    }

    // sibling invariants: every token that previously held a role this
    // update claims must expire in the same transaction. a single update
    // may claim both roles (staged and activated set together), displacing
    // two siblings at once
    let now = Utc::now();
    let mut siblings: Vec<RecoveryToken> = Vec::new();
    if token.activated.is_none()
        && updated.activated.is_some()
        && let Some(active) = chain.iter().find(|t| t.uuid != token.uuid && t.is_active())
    {
        siblings.push(active.clone());
    }
    if token.staged.is_none()
        && updated.staged.is_some()
        && let Some(staged) = chain
            .iter()
            .find(|t| t.uuid != token.uuid && t.is_staged() && t.activated.is_none())
    {
        siblings.push(staged.clone());
    }

    let updated = if siblings.is_empty() {
        state.db.put_recovery_token(&updated).await?
    } else {
        state
            .db
            .put_recovery_token_expiring_siblings(&updated, &siblings, now)
            .await?
    };
    tracing::debug!(guid = %piv.guid, uuid = %updated.uuid, "updated recovery token");

    Ok(Json(updated))
}

/// delete a recovery token.
///
/// `DELETE /pivtokens/{guid}/recovery-tokens/{uuid}`
pub async fn remove(
    State(state): State<AppState>,
    Path((guid, uuid)): Path<(String, String)>,
    sig: OptionalSignature,
) -> Result<StatusCode, ApiError> {
    let piv = load_authenticated(&state, &guid, &sig).await?;
    let (_, token) = load_chain_entry(&state, &piv, &uuid).await?;

    state.db.delete_recovery_token(&token).await?;
    tracing::info!(guid = %piv.guid, uuid = %token.uuid, "deleted recovery token");
    Ok(StatusCode::NO_CONTENT)
}
