//! piv token endpoints.
//!
//! endpoints:
//! - `GET /pivtokens` - list (public fields)
//! - `POST /pivtokens` - create or refresh a token
//! - `GET /pivtokens/{guid}` - get (public fields)
//! - `PUT /pivtokens/{guid}` - update (cn_uuid only)
//! - `DELETE /pivtokens/{guid}` - delete + archive
//! - `GET /pivtokens/{guid}/pin` - full record including pin
//! - `POST /pivtokens/{guid}/replace` - atomic replacement (hmac-authenticated)
//! - recovery-token crud under `/pivtokens/{guid}/recovery-tokens`

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use keywarden_db::Database;
use keywarden_types::{
    Attestation, Guid, PivToken, Pubkeys, RecoveryConfiguration, RecoveryToken, newest_token,
};

use crate::AppState;
use super::auth::{OptionalSignature, authenticate, authenticate_hmac};
use super::error::{ApiError, FieldError};
use super::recovery_tokens;
use super::validation::{
    finish, validate_guid, validate_iso8601, validate_pagination, validate_pubkeys, validate_uuid,
};

/// recovery token as embedded in public piv token responses: lifecycle
/// timestamps only, never the token body.
#[derive(Debug, Serialize)]
pub struct RecoveryTokenSummary {
    pub uuid: Uuid,
    pub recovery_configuration: Uuid,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<DateTime<Utc>>,
}

impl From<&RecoveryToken> for RecoveryTokenSummary {
    fn from(token: &RecoveryToken) -> Self {
        Self {
            uuid: token.uuid,
            recovery_configuration: token.recovery_configuration,
            created: token.created,
            staged: token.staged,
            activated: token.activated,
            expired: token.expired,
        }
    }
}

/// piv token representation with sensitive fields stripped.
#[derive(Debug, Serialize)]
pub struct PivTokenResponse {
    pub guid: Guid,
    pub cn_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub pubkeys: Pubkeys,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
    pub created: DateTime<Utc>,
    pub recovery_tokens: Vec<RecoveryTokenSummary>,
}

impl PivTokenResponse {
    fn build(token: &PivToken, chain: &[RecoveryToken]) -> Self {
        Self {
            guid: token.guid.clone(),
            cn_uuid: token.cn_uuid,
            serial: token.serial.clone(),
            model: token.model.clone(),
            pubkeys: token.pubkeys.clone(),
            attestation: token.attestation.clone(),
            created: token.created,
            recovery_tokens: chain.iter().map(Into::into).collect(),
        }
    }
}

/// full piv token representation for the authenticated pin endpoint.
/// recovery tokens serialize with their hex bodies here.
#[derive(Debug, Serialize)]
pub struct PivTokenFullResponse {
    pub guid: Guid,
    pub cn_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub pubkeys: Pubkeys,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
    pub pin: String,
    pub created: DateTime<Utc>,
    pub recovery_tokens: Vec<RecoveryToken>,
}

impl PivTokenFullResponse {
    fn build(token: &PivToken, chain: Vec<RecoveryToken>) -> Self {
        Self {
            guid: token.guid.clone(),
            cn_uuid: token.cn_uuid,
            serial: token.serial.clone(),
            model: token.model.clone(),
            pubkeys: token.pubkeys.clone(),
            attestation: token.attestation.clone(),
            pin: token.pin.clone(),
            created: token.created,
            recovery_tokens: chain,
        }
    }
}

/// create the pivtokens router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pivtokens).post(create_pivtoken))
        .route(
            "/{guid}",
            get(get_pivtoken)
                .put(update_pivtoken)
                .delete(delete_pivtoken),
        )
        .route("/{guid}/pin", get(get_pivtoken_pin))
        .route("/{guid}/replace", post(replace_pivtoken))
        .route(
            "/{guid}/recovery-tokens",
            get(recovery_tokens::list).post(recovery_tokens::create),
        )
        .route(
            "/{guid}/recovery-tokens/{uuid}",
            get(recovery_tokens::show)
                .put(recovery_tokens::update)
                .delete(recovery_tokens::remove),
        )
}

/// body accepted by the create and replace endpoints. unknown fields are
/// ignored for forward compatibility.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreatePivTokenRequest {
    pub guid: Option<String>,
    pub cn_uuid: Option<String>,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub pubkeys: Option<serde_json::Value>,
    pub attestation: Option<Attestation>,
    pub pin: Option<String>,
    pub created: Option<String>,
    pub recovery_configuration: Option<String>,
}

/// everything a valid create request pins down.
struct ValidatedCreate {
    guid: Guid,
    cn_uuid: Uuid,
    serial: Option<String>,
    model: Option<String>,
    pubkeys: Pubkeys,
    attestation: Option<Attestation>,
    pin: String,
    created: Option<DateTime<Utc>>,
    recovery_configuration: Option<Uuid>,
}

fn validate_create(req: CreatePivTokenRequest) -> Result<ValidatedCreate, ApiError> {
    let mut errors = Vec::new();

    let guid = match req.guid.as_deref() {
        None => {
            errors.push(FieldError::missing("guid"));
            None
        }
        Some(v) => validate_guid("guid", v).map_err(|e| errors.push(e)).ok(),
    };
    let cn_uuid = match req.cn_uuid.as_deref() {
        None => {
            errors.push(FieldError::missing("cn_uuid"));
            None
        }
        Some(v) => validate_uuid("cn_uuid", v).map_err(|e| errors.push(e)).ok(),
    };
    let pubkeys = match req.pubkeys.as_ref() {
        None => {
            errors.push(FieldError::missing("pubkeys"));
            None
        }
        Some(v) => validate_pubkeys("pubkeys", v)
            .map_err(|e| errors.push(e))
            .ok(),
    };
    if req.pin.is_none() {
        errors.push(FieldError::missing("pin"));
    }
    let created = match req.created.as_deref() {
        None => None,
        Some(v) => validate_iso8601("created", v)
            .map_err(|e| errors.push(e))
            .ok(),
    };
    let recovery_configuration = match req.recovery_configuration.as_deref() {
        None => None,
        Some(v) => validate_uuid("recovery_configuration", v)
            .map_err(|e| errors.push(e))
            .ok(),
    };

    finish(errors)?;

    let (Some(guid), Some(cn_uuid), Some(pubkeys), Some(pin)) =
        (guid, cn_uuid, pubkeys, req.pin)
    else {
        return Err(ApiError::internal("create validation missed a field"));
    };

    Ok(ValidatedCreate {
        guid,
        cn_uuid,
        serial: req.serial,
        model: req.model,
        pubkeys,
        attestation: req.attestation,
        pin,
        created,
        recovery_configuration,
    })
}

/// resolve the recovery configuration a new token should belong to: the
/// caller's explicit choice, or the unique active configuration. a piv token
/// cannot exist without one.
pub(super) async fn resolve_configuration(
    state: &AppState,
    requested: Option<Uuid>,
) -> Result<RecoveryConfiguration, ApiError> {
    match requested {
        Some(uuid) => state
            .db
            .get_recovery_configuration(uuid)
            .await?
            .ok_or_else(|| {
                ApiError::invalid_param(
                    "recovery_configuration",
                    format!("recovery configuration {} not found", uuid),
                )
            }),
        None => state
            .db
            .find_active_recovery_configuration()
            .await?
            .ok_or_else(|| {
                ApiError::MissingParameter(vec![FieldError::missing("recovery_configuration")])
            }),
    }
}

/// query parameters for the list endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    offset: Option<u64>,
    limit: Option<u64>,
}

/// list all piv tokens (public fields).
///
/// `GET /pivtokens`
async fn list_pivtokens(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PivTokenResponse>>, ApiError> {
    let page = validate_pagination(query.offset, query.limit)
        .map_err(|e| ApiError::InvalidParams(vec![e]))?;

    let tokens = state
        .db
        .list_pivtokens_range(page.offset, page.limit)
        .await?;

    let mut out = Vec::with_capacity(tokens.len());
    for token in &tokens {
        let chain = state
            .db
            .list_recovery_tokens_for_pivtoken(&token.guid)
            .await?;
        out.push(PivTokenResponse::build(token, &chain));
    }
    Ok(Json(out))
}

/// create a piv token, or refresh an existing one.
///
/// `POST /pivtokens`
///
/// first-time creation is anonymous (the token introduces itself); repeat
/// creation must be signed by the existing token and either returns the
/// stored row unchanged (fresh recovery token, same configuration) or
/// appends a new recovery token to the chain.
async fn create_pivtoken(
    State(state): State<AppState>,
    sig: OptionalSignature,
    Json(req): Json<CreatePivTokenRequest>,
) -> Result<(StatusCode, Json<PivTokenResponse>), ApiError> {
    let req = validate_create(req)?;
    let now = Utc::now();

    let existing = state.db.get_pivtoken(&req.guid).await?;
    let config = resolve_configuration(&state, req.recovery_configuration).await?;

    let Some(existing) = existing else {
        // first-time provisioning: one transaction writes the token and its
        // first recovery token
        let piv = PivToken {
            guid: req.guid.clone(),
            cn_uuid: req.cn_uuid,
            serial: req.serial,
            model: req.model,
            pubkeys: req.pubkeys,
            attestation: req.attestation,
            pin: req.pin,
            created: req.created.unwrap_or(now),
            etag: String::new(),
        };
        let recovery = RecoveryToken::generate(piv.guid.clone(), &config, now);
        let (piv, recovery) = state.db.create_pivtoken(&piv, &recovery).await?;
        tracing::info!(guid = %piv.guid, cn_uuid = %piv.cn_uuid, "created piv token");
        return Ok((
            StatusCode::CREATED,
            Json(PivTokenResponse::build(&piv, &[recovery])),
        ));
    };

    authenticate(&state, &existing, sig.0.as_ref()).await?;

    let chain = state
        .db
        .list_recovery_tokens_for_pivtoken(&existing.guid)
        .await?;
    let newest = newest_token(&chain);

    let fresh_until = Duration::seconds(state.config.recovery_token_duration_secs as i64);
    let is_fresh = newest.is_some_and(|t| {
        t.recovery_configuration == config.uuid && t.created + fresh_until > now
    });

    if is_fresh {
        return Ok((
            StatusCode::OK,
            Json(PivTokenResponse::build(&existing, &chain)),
        ));
    }

    // stale or re-targeted: append a fresh token, expiring an unused
    // predecessor in the same transaction. an appended token is born bare -
    // the prior entry keeps its staged/active role until the node takes up
    // the new material
    let mut recovery = RecoveryToken::generate(existing.guid.clone(), &config, now);
    recovery.staged = None;
    recovery.activated = None;
    let supersede = newest.filter(|t| t.is_unused());
    state.db.create_recovery_token(&recovery, supersede).await?;
    tracing::info!(guid = %existing.guid, "appended recovery token to chain");

    let chain = state
        .db
        .list_recovery_tokens_for_pivtoken(&existing.guid)
        .await?;
    Ok((
        StatusCode::OK,
        Json(PivTokenResponse::build(&existing, &chain)),
    ))
}

/// get a piv token (public fields).
///
/// `GET /pivtokens/{guid}`
async fn get_pivtoken(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> Result<Json<PivTokenResponse>, ApiError> {
    let guid = validate_guid("guid", &guid).map_err(|e| ApiError::InvalidParams(vec![e]))?;
    let token = state
        .db
        .get_pivtoken(&guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("pivtoken {} not found", guid)))?;
    let chain = state
        .db
        .list_recovery_tokens_for_pivtoken(&token.guid)
        .await?;
    Ok(Json(PivTokenResponse::build(&token, &chain)))
}

/// body for the update endpoint.
#[derive(Debug, Deserialize)]
pub struct UpdatePivTokenRequest {
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

/// update a piv token. only `cn_uuid` is mutable (chassis swap).
///
/// `PUT /pivtokens/{guid}`
async fn update_pivtoken(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    sig: OptionalSignature,
    Json(req): Json<UpdatePivTokenRequest>,
) -> Result<Json<PivTokenResponse>, ApiError> {
    let guid = validate_guid("guid", &guid).map_err(|e| ApiError::InvalidParams(vec![e]))?;
    let token = state
        .db
        .get_pivtoken(&guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("pivtoken {} not found", guid)))?;

    authenticate(&state, &token, sig.0.as_ref()).await?;

    for field in req.fields.keys() {
        if field != "cn_uuid" {
            return Err(ApiError::InvalidUpdate(format!(
                "field {:?} is immutable",
                field
            )));
        }
    }
    let Some(cn_value) = req.fields.get("cn_uuid").and_then(|v| v.as_str()) else {
        return Err(ApiError::invalid_param("cn_uuid", "cn_uuid is required"));
    };
    let cn_uuid =
        validate_uuid("cn_uuid", cn_value).map_err(|e| ApiError::InvalidParams(vec![e]))?;

    let updated = state.db.update_pivtoken_cn(&token, cn_uuid).await?;
    tracing::info!(guid = %updated.guid, cn_uuid = %updated.cn_uuid, "updated piv token cn");

    let chain = state
        .db
        .list_recovery_tokens_for_pivtoken(&updated.guid)
        .await?;
    Ok(Json(PivTokenResponse::build(&updated, &chain)))
}

/// delete a piv token, archiving it into history.
///
/// `DELETE /pivtokens/{guid}`
async fn delete_pivtoken(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    sig: OptionalSignature,
) -> Result<StatusCode, ApiError> {
    let guid = validate_guid("guid", &guid).map_err(|e| ApiError::InvalidParams(vec![e]))?;
    let token = state
        .db
        .get_pivtoken(&guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("pivtoken {} not found", guid)))?;

    authenticate(&state, &token, sig.0.as_ref()).await?;

    state.db.delete_pivtoken(&token).await?;
    tracing::info!(guid = %token.guid, "deleted piv token");
    Ok(StatusCode::NO_CONTENT)
}

/// get the full piv token record, including the pin and recovery token
/// bodies. requires a signature from the token itself.
///
/// `GET /pivtokens/{guid}/pin`
async fn get_pivtoken_pin(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    sig: OptionalSignature,
) -> Result<Json<PivTokenFullResponse>, ApiError> {
    let guid = validate_guid("guid", &guid).map_err(|e| ApiError::InvalidParams(vec![e]))?;
    let token = state
        .db
        .get_pivtoken(&guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("pivtoken {} not found", guid)))?;

    authenticate(&state, &token, sig.0.as_ref()).await?;

    let chain = state
        .db
        .list_recovery_tokens_for_pivtoken(&token.guid)
        .await?;
    Ok(Json(PivTokenFullResponse::build(&token, chain)))
}

/// atomically replace a piv token with a new one.
///
/// `POST /pivtokens/{replaced_guid}/replace`
///
/// the caller proves possession of the replaced token's recovery token via
/// hmac - the old 9e key is gone with the old hardware. the old token is
/// archived and deleted, the new one created with a fresh recovery token,
/// all in one transaction.
async fn replace_pivtoken(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    sig: OptionalSignature,
    Json(req): Json<CreatePivTokenRequest>,
) -> Result<(StatusCode, Json<PivTokenResponse>), ApiError> {
    let replaced_guid =
        validate_guid("guid", &guid).map_err(|e| ApiError::InvalidParams(vec![e]))?;
    let replaced = state
        .db
        .get_pivtoken(&replaced_guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("pivtoken {} not found", replaced_guid)))?;

    authenticate_hmac(&state, &replaced, sig.0.as_ref()).await?;

    let req = validate_create(req)?;
    if req.guid == replaced.guid {
        return Err(ApiError::invalid_param(
            "guid",
            "replacement guid matches the replaced token",
        ));
    }
    if state.db.get_pivtoken(&req.guid).await?.is_some() {
        return Err(ApiError::Duplicate(format!(
            "pivtoken {} already exists",
            req.guid
        )));
    }

    let now = Utc::now();
    let config = resolve_configuration(&state, req.recovery_configuration).await?;

    let new = PivToken {
        guid: req.guid.clone(),
        cn_uuid: req.cn_uuid,
        serial: req.serial,
        model: req.model,
        pubkeys: req.pubkeys,
        attestation: req.attestation,
        pin: req.pin,
        created: req.created.unwrap_or(now),
        etag: String::new(),
    };
    let recovery = RecoveryToken::generate(new.guid.clone(), &config, now);

    let (new, recovery) = state.db.replace_pivtoken(&replaced, &new, &recovery).await?;
    tracing::info!(
        replaced = %replaced.guid,
        replacement = %new.guid,
        "replaced piv token"
    );

    Ok((
        StatusCode::CREATED,
        Json(PivTokenResponse::build(&new, &[recovery])),
    ))
}
