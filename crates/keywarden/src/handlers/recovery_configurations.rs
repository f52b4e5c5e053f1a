//! recovery configuration endpoints.
//!
//! endpoints:
//! - `GET /recovery-configurations` - list
//! - `POST /recovery-configurations` - create (dedupes on the hash uuid)
//! - `GET /recovery-configurations/{uuid}` - show; `?action=watch&transition=<name>` polls fan-out progress
//! - `PUT /recovery-configurations/{uuid}?action=...` - drive the state machine
//! - `DELETE /recovery-configurations/{uuid}` - remove (created/expired only)
//! - `GET /recovery-configurations/{uuid}/recovery-tokens` - fleet distribution

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use keywarden_db::Database;
use keywarden_types::{ConfigAction, ConfigState, Guid, RecoveryConfiguration, Transition};

use crate::AppState;
use crate::fsm::{self, ActionOutcome, ActionParams};
use super::error::ApiError;
use super::validation::{validate_guid, validate_uuid};

/// configuration representation with its derived state attached.
#[derive(Debug, Serialize)]
pub struct ConfigurationResponse {
    pub uuid: Uuid,
    pub template: String,
    pub state: ConfigState,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<DateTime<Utc>>,
}

impl From<&RecoveryConfiguration> for ConfigurationResponse {
    fn from(config: &RecoveryConfiguration) -> Self {
        Self {
            uuid: config.uuid,
            template: config.template.clone(),
            state: config.state(),
            created: config.created,
            staged: config.staged,
            activated: config.activated,
            expired: config.expired,
        }
    }
}

/// one row of the fleet distribution view: where one chain entry of this
/// configuration sits.
#[derive(Debug, Serialize)]
pub struct DistributionEntry {
    pub pivtoken: Guid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cn_uuid: Option<Uuid>,
    pub uuid: Uuid,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<DateTime<Utc>>,
}

/// create the recovery configurations router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_configurations).post(create_configuration))
        .route(
            "/{uuid}",
            get(show_configuration)
                .put(configuration_action)
                .delete(delete_configuration),
        )
        .route("/{uuid}/recovery-tokens", get(fleet_distribution))
}

async fn load_configuration(
    state: &AppState,
    uuid: &str,
) -> Result<RecoveryConfiguration, ApiError> {
    let uuid = validate_uuid("uuid", uuid).map_err(|e| ApiError::InvalidParams(vec![e]))?;
    state
        .db
        .get_recovery_configuration(uuid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("recovery configuration {} not found", uuid)))
}

/// list all recovery configurations.
///
/// `GET /recovery-configurations`
async fn list_configurations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConfigurationResponse>>, ApiError> {
    let configs = state.db.list_recovery_configurations().await?;
    Ok(Json(configs.iter().map(Into::into).collect()))
}

/// body for configuration creation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateConfigurationRequest {
    pub template: Option<String>,
}

/// install a recovery configuration template.
///
/// `POST /recovery-configurations`
///
/// the uuid is the hash of the template, so re-posting the same template
/// returns the existing row with 202. a configuration installed into a
/// completely empty fleet (no piv tokens, no configurations) is born staged
/// and activated - there is nothing to fan out to.
async fn create_configuration(
    State(state): State<AppState>,
    Json(req): Json<CreateConfigurationRequest>,
) -> Result<(StatusCode, Json<ConfigurationResponse>), ApiError> {
    let Some(template) = req.template.as_deref() else {
        return Err(ApiError::invalid_param("template", "template is required"));
    };

    let mut config = RecoveryConfiguration::from_template(template, Utc::now())
        .map_err(|e| ApiError::invalid_param("template", e.to_string()))?;

    if let Some(existing) = state.db.get_recovery_configuration(config.uuid).await? {
        return Ok((StatusCode::ACCEPTED, Json((&existing).into())));
    }

    let fleet = state.db.count_pivtokens().await?;
    let configs = state.db.count_recovery_configurations().await?;
    if fleet == 0 && configs == 0 {
        config.elevate();
    }

    match state.db.create_recovery_configuration(&config).await {
        Ok(created) => {
            tracing::info!(uuid = %created.uuid, state = %created.state(), "created recovery configuration");
            Ok((StatusCode::CREATED, Json((&created).into())))
        }
        // raced another identical create; hand back the winner
        Err(keywarden_db::Error::Duplicate(_)) => {
            let existing = state
                .db
                .get_recovery_configuration(config.uuid)
                .await?
                .ok_or_else(|| ApiError::internal("configuration vanished after duplicate"))?;
            Ok((StatusCode::ACCEPTED, Json((&existing).into())))
        }
        Err(e) => Err(e.into()),
    }
}

/// query parameters for the show endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ShowQuery {
    action: Option<String>,
    transition: Option<String>,
}

/// show a configuration, or watch a transition's progress.
///
/// `GET /recovery-configurations/{uuid}`
/// `GET /recovery-configurations/{uuid}?action=watch&transition=<name>`
async fn show_configuration(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<ShowQuery>,
) -> Result<Response, ApiError> {
    let config = load_configuration(&state, &uuid).await?;

    if query.action.as_deref() == Some("watch") {
        let Some(name) = query.transition.as_deref() else {
            return Err(ApiError::invalid_param(
                "transition",
                "transition is required for watch",
            ));
        };
        let name = name
            .parse()
            .map_err(|_| ApiError::invalid_param("transition", "unknown transition name"))?;
        let transition: Transition = state
            .db
            .find_latest_transition(config.uuid, name)
            .await?
            .ok_or_else(|| {
                ApiError::not_found(format!("no {} transition for {}", name, config.uuid))
            })?;
        return Ok(Json(transition).into_response());
    }

    Ok(Json(ConfigurationResponse::from(&config)).into_response())
}

/// query parameters for the action endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActionQuery {
    action: Option<String>,
    pivtoken: Option<String>,
    force: Option<bool>,
    concurrency: Option<u32>,
}

/// drive the configuration state machine.
///
/// `PUT /recovery-configurations/{uuid}?action=stage|unstage|activate|deactivate|expire|reactivate|cancel`
///
/// scheduled actions answer 204 with a `Location` header pointing at the
/// watch url; trivial actions answer 200 with the mutated configuration.
async fn configuration_action(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Query(query): Query<ActionQuery>,
) -> Result<Response, ApiError> {
    let config = load_configuration(&state, &uuid).await?;

    let Some(action) = query.action.as_deref() else {
        return Err(ApiError::invalid_param("action", "action is required"));
    };
    let action: ConfigAction = action
        .parse()
        .map_err(|_| ApiError::invalid_param("action", format!("unknown action {:?}", action)))?;

    let pivtoken = query
        .pivtoken
        .as_deref()
        .map(|v| validate_guid("pivtoken", v))
        .transpose()
        .map_err(|e| ApiError::InvalidParams(vec![e]))?;

    let params = ActionParams {
        pivtoken,
        force: query.force.unwrap_or(false),
        concurrency: query.concurrency,
    };

    match fsm::run_action(&state.db, config, action, params).await? {
        ActionOutcome::Scheduled { transition } => {
            let location = format!(
                "/recovery-configurations/{}?action=watch&transition={}",
                transition.recovery_config_uuid, transition.name
            );
            Ok((
                StatusCode::NO_CONTENT,
                [(header::LOCATION, location)],
            )
                .into_response())
        }
        ActionOutcome::Completed { configuration } => {
            Ok(Json(ConfigurationResponse::from(&configuration)).into_response())
        }
        ActionOutcome::Cancelled { .. } => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// remove a configuration.
///
/// `DELETE /recovery-configurations/{uuid}`
///
/// only configurations in the created or expired state may be removed; a
/// staged or activated configuration answers 412 until it is expired.
async fn delete_configuration(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<StatusCode, ApiError> {
    let config = load_configuration(&state, &uuid).await?;

    if !config.state().allows(ConfigAction::Destroy) {
        return Err(ApiError::PreconditionFailed(format!(
            "cannot delete a configuration in state {}; expire it first",
            config.state()
        )));
    }

    state.db.delete_recovery_configuration(&config).await?;
    tracing::info!(uuid = %config.uuid, "deleted recovery configuration");
    Ok(StatusCode::NO_CONTENT)
}

/// fleet distribution: every recovery token referencing this configuration,
/// joined with the compute node its piv token lives in.
///
/// `GET /recovery-configurations/{uuid}/recovery-tokens`
async fn fleet_distribution(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<Vec<DistributionEntry>>, ApiError> {
    let config = load_configuration(&state, &uuid).await?;

    let tokens = state
        .db
        .list_recovery_tokens_for_configuration(config.uuid)
        .await?;
    let fleet = state.db.list_pivtokens().await?;

    let entries = tokens
        .iter()
        .map(|t| DistributionEntry {
            pivtoken: t.pivtoken.clone(),
            cn_uuid: fleet
                .iter()
                .find(|p| p.guid == t.pivtoken)
                .map(|p| p.cn_uuid),
            uuid: t.uuid,
            created: t.created,
            staged: t.staged,
            activated: t.activated,
            expired: t.expired,
        })
        .collect();

    Ok(Json(entries))
}
