//! the recovery configuration state machine gateway.
//!
//! an operator action arrives here after routing; the gateway validates it
//! against the configuration's derived state and the fleet-wide
//! preconditions, then either mutates the configuration directly (the
//! trivial `expire` / `reactivate` paths), aborts an unfinished transition
//! (`cancel`), or schedules a [`Transition`] row for the orchestrator.
//! scheduling is all this module does - the fan-out itself runs in the
//! transitioner worker.

use chrono::{DateTime, Utc};

use keywarden_db::{Database, KeywardenDb};
use keywarden_types::{
    ConfigAction, DEFAULT_TRANSITION_CONCURRENCY, Guid, RecoveryConfiguration, Transition,
    TransitionName,
};

use crate::handlers::ApiError;

/// parameters of an operator action request.
#[derive(Debug, Clone, Default)]
pub struct ActionParams {
    /// restrict the fan-out to one piv token's compute node.
    pub pivtoken: Option<Guid>,
    /// allow activation without every token staged / on a target subset.
    pub force: bool,
    /// per-batch fan-out width; defaults to [`DEFAULT_TRANSITION_CONCURRENCY`].
    pub concurrency: Option<u32>,
}

/// what an accepted action resulted in.
#[derive(Debug)]
pub enum ActionOutcome {
    /// a transition row was created; the orchestrator will drive it.
    Scheduled {
        /// the freshly created transition.
        transition: Transition,
    },
    /// the configuration was mutated directly, no fan-out needed.
    Completed {
        /// the updated configuration.
        configuration: RecoveryConfiguration,
    },
    /// the unfinished transition was aborted.
    Cancelled {
        /// the aborted transition.
        transition: Transition,
    },
}

/// apply the staged/activated timestamp change a finished transition
/// implies. shared between the bootstrap path here and the orchestrator's
/// completion path.
pub fn advance_configuration(
    mut config: RecoveryConfiguration,
    name: TransitionName,
    now: DateTime<Utc>,
) -> RecoveryConfiguration {
    match name {
        TransitionName::Stage => config.staged = Some(now),
        TransitionName::Unstage => config.staged = None,
        TransitionName::Activate => config.activated = Some(now),
        TransitionName::Deactivate => config.activated = None,
    }
    config
}

/// validate and execute an operator action on a recovery configuration.
pub async fn run_action(
    db: &KeywardenDb,
    config: RecoveryConfiguration,
    action: ConfigAction,
    params: ActionParams,
) -> Result<ActionOutcome, ApiError> {
    let state = config.state();
    let now = Utc::now();

    if !state.allows(action) {
        return Err(ApiError::InvalidAction(format!(
            "cannot {} a configuration in state {}",
            action, state
        )));
    }

    match action {
        // cancel aborts the one unfinished transition without touching the
        // configuration's derived state
        ConfigAction::Cancel => {
            let Some(mut transition) = db.find_unfinished_transition(config.uuid).await? else {
                return Err(ApiError::invalid_param(
                    "action",
                    "no unfinished transition to cancel",
                ));
            };
            transition.aborted = true;
            let transition = db.put_transition(&transition).await?;
            tracing::info!(
                config = %config.uuid,
                transition = %transition.uuid,
                "cancelled transition"
            );
            Ok(ActionOutcome::Cancelled { transition })
        }

        // trivial state changes mutate the configuration and its recovery
        // tokens directly - no transition row
        ConfigAction::Expire => {
            let configuration = db.expire_recovery_configuration(&config, now).await?;
            tracing::info!(config = %configuration.uuid, "expired recovery configuration");
            Ok(ActionOutcome::Completed { configuration })
        }
        ConfigAction::Reactivate => {
            let configuration = db.reactivate_recovery_configuration(&config).await?;
            tracing::info!(config = %configuration.uuid, "reactivated recovery configuration");
            Ok(ActionOutcome::Completed { configuration })
        }

        ConfigAction::Destroy => {
            // the delete route calls the store directly after the allow-list
            // check; destroy never reaches scheduling
            Err(ApiError::invalid_param("action", "unsupported action"))
        }

        ConfigAction::Stage
        | ConfigAction::Unstage
        | ConfigAction::Activate
        | ConfigAction::Deactivate => {
            let name = match action {
                ConfigAction::Stage => TransitionName::Stage,
                ConfigAction::Unstage => TransitionName::Unstage,
                ConfigAction::Activate => TransitionName::Activate,
                _ => TransitionName::Deactivate,
            };
            schedule(db, config, name, params, now).await
        }
    }
}

/// schedule a fan-out transition after checking fleet-wide preconditions.
async fn schedule(
    db: &KeywardenDb,
    config: RecoveryConfiguration,
    name: TransitionName,
    params: ActionParams,
    now: DateTime<Utc>,
) -> Result<ActionOutcome, ApiError> {
    // a second identical request observes the in-flight transition instead
    // of scheduling a duplicate
    if let Some(existing) = db.find_unfinished_transition_named(config.uuid, name).await? {
        return Err(ApiError::TransitionAlreadyExists {
            transition: serde_json::to_value(&existing).unwrap_or_default(),
            configuration: serde_json::to_value(&config).unwrap_or_default(),
        });
    }

    let fleet = db.list_pivtokens().await?;

    let (targets, standalone) = match &params.pivtoken {
        Some(guid) => {
            let Some(piv) = db.get_pivtoken(guid).await? else {
                return Err(ApiError::invalid_param(
                    "pivtoken",
                    format!("pivtoken {} not found", guid),
                ));
            };
            let standalone = fleet.len() != 1;
            if standalone && !(name == TransitionName::Activate && params.force) {
                return Err(ApiError::InvalidAction(
                    "a target subset requires action=activate with force".to_string(),
                ));
            }
            (vec![piv.cn_uuid], standalone)
        }
        None => (fleet.iter().map(|p| p.cn_uuid).collect(), false),
    };

    // every compute node must hold staged key material before the fleet
    // flips to it
    if name == TransitionName::Activate && !params.force {
        let staged = db.count_staged_recovery_tokens(config.uuid).await?;
        if staged < fleet.len() as u64 {
            return Err(ApiError::InvalidAction(format!(
                "only {} of {} recovery tokens staged; use force to override",
                staged,
                fleet.len()
            )));
        }
    }

    let mut transition = Transition::new(
        config.uuid,
        name,
        targets,
        params.concurrency.unwrap_or(DEFAULT_TRANSITION_CONCURRENCY),
        standalone,
        params.force,
        now,
    );

    // empty fleet: nothing to fan out to. the transition is born finished
    // and the configuration advances in the same write - this is how the
    // first configuration bootstraps itself
    if transition.targets.is_empty() {
        transition.started = Some(now);
        transition.finished = Some(now);
        let advanced = advance_configuration(config, name, now);
        let (_, configuration) = db.create_finished_transition(&transition, &advanced).await?;
        tracing::info!(
            config = %configuration.uuid,
            name = %name,
            "transition completed against empty fleet"
        );
        return Ok(ActionOutcome::Completed { configuration });
    }

    let transition = db.create_transition(&transition).await?;
    tracing::info!(
        config = %config.uuid,
        transition = %transition.uuid,
        name = %name,
        targets = transition.targets.len(),
        "scheduled transition"
    );
    Ok(ActionOutcome::Scheduled { transition })
}
