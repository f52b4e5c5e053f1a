//! the transition orchestrator worker.
//!
//! a long-running loop that picks unfinished transitions, fans per-node
//! tasks out in batches of `concurrency`, records progress at batch
//! boundaries, and advances the configuration when every target succeeded.
//!
//! resumability is the point of the design: progress is only persisted per
//! batch, a crashed worker re-attempts its batch's incomplete targets, and
//! targets whose recovery token already matches the transition's goal are
//! short-circuited instead of re-run. cancellation is cooperative - the
//! transition row is re-read at every batch boundary and the `aborted` flag
//! stops processing without rolling back completed targets. the etag-
//! conditional `locked_by` write keeps concurrent orchestrator instances
//! from double-driving one transition.

use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use keywarden_db::{Database, Error as DbError, KeywardenDb};
use keywarden_types::{
    Config, PivToken, RecoveryConfiguration, RecoveryToken, Transition, TransitionErr,
    TransitionName, newest_token,
};

use crate::fsm::advance_configuration;
use crate::node_agent::{NodeAgent, RecoveryTask, TaskStatus};

/// the orchestrator worker.
pub struct Transitioner<A> {
    db: KeywardenDb,
    agent: A,
    instance: Uuid,
    poll_interval: Duration,
    task_timeout: Duration,
}

/// one resolved fan-out target.
struct WorkItem {
    cn: Uuid,
    piv: PivToken,
    token: RecoveryToken,
    chain: Vec<RecoveryToken>,
}

/// per-target outcome of one task round-trip.
struct TargetResult {
    cn: Uuid,
    taskid: Option<String>,
    err: Option<TransitionErr>,
}

impl<A: NodeAgent> Transitioner<A> {
    /// create an orchestrator over a database and node-agent executor.
    pub fn new(db: KeywardenDb, agent: A, config: &Config) -> Self {
        Self {
            db,
            agent,
            instance: config.instance_uuid,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            task_timeout: Duration::from_secs(config.task_timeout_secs),
        }
    }

    /// spawn the run loop. drains pending transitions each tick, then runs
    /// the unused-configuration sweep.
    pub fn spawn(self) -> JoinHandle<()>
    where
        A: 'static,
    {
        tokio::spawn(async move {
            info!(instance = %self.instance, "starting transition orchestrator");
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                loop {
                    match self.run_once().await {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            warn!(error = %e, "transition processing failed");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// pick and process at most one pending transition. returns whether one
    /// was processed.
    pub async fn run_once(&self) -> keywarden_db::Result<bool> {
        let Some(transition) = self.db.next_pending_transition().await? else {
            return Ok(false);
        };
        self.process(transition).await?;
        // a configuration whose tokens have all expired is dead weight;
        // reap it while the fleet state is fresh in mind
        self.expire_unused_recovery_configs().await?;
        Ok(true)
    }

    async fn process(&self, mut transition: Transition) -> keywarden_db::Result<()> {
        let now = Utc::now();

        // a cancelled transition that never got finalized: close it out
        if transition.aborted {
            transition.finished = Some(now);
            match self.db.put_transition(&transition).await {
                Ok(t) => info!(transition = %t.uuid, "finalized aborted transition"),
                Err(DbError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
            return Ok(());
        }

        let Some(config) = self
            .db
            .get_recovery_configuration(transition.recovery_config_uuid)
            .await?
        else {
            warn!(
                transition = %transition.uuid,
                config = %transition.recovery_config_uuid,
                "transition references a deleted configuration; finalizing"
            );
            transition.finished = Some(now);
            let _ = self.db.put_transition(&transition).await;
            return Ok(());
        };

        // resolve pending targets to (piv token, recovery token) pairs
        let pending = transition.pending();
        let fleet = self.db.list_pivtokens_by_cn(&pending).await?;

        let mut work: Vec<WorkItem> = Vec::new();
        let mut skipped: Vec<Uuid> = Vec::new();
        let mut failed: Vec<Uuid> = Vec::new();
        let mut errs: Vec<TransitionErr> = Vec::new();

        for cn in pending {
            let Some(piv) = fleet.iter().find(|p| p.cn_uuid == cn) else {
                errs.push(TransitionErr {
                    cn_uuid: cn,
                    code: "PivtokenNotFound".to_string(),
                    message: format!("no piv token for compute node {}", cn),
                });
                failed.push(cn);
                continue;
            };

            let chain = self.db.list_recovery_tokens_for_pivtoken(&piv.guid).await?;
            let token = match chain
                .iter()
                .filter(|t| t.recovery_configuration == config.uuid && t.expired.is_none())
                .max_by_key(|t| t.created)
            {
                Some(existing) => existing.clone(),
                None => {
                    let fresh = RecoveryToken::generate(piv.guid.clone(), &config, Utc::now());
                    let supersede = newest_token(&chain).filter(|t| t.is_unused()).cloned();
                    self.db
                        .create_recovery_token(&fresh, supersede.as_ref())
                        .await?
                }
            };

            // a target whose token already matches the goal state was
            // handled by an earlier run (or a standalone transition)
            if token.satisfies(transition.name) {
                skipped.push(cn);
                continue;
            }

            work.push(WorkItem {
                cn,
                piv: piv.clone(),
                token,
                chain,
            });
        }

        // take the lock. this conditional put is the contention gate: losing
        // it means another orchestrator instance owns the transition
        transition.locked_by = Some(self.instance);
        if transition.started.is_none() {
            transition.started = Some(now);
        }
        transition.completed.extend(&skipped);
        transition.completed.extend(&failed);
        transition.errs.extend(errs);
        let nothing_left = work.is_empty();
        if nothing_left {
            transition.finished = Some(Utc::now());
        }
        let mut transition = match self.db.put_transition(&transition).await {
            Ok(t) => t,
            Err(DbError::Conflict(_)) => {
                debug!(transition = %transition.uuid, "lost transition lock race");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if nothing_left {
            self.advance(&transition).await?;
            return Ok(());
        }

        // fan out in contiguous batches of `concurrency`; progress persists
        // only at batch boundaries
        let width = transition.concurrency.max(1) as usize;
        for chunk in work.chunks(width) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|item| self.run_target(&config, transition.name, item)),
            )
            .await;

            // the stored row is the authority on cancellation between batches
            let Some(current) = self.db.get_transition(transition.uuid).await? else {
                warn!(transition = %transition.uuid, "transition row vanished mid-run");
                return Ok(());
            };
            let mut updated = current;
            for result in results {
                updated.completed.push(result.cn);
                if let Some(id) = result.taskid {
                    updated.taskids.push(id);
                }
                if let Some(err) = result.err {
                    warn!(
                        transition = %updated.uuid,
                        cn = %err.cn_uuid,
                        code = %err.code,
                        "target failed"
                    );
                    updated.errs.push(err);
                }
            }
            transition = match self.db.put_transition(&updated).await {
                Ok(t) => t,
                Err(DbError::Conflict(_)) => {
                    debug!(transition = %updated.uuid, "transition stolen mid-run");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if transition.aborted {
                // stop without rollback; the next pick finalizes the row
                info!(transition = %transition.uuid, "transition aborted at batch boundary");
                return Ok(());
            }
        }

        transition.finished = Some(Utc::now());
        let transition = match self.db.put_transition(&transition).await {
            Ok(t) => t,
            Err(DbError::Conflict(_)) => {
                // a cancel landed after the last batch; the next pick
                // finalizes the row
                debug!(transition = %transition.uuid, "transition changed before completion");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        info!(
            transition = %transition.uuid,
            completed = transition.completed.len(),
            errors = transition.failures().len(),
            "transition finished"
        );

        self.advance(&transition).await
    }

    /// drive one target: submit the task, wait for it, and on success move
    /// the recovery token into the transition's goal state.
    async fn run_target(
        &self,
        config: &RecoveryConfiguration,
        name: TransitionName,
        item: &WorkItem,
    ) -> TargetResult {
        let task = RecoveryTask {
            action: name,
            pivtoken: item.piv.guid.clone(),
            recovery_uuid: config.uuid,
            template: config.template.clone(),
            token: item.token.token_hex(),
        };

        let taskid = match self.agent.submit_task(item.cn, task).await {
            Ok(id) => id,
            Err(e) => {
                return TargetResult {
                    cn: item.cn,
                    taskid: None,
                    err: Some(TransitionErr {
                        cn_uuid: item.cn,
                        code: "TaskSubmitFailed".to_string(),
                        message: e.to_string(),
                    }),
                };
            }
        };

        let status =
            match tokio::time::timeout(self.task_timeout, self.agent.wait_task(taskid.clone()))
                .await
            {
                Err(_) => {
                    return TargetResult {
                        cn: item.cn,
                        taskid: Some(taskid),
                        err: Some(TransitionErr {
                            cn_uuid: item.cn,
                            code: "TaskTimeout".to_string(),
                            message: format!(
                                "task did not finish within {}s",
                                self.task_timeout.as_secs()
                            ),
                        }),
                    };
                }
                Ok(Err(e)) => {
                    return TargetResult {
                        cn: item.cn,
                        taskid: Some(taskid),
                        err: Some(TransitionErr {
                            cn_uuid: item.cn,
                            code: "TaskWaitFailed".to_string(),
                            message: e.to_string(),
                        }),
                    };
                }
                Ok(Ok(status)) => status,
            };

        let err = match status {
            TaskStatus::Complete => self
                .apply_token_state(name, item)
                .await
                .err()
                .map(|e| TransitionErr {
                    cn_uuid: item.cn,
                    code: "TokenUpdateFailed".to_string(),
                    message: e.to_string(),
                }),
            TaskStatus::Failed(message) => Some(TransitionErr {
                cn_uuid: item.cn,
                code: "TaskFailed".to_string(),
                message,
            }),
        };

        TargetResult {
            cn: item.cn,
            taskid: Some(taskid),
            err,
        }
    }

    /// move a recovery token into the goal state of a transition, expiring
    /// the sibling that previously held the role in the same transaction.
    async fn apply_token_state(
        &self,
        name: TransitionName,
        item: &WorkItem,
    ) -> keywarden_db::Result<()> {
        let now = Utc::now();
        let mut updated = item.token.clone();
        match name {
            TransitionName::Stage => updated.staged = Some(now),
            TransitionName::Unstage => updated.staged = None,
            TransitionName::Activate => {
                if updated.staged.is_none() {
                    updated.staged = Some(now);
                }
                updated.activated = Some(now);
            }
            TransitionName::Deactivate => updated.activated = None,
        }

        // the sibling search spans the piv token's whole chain - the
        // previously active token usually belongs to the outgoing
        // configuration
        let staged_sibling = || {
            item.chain
                .iter()
                .find(|t| t.uuid != item.token.uuid && t.is_staged() && t.activated.is_none())
        };
        let mut siblings: Vec<RecoveryToken> = Vec::new();
        match name {
            TransitionName::Activate => {
                if let Some(active) = item
                    .chain
                    .iter()
                    .find(|t| t.uuid != item.token.uuid && t.is_active())
                {
                    siblings.push(active.clone());
                }
                // a forced activation may stage the token in the same
                // write; that also displaces a staged-but-not-activated
                // sibling
                if item.token.staged.is_none()
                    && let Some(staged) = staged_sibling()
                {
                    siblings.push(staged.clone());
                }
            }
            TransitionName::Stage => {
                if let Some(staged) = staged_sibling() {
                    siblings.push(staged.clone());
                }
            }
            _ => {}
        }

        if siblings.is_empty() {
            self.db.put_recovery_token(&updated).await?;
        } else {
            self.db
                .put_recovery_token_expiring_siblings(&updated, &siblings, now)
                .await?;
        }
        Ok(())
    }

    /// advance the configuration after a finished transition: only when the
    /// transition is fleet-wide and every target succeeded.
    async fn advance(&self, transition: &Transition) -> keywarden_db::Result<()> {
        if transition.standalone || !transition.failures().is_empty() {
            return Ok(());
        }
        let Some(config) = self
            .db
            .get_recovery_configuration(transition.recovery_config_uuid)
            .await?
        else {
            return Ok(());
        };
        let advanced = advance_configuration(config, transition.name, Utc::now());
        match self.db.put_recovery_configuration(&advanced).await {
            Ok(config) => {
                info!(config = %config.uuid, state = %config.state(), "advanced configuration");
                Ok(())
            }
            Err(DbError::Conflict(_)) => {
                warn!(config = %advanced.uuid, "configuration changed during transition");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// expire configurations that are activated-but-unexpired while every
    /// recovery token referencing them is expired. a configuration with no
    /// tokens at all is left alone - that is the freshly bootstrapped case.
    pub async fn expire_unused_recovery_configs(&self) -> keywarden_db::Result<u64> {
        let mut reaped = 0;
        for config in self.db.list_recovery_configurations().await? {
            if !config.is_active() {
                continue;
            }
            let total = self.db.count_recovery_tokens(config.uuid).await?;
            if total == 0 {
                continue;
            }
            let unexpired = self.db.count_unexpired_recovery_tokens(config.uuid).await?;
            if unexpired == 0 {
                match self.db.expire_recovery_configuration(&config, Utc::now()).await {
                    Ok(config) => {
                        info!(config = %config.uuid, "expired unused recovery configuration");
                        reaped += 1;
                    }
                    Err(DbError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(reaped)
    }
}
