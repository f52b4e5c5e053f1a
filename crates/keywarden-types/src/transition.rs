//! recovery configuration transition - the durable record of a fan-out.
//!
//! a transition row is created by the fsm gateway and driven by the
//! orchestrator worker. progress (`completed`, `taskids`, `errs`) is
//! persisted at batch boundaries only, so a crashed worker resumes from the
//! last boundary and relies on per-target short-circuiting for idempotence.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// per-target fan-out width used when a request does not name one.
pub const DEFAULT_TRANSITION_CONCURRENCY: u32 = 10;

/// the four fleet-wide operations a transition can carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionName {
    /// write staged key material to every target.
    Stage,
    /// remove staged key material from every target.
    Unstage,
    /// promote staged key material to active on every target.
    Activate,
    /// demote active key material to staged on every target.
    Deactivate,
}

impl FromStr for TransitionName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage" => Ok(Self::Stage),
            "unstage" => Ok(Self::Unstage),
            "activate" => Ok(Self::Activate),
            "deactivate" => Ok(Self::Deactivate),
            other => Err(Error::InvalidTransitionName(other.to_string())),
        }
    }
}

impl fmt::Display for TransitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransitionName::Stage => "stage",
            TransitionName::Unstage => "unstage",
            TransitionName::Activate => "activate",
            TransitionName::Deactivate => "deactivate",
        };
        f.write_str(s)
    }
}

/// a structured per-target error recorded during a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionErr {
    /// compute node the task ran against.
    pub cn_uuid: Uuid,
    /// machine-readable error code.
    pub code: String,
    /// human-readable detail.
    pub message: String,
}

impl TransitionErr {
    /// legacy rows carry empty placeholder objects; those are pruned on read
    /// and never counted as failures.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty() && self.message.is_empty()
    }
}

/// durable record of one fleet-wide fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// primary key.
    pub uuid: Uuid,

    /// the configuration being transitioned.
    pub recovery_config_uuid: Uuid,

    /// which operation this transition performs.
    pub name: TransitionName,

    /// ordered set of target compute-node uuids.
    pub targets: Vec<Uuid>,

    /// targets whose batch has been persisted as processed.
    pub completed: Vec<Uuid>,

    /// node-agent task ids submitted so far.
    pub taskids: Vec<String>,

    /// structured per-target errors.
    pub errs: Vec<TransitionErr>,

    /// batch width for the per-target fan-out.
    pub concurrency: u32,

    /// when set, the configuration is not advanced on completion.
    pub standalone: bool,

    /// activation was forced without every token staged.
    pub forced: bool,

    /// identity of the worker that holds this transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<Uuid>,

    /// when this transition row was created.
    pub created: DateTime<Utc>,

    /// when a worker first picked the transition up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    /// when processing finished (successfully or not).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,

    /// cooperative cancellation flag, observed at batch boundaries.
    pub aborted: bool,

    /// storage etag for optimistic concurrency. not part of the wire format.
    #[serde(skip)]
    pub etag: String,
}

impl Transition {
    /// build a fresh, unstarted transition row.
    pub fn new(
        recovery_config_uuid: Uuid,
        name: TransitionName,
        targets: Vec<Uuid>,
        concurrency: u32,
        standalone: bool,
        forced: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            recovery_config_uuid,
            name,
            targets,
            completed: Vec::new(),
            taskids: Vec::new(),
            errs: Vec::new(),
            concurrency,
            standalone,
            forced,
            locked_by: None,
            created: now,
            started: None,
            finished: None,
            aborted: false,
            etag: String::new(),
        }
    }

    /// targets not yet recorded as completed, in target order.
    pub fn pending(&self) -> Vec<Uuid> {
        let done: HashSet<&Uuid> = self.completed.iter().collect();
        self.targets
            .iter()
            .filter(|t| !done.contains(t))
            .copied()
            .collect()
    }

    /// neither finished nor aborted.
    pub fn is_unfinished(&self) -> bool {
        self.finished.is_none() && !self.aborted
    }

    /// per-target failures, with empty placeholder objects pruned.
    pub fn failures(&self) -> Vec<&TransitionErr> {
        self.errs.iter().filter(|e| !e.is_empty()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(targets: Vec<Uuid>) -> Transition {
        Transition::new(
            Uuid::new_v4(),
            TransitionName::Stage,
            targets,
            DEFAULT_TRANSITION_CONCURRENCY,
            false,
            false,
            Utc::now(),
        )
    }

    #[test]
    fn test_pending_preserves_target_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let mut t = transition(vec![a, b, c]);
        t.completed.push(b);
        assert_eq!(t.pending(), vec![a, c]);
    }

    #[test]
    fn test_unfinished() {
        let mut t = transition(vec![]);
        assert!(t.is_unfinished());
        t.aborted = true;
        assert!(!t.is_unfinished());
        t.aborted = false;
        t.finished = Some(Utc::now());
        assert!(!t.is_unfinished());
    }

    #[test]
    fn test_failures_prunes_empty_placeholders() {
        let mut t = transition(vec![]);
        t.errs.push(TransitionErr {
            cn_uuid: Uuid::new_v4(),
            code: String::new(),
            message: String::new(),
        });
        assert!(t.failures().is_empty());

        t.errs.push(TransitionErr {
            cn_uuid: Uuid::new_v4(),
            code: "TaskFailed".to_string(),
            message: "boom".to_string(),
        });
        assert_eq!(t.failures().len(), 1);
    }

    #[test]
    fn test_name_round_trip() {
        for name in ["stage", "unstage", "activate", "deactivate"] {
            let parsed: TransitionName = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
        assert!("expire".parse::<TransitionName>().is_err());
    }
}
