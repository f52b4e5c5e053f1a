//! recovery configuration type and its derived state machine.
//!
//! a recovery configuration is a fleet-wide ebox template describing an
//! n-of-m unlock policy. its lifecycle state is never stored as a column -
//! it is derived from the `created` / `staged` / `activated` / `expired`
//! timestamps, which keeps a single source of truth across crash recovery.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, hash_uuid};

/// a fleet-wide recovery configuration.
///
/// the uuid is derived by hashing the template, so creating the same
/// template twice dedupes to the same row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfiguration {
    /// hash-derived identifier (see [`hash_uuid`]).
    pub uuid: Uuid,

    /// base64 ebox template with newlines stripped. opaque to the server.
    pub template: String,

    /// when this configuration was created.
    pub created: DateTime<Utc>,

    /// when this configuration was staged on the whole fleet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<DateTime<Utc>>,

    /// when this configuration was activated on the whole fleet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated: Option<DateTime<Utc>>,

    /// when this configuration was expired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<DateTime<Utc>>,

    /// storage etag for optimistic concurrency. not part of the wire format.
    #[serde(skip)]
    pub etag: String,
}

impl RecoveryConfiguration {
    /// build a configuration from a raw template body.
    ///
    /// newlines are stripped before hashing so the same template uploaded
    /// with or without trailing newlines yields the same uuid.
    pub fn from_template(raw: &str, now: DateTime<Utc>) -> Result<Self, Error> {
        let template: String = raw.chars().filter(|c| *c != '\n' && *c != '\r').collect();
        if template.is_empty() {
            return Err(Error::EmptyTemplate);
        }
        Ok(Self {
            uuid: hash_uuid(template.as_bytes()),
            template,
            created: now,
            staged: None,
            activated: None,
            expired: None,
            etag: String::new(),
        })
    }

    /// mark this configuration born staged and activated.
    ///
    /// the first configuration in an empty fleet has nothing to fan out to;
    /// it self-elevates with all three timestamps equal.
    pub fn elevate(&mut self) {
        self.staged = Some(self.created);
        self.activated = Some(self.created);
    }

    /// derive the lifecycle state from the timestamp fields.
    pub fn state(&self) -> ConfigState {
        if self.expired.is_some() {
            ConfigState::Expired
        } else if self.staged.is_some() && self.activated.is_some() {
            ConfigState::Active
        } else if self.staged.is_some() {
            ConfigState::Staged
        } else {
            ConfigState::Created
        }
    }

    /// whether this configuration is the fleet's active one.
    pub fn is_active(&self) -> bool {
        self.activated.is_some() && self.expired.is_none()
    }
}

/// derived lifecycle state of a recovery configuration.
///
/// transient states (staging, unstaging, ...) are not represented here -
/// they are inferred from the presence of an unfinished transition row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigState {
    /// persisted but not yet staged anywhere.
    Created,
    /// staged on the whole fleet, not yet active.
    Staged,
    /// active on the whole fleet.
    Active,
    /// expired; kept for history until destroyed.
    Expired,
}

impl ConfigState {
    /// whether `action` may be requested from this state.
    ///
    /// `cancel` is a meta-action on the unfinished transition rather than
    /// the configuration, so it is allowed from any state.
    pub fn allows(self, action: ConfigAction) -> bool {
        use ConfigAction::*;
        use ConfigState::*;
        match action {
            Cancel => true,
            Stage | Destroy if self == Created => true,
            Unstage | Activate if self == Staged => true,
            Deactivate | Expire if self == Active => true,
            Reactivate | Destroy if self == Expired => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigState::Created => "created",
            ConfigState::Staged => "staged",
            ConfigState::Active => "active",
            ConfigState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// an operator-requested action on a recovery configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigAction {
    /// fan the configuration out to the fleet as staged key material.
    Stage,
    /// remove staged key material from the fleet.
    Unstage,
    /// make staged key material active on the fleet.
    Activate,
    /// demote active key material back to staged.
    Deactivate,
    /// expire the configuration and all its recovery tokens.
    Expire,
    /// return an expired configuration to the created state.
    Reactivate,
    /// abort the unfinished transition, if any.
    Cancel,
    /// delete the configuration (used by the delete route's state guard).
    Destroy,
}

impl FromStr for ConfigAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage" => Ok(Self::Stage),
            "unstage" => Ok(Self::Unstage),
            "activate" => Ok(Self::Activate),
            "deactivate" => Ok(Self::Deactivate),
            "expire" => Ok(Self::Expire),
            "reactivate" => Ok(Self::Reactivate),
            "cancel" => Ok(Self::Cancel),
            other => Err(Error::InvalidAction(other.to_string())),
        }
    }
}

impl fmt::Display for ConfigAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigAction::Stage => "stage",
            ConfigAction::Unstage => "unstage",
            ConfigAction::Activate => "activate",
            ConfigAction::Deactivate => "deactivate",
            ConfigAction::Expire => "expire",
            ConfigAction::Reactivate => "reactivate",
            ConfigAction::Cancel => "cancel",
            ConfigAction::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(raw: &str) -> RecoveryConfiguration {
        RecoveryConfiguration::from_template(raw, Utc::now()).unwrap()
    }

    #[test]
    fn test_template_newlines_stripped() {
        let with = config("AAAA==\n");
        let without = config("AAAA==");
        assert_eq!(with.uuid, without.uuid);
        assert_eq!(with.template, "AAAA==");
    }

    #[test]
    fn test_empty_template_rejected() {
        assert!(RecoveryConfiguration::from_template("\n\n", Utc::now()).is_err());
    }

    #[test]
    fn test_state_derivation() {
        let mut cfg = config("AAAA==");
        assert_eq!(cfg.state(), ConfigState::Created);

        cfg.staged = Some(Utc::now());
        assert_eq!(cfg.state(), ConfigState::Staged);

        cfg.activated = Some(Utc::now());
        assert_eq!(cfg.state(), ConfigState::Active);

        cfg.expired = Some(Utc::now());
        assert_eq!(cfg.state(), ConfigState::Expired);
    }

    #[test]
    fn test_elevated_config_is_active() {
        let mut cfg = config("AAAA==");
        cfg.elevate();
        assert_eq!(cfg.state(), ConfigState::Active);
        assert_eq!(cfg.staged, Some(cfg.created));
        assert_eq!(cfg.activated, Some(cfg.created));
    }

    #[test]
    fn test_allow_list() {
        use ConfigAction::*;

        assert!(ConfigState::Created.allows(Stage));
        assert!(ConfigState::Created.allows(Destroy));
        assert!(!ConfigState::Created.allows(Activate));
        assert!(!ConfigState::Created.allows(Expire));

        assert!(ConfigState::Staged.allows(Activate));
        assert!(ConfigState::Staged.allows(Unstage));
        assert!(!ConfigState::Staged.allows(Stage));
        assert!(!ConfigState::Staged.allows(Destroy));

        assert!(ConfigState::Active.allows(Deactivate));
        assert!(ConfigState::Active.allows(Expire));
        assert!(!ConfigState::Active.allows(Destroy));

        assert!(ConfigState::Expired.allows(Reactivate));
        assert!(ConfigState::Expired.allows(Destroy));
        assert!(!ConfigState::Expired.allows(Stage));

        // cancel is a meta-action, always in the allow-list
        for state in [
            ConfigState::Created,
            ConfigState::Staged,
            ConfigState::Active,
            ConfigState::Expired,
        ] {
            assert!(state.allows(Cancel));
        }
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("stage".parse::<ConfigAction>().unwrap(), ConfigAction::Stage);
        assert_eq!(
            "reactivate".parse::<ConfigAction>().unwrap(),
            ConfigAction::Reactivate
        );
        assert!("destroy".parse::<ConfigAction>().is_err()); // only via DELETE
        assert!("bogus".parse::<ConfigAction>().is_err());
    }
}
