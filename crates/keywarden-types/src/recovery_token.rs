//! recovery token type - the per-piv chain of shared unlock secrets.
//!
//! every (piv token, recovery configuration) pair owns an ordered chain of
//! recovery tokens. a token's position in its lifecycle is carried by the
//! `staged` / `activated` / `expired` timestamps; the storage layer enforces
//! the cross-sibling invariants (at most one staged, at most one active)
//! atomically with every state change.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Guid, RecoveryConfiguration, TransitionName, hash_uuid};

/// number of random bytes in a generated token body.
pub const TOKEN_LEN: usize = 40;

/// a single recovery token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryToken {
    /// identifier derived by hashing the token body (see [`hash_uuid`]).
    pub uuid: Uuid,

    /// guid of the owning piv token.
    pub pivtoken: Guid,

    /// uuid of the recovery configuration this token belongs to.
    pub recovery_configuration: Uuid,

    /// the opaque token body, stored hex on the wire.
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,

    /// when this token was created.
    pub created: DateTime<Utc>,

    /// when this token was staged on its compute node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<DateTime<Utc>>,

    /// when this token was activated on its compute node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated: Option<DateTime<Utc>>,

    /// when this token was expired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<DateTime<Utc>>,

    /// storage etag for optimistic concurrency. not part of the wire format.
    #[serde(skip)]
    pub etag: String,
}

impl RecoveryToken {
    /// generate a fresh token for a (piv token, configuration) pair.
    ///
    /// the body is 40 uniformly random bytes. `staged` and `activated` are
    /// copied from the configuration's state at the instant of creation so a
    /// token minted under an already-active configuration is born active.
    pub fn generate(
        pivtoken: Guid,
        configuration: &RecoveryConfiguration,
        now: DateTime<Utc>,
    ) -> Self {
        let mut token = vec![0u8; TOKEN_LEN];
        rand::thread_rng().fill_bytes(&mut token);
        Self {
            uuid: hash_uuid(&token),
            pivtoken,
            recovery_configuration: configuration.uuid,
            token,
            created: now,
            staged: configuration.staged,
            activated: configuration.activated,
            expired: None,
            etag: String::new(),
        }
    }

    /// hex encoding of the token body (the stored representation).
    pub fn token_hex(&self) -> String {
        hex::encode(&self.token)
    }

    /// whether the token has been expired.
    pub fn is_expired(&self) -> bool {
        self.expired.is_some()
    }

    /// staged and not expired.
    pub fn is_staged(&self) -> bool {
        self.staged.is_some() && self.expired.is_none()
    }

    /// activated and not expired.
    pub fn is_active(&self) -> bool {
        self.activated.is_some() && self.expired.is_none()
    }

    /// token created but never staged, activated or expired.
    ///
    /// such a token is superseded (atomically expired) when a newer sibling
    /// is created for the same piv token.
    pub fn is_unused(&self) -> bool {
        self.staged.is_none() && self.activated.is_none() && self.expired.is_none()
    }

    /// whether this token already satisfies the target state of a transition.
    ///
    /// used by the orchestrator to short-circuit targets a previous
    /// (crashed or re-issued) run already completed.
    pub fn satisfies(&self, name: TransitionName) -> bool {
        match name {
            TransitionName::Stage => self.staged.is_some(),
            TransitionName::Activate => self.staged.is_some() && self.activated.is_some(),
            TransitionName::Deactivate => self.staged.is_some() && self.activated.is_none(),
            TransitionName::Unstage => self.staged.is_none(),
        }
    }
}

/// newest token in a chain by `created` ordering.
///
/// chains are short (one entry per rotation) so a linear scan is fine; the
/// point is that selection is by timestamp, never by storage position.
pub fn newest_token(tokens: &[RecoveryToken]) -> Option<&RecoveryToken> {
    tokens.iter().max_by_key(|t| t.created)
}

/// newest token whose `expired` is unset.
///
/// this is the hmac key for piv-token replacement: an expired token is never
/// a valid key.
pub fn newest_unexpired_token(tokens: &[RecoveryToken]) -> Option<&RecoveryToken> {
    tokens
        .iter()
        .filter(|t| t.expired.is_none())
        .max_by_key(|t| t.created)
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecoveryConfiguration;

    fn test_config() -> RecoveryConfiguration {
        RecoveryConfiguration::from_template("AAAA==", Utc::now()).unwrap()
    }

    fn test_guid() -> Guid {
        "97496DD1C8F053DE7450CD854D9C95B4".parse().unwrap()
    }

    #[test]
    fn test_generate_token_body() {
        let cfg = test_config();
        let token = RecoveryToken::generate(test_guid(), &cfg, Utc::now());
        assert_eq!(token.token.len(), TOKEN_LEN);
        assert_eq!(token.uuid, hash_uuid(&token.token));
        assert_eq!(token.uuid.get_version_num(), 5);
        assert!(token.is_unused());
    }

    #[test]
    fn test_generate_copies_configuration_state() {
        let mut cfg = test_config();
        cfg.elevate();
        let token = RecoveryToken::generate(test_guid(), &cfg, Utc::now());
        assert_eq!(token.staged, cfg.staged);
        assert_eq!(token.activated, cfg.activated);
        assert!(token.is_active());
    }

    #[test]
    fn test_satisfies_transition_targets() {
        let cfg = test_config();
        let mut token = RecoveryToken::generate(test_guid(), &cfg, Utc::now());

        assert!(token.satisfies(TransitionName::Unstage));
        assert!(!token.satisfies(TransitionName::Stage));

        token.staged = Some(Utc::now());
        assert!(token.satisfies(TransitionName::Stage));
        assert!(token.satisfies(TransitionName::Deactivate));
        assert!(!token.satisfies(TransitionName::Activate));

        token.activated = Some(Utc::now());
        assert!(token.satisfies(TransitionName::Activate));
        assert!(!token.satisfies(TransitionName::Deactivate));
    }

    #[test]
    fn test_newest_selection_is_by_created() {
        let cfg = test_config();
        let now = Utc::now();
        let older = RecoveryToken::generate(test_guid(), &cfg, now - chrono::Duration::hours(2));
        let newer = RecoveryToken::generate(test_guid(), &cfg, now);

        // storage order deliberately reversed
        let chain = vec![newer.clone(), older.clone()];
        assert_eq!(newest_token(&chain).unwrap().uuid, newer.uuid);

        // an expired newest token is skipped by the unexpired selector
        let mut expired_newest = newer.clone();
        expired_newest.expired = Some(now);
        let chain = vec![older.clone(), expired_newest];
        assert_eq!(newest_unexpired_token(&chain).unwrap().uuid, older.uuid);
    }

    #[test]
    fn test_token_serializes_as_hex() {
        let cfg = test_config();
        let token = RecoveryToken::generate(test_guid(), &cfg, Utc::now());
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(
            json.get("token").unwrap().as_str().unwrap(),
            token.token_hex()
        );
    }
}
