//! test helpers shared across the workspace.
//!
//! not gated behind `cfg(test)` because the db and server crates use these
//! builders from their own tests.

use chrono::Utc;
use uuid::Uuid;

use crate::{Attestation, Guid, PivToken, Pubkeys};

/// generate a fresh openssh ed25519 public key line.
pub fn test_ssh_pubkey() -> String {
    let key = ssh_key::PrivateKey::random(
        &mut ssh_key::rand_core::OsRng,
        ssh_key::Algorithm::Ed25519,
    )
    .expect("generate test key");
    key.public_key()
        .to_openssh()
        .expect("encode test public key")
}

/// a pubkeys record with fresh keys in all three slots.
pub fn test_pubkeys() -> Pubkeys {
    Pubkeys {
        slot_9a: Some(test_ssh_pubkey()),
        slot_9d: Some(test_ssh_pubkey()),
        slot_9e: test_ssh_pubkey(),
    }
}

/// builder for piv tokens in tests.
///
/// `new(n)` derives a deterministic guid from `n` so tests can refer to
/// tokens without carrying the guid around.
pub struct TestPivTokenBuilder {
    guid: Guid,
    cn_uuid: Uuid,
    pin: String,
    serial: Option<String>,
    model: Option<String>,
    pubkeys: Option<Pubkeys>,
    attestation: Option<Attestation>,
}

impl TestPivTokenBuilder {
    /// start a builder with a guid derived from `n`.
    pub fn new(n: u32) -> Self {
        Self {
            guid: format!("{n:032X}").parse().expect("derived guid is valid"),
            cn_uuid: Uuid::new_v4(),
            pin: "123456".to_string(),
            serial: None,
            model: None,
            pubkeys: None,
            attestation: None,
        }
    }

    /// use an explicit guid.
    pub fn with_guid(mut self, guid: &str) -> Self {
        self.guid = guid.parse().expect("test guid is valid");
        self
    }

    /// use an explicit compute node uuid.
    pub fn with_cn_uuid(mut self, cn_uuid: Uuid) -> Self {
        self.cn_uuid = cn_uuid;
        self
    }

    /// use an explicit pubkeys record (e.g. one with a known private half).
    pub fn with_pubkeys(mut self, pubkeys: Pubkeys) -> Self {
        self.pubkeys = Some(pubkeys);
        self
    }

    /// set the informational serial/model fields.
    pub fn with_hardware(mut self, serial: &str, model: &str) -> Self {
        self.serial = Some(serial.to_string());
        self.model = Some(model.to_string());
        self
    }

    /// build the token.
    pub fn build(self) -> PivToken {
        PivToken {
            guid: self.guid,
            cn_uuid: self.cn_uuid,
            serial: self.serial,
            model: self.model,
            pubkeys: self.pubkeys.unwrap_or_else(test_pubkeys),
            attestation: self.attestation,
            pin: self.pin,
            created: Utc::now(),
            etag: String::new(),
        }
    }
}
