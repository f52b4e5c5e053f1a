//! public key and attestation records for piv tokens.
//!
//! each hardware token carries key pairs in three slots: 9A (card auth),
//! 9D (key management) and 9E (authentication). the server stores the public
//! halves as openssh-format lines; 9E is the key used to authenticate
//! http-signature requests from the token's compute node.

use serde::{Deserialize, Serialize};

use crate::Error;

/// public key record for a piv token.
///
/// the 9e slot is mandatory - it is the authentication key. 9a and 9d are
/// recorded when the node provides them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pubkeys {
    /// 9a card-authentication public key (openssh line).
    #[serde(rename = "9a", skip_serializing_if = "Option::is_none")]
    pub slot_9a: Option<String>,

    /// 9d key-management public key (openssh line).
    #[serde(rename = "9d", skip_serializing_if = "Option::is_none")]
    pub slot_9d: Option<String>,

    /// 9e authentication public key (openssh line).
    #[serde(rename = "9e")]
    pub slot_9e: String,
}

impl Pubkeys {
    /// validate that every present slot holds a well-formed openssh public key line.
    pub fn validate(&self) -> Result<(), Error> {
        for (slot, key) in [
            ("9a", self.slot_9a.as_deref()),
            ("9d", self.slot_9d.as_deref()),
            ("9e", Some(self.slot_9e.as_str())),
        ] {
            let Some(key) = key else { continue };
            if slot == "9e" && key.trim().is_empty() {
                return Err(Error::MissingAuthKey);
            }
            ssh_key::PublicKey::from_openssh(key).map_err(|e| Error::InvalidPubkey {
                slot: match slot {
                    "9a" => "9a",
                    "9d" => "9d",
                    _ => "9e",
                },
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// parse the 9e authentication key.
    pub fn auth_key(&self) -> Result<ssh_key::PublicKey, Error> {
        ssh_key::PublicKey::from_openssh(&self.slot_9e).map_err(|e| Error::InvalidPubkey {
            slot: "9e",
            reason: e.to_string(),
        })
    }
}

/// attestation certificate record for a piv token.
///
/// certificates are opaque to the server; they are stored and returned
/// verbatim. attestation chain validation is out of scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// 9a attestation certificate (pem).
    #[serde(rename = "9a", skip_serializing_if = "Option::is_none")]
    pub slot_9a: Option<String>,

    /// 9d attestation certificate (pem).
    #[serde(rename = "9d", skip_serializing_if = "Option::is_none")]
    pub slot_9d: Option<String>,

    /// 9e attestation certificate (pem).
    #[serde(rename = "9e", skip_serializing_if = "Option::is_none")]
    pub slot_9e: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_ssh_pubkey;

    #[test]
    fn test_valid_pubkeys() {
        let pubkeys = Pubkeys {
            slot_9a: Some(test_ssh_pubkey()),
            slot_9d: Some(test_ssh_pubkey()),
            slot_9e: test_ssh_pubkey(),
        };
        pubkeys.validate().unwrap();
        pubkeys.auth_key().unwrap();
    }

    #[test]
    fn test_9e_only_is_valid() {
        let pubkeys = Pubkeys {
            slot_9a: None,
            slot_9d: None,
            slot_9e: test_ssh_pubkey(),
        };
        pubkeys.validate().unwrap();
    }

    #[test]
    fn test_empty_9e_rejected() {
        let pubkeys = Pubkeys {
            slot_9a: None,
            slot_9d: None,
            slot_9e: "".to_string(),
        };
        assert!(matches!(pubkeys.validate(), Err(Error::MissingAuthKey)));
    }

    #[test]
    fn test_garbage_key_rejected() {
        let pubkeys = Pubkeys {
            slot_9a: Some("not a key".to_string()),
            slot_9d: None,
            slot_9e: test_ssh_pubkey(),
        };
        assert!(matches!(
            pubkeys.validate(),
            Err(Error::InvalidPubkey { slot: "9a", .. })
        ));
    }

    #[test]
    fn test_serde_uses_slot_names() {
        let pubkeys = Pubkeys {
            slot_9a: None,
            slot_9d: None,
            slot_9e: test_ssh_pubkey(),
        };
        let json = serde_json::to_value(&pubkeys).unwrap();
        assert!(json.get("9e").is_some());
        assert!(json.get("9a").is_none());
    }
}
