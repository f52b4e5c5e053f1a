//! piv token type - one per compute node's hardware token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Attestation, Guid, Pubkeys, RecoveryToken};

/// a piv hardware token provisioned on a compute node.
///
/// the guid is the primary key. only `cn_uuid` is mutable after creation
/// (chassis swap); replacing the token itself is an atomic delete+create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivToken {
    /// token guid - 32 uppercase hex digits, unique.
    pub guid: Guid,

    /// compute node this token currently lives in.
    pub cn_uuid: Uuid,

    /// manufacturer serial number, informational.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    /// hardware model, informational.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// public keys for the 9a/9d/9e slots; 9e authenticates requests.
    pub pubkeys: Pubkeys,

    /// optional attestation certificates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,

    /// token pin. returned only on the authenticated pin endpoint.
    pub pin: String,

    /// when this token was first provisioned.
    pub created: DateTime<Utc>,

    /// storage etag for optimistic concurrency. not part of the wire format.
    #[serde(skip)]
    pub etag: String,
}

/// archived copy of a piv token taken at delete time.
///
/// history rows carry the full serialized token plus its recovery tokens so
/// an accidentally deleted token can be restored by an operator. they are
/// pruned once `deleted_at` falls outside the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PivTokenHistory {
    /// guid of the archived token. not unique - a token replaced twice
    /// leaves two rows.
    pub guid: Guid,

    /// the archived token.
    pub token: PivToken,

    /// recovery tokens that belonged to the archived token.
    pub recovery_tokens: Vec<RecoveryToken>,

    /// start of the token's active range (its `created`).
    pub created: DateTime<Utc>,

    /// end of the token's active range; retention queries filter on this.
    pub deleted_at: DateTime<Utc>,
}
