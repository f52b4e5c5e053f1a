//! pivtoken entity for database storage.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;

use keywarden_types::PivToken;

use crate::SCHEMA_VERSION;

/// pivtoken database model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "pivtokens")]
pub struct Model {
    /// token guid, 32 uppercase hex digits.
    #[sea_orm(primary_key, auto_increment = false)]
    pub guid: String,
    /// compute node uuid, hyphenated lowercase.
    pub cn_uuid: String,
    pub serial: Option<String>,
    pub model: Option<String>,
    /// json-serialized pubkeys record
    #[sea_orm(column_type = "Text")]
    pub pubkeys: String,
    /// json-serialized attestation record
    #[sea_orm(column_type = "Text", nullable)]
    pub attestation: Option<String>,
    pub pin: String,
    pub created: DateTime<Utc>,
    /// schema version
    pub v: i32,
    pub etag: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recovery_token::Entity")]
    RecoveryTokens,
}

impl Related<super::recovery_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecoveryTokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for PivToken {
    type Error = crate::Error;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let attestation = model
            .attestation
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| crate::Error::InvalidData(format!("pivtoken attestation: {e}")))?;

        Ok(PivToken {
            guid: model
                .guid
                .parse()
                .map_err(|e| crate::Error::InvalidData(format!("pivtoken guid: {e}")))?,
            cn_uuid: model
                .cn_uuid
                .parse()
                .map_err(|e| crate::Error::InvalidData(format!("pivtoken cn_uuid: {e}")))?,
            serial: model.serial,
            model: model.model,
            pubkeys: serde_json::from_str(&model.pubkeys)
                .map_err(|e| crate::Error::InvalidData(format!("pivtoken pubkeys: {e}")))?,
            attestation,
            pin: model.pin,
            created: model.created,
            etag: model.etag,
        })
    }
}

impl From<&PivToken> for ActiveModel {
    fn from(token: &PivToken) -> Self {
        let pubkeys =
            serde_json::to_string(&token.pubkeys).unwrap_or_else(|_| "{}".to_string());
        let attestation = token
            .attestation
            .as_ref()
            .map(|a| serde_json::to_string(a).unwrap_or_else(|_| "{}".to_string()));

        ActiveModel {
            guid: Set(token.guid.to_string()),
            cn_uuid: Set(token.cn_uuid.to_string()),
            serial: Set(token.serial.clone()),
            model: Set(token.model.clone()),
            pubkeys: Set(pubkeys),
            attestation: Set(attestation),
            pin: Set(token.pin.clone()),
            created: Set(token.created),
            v: Set(SCHEMA_VERSION),
            etag: Set(token.etag.clone()),
        }
    }
}
