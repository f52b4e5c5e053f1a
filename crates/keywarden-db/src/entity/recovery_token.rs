//! recovery token entity for database storage.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;

use keywarden_types::RecoveryToken;

use crate::SCHEMA_VERSION;

/// recovery token database model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "recovery_tokens")]
pub struct Model {
    /// hash-derived uuid, hyphenated lowercase.
    #[sea_orm(primary_key, auto_increment = false)]
    pub uuid: String,
    /// owning pivtoken guid.
    pub pivtoken: String,
    /// owning recovery configuration uuid.
    pub recovery_configuration: String,
    /// token body, hex-encoded.
    pub token: String,
    pub created: DateTime<Utc>,
    pub staged: Option<DateTime<Utc>>,
    pub activated: Option<DateTime<Utc>>,
    pub expired: Option<DateTime<Utc>>,
    /// schema version
    pub v: i32,
    pub etag: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pivtoken::Entity",
        from = "Column::Pivtoken",
        to = "super::pivtoken::Column::Guid"
    )]
    PivToken,
    #[sea_orm(
        belongs_to = "super::recovery_configuration::Entity",
        from = "Column::RecoveryConfiguration",
        to = "super::recovery_configuration::Column::Uuid"
    )]
    RecoveryConfiguration,
}

impl Related<super::pivtoken::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PivToken.def()
    }
}

impl Related<super::recovery_configuration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecoveryConfiguration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for RecoveryToken {
    type Error = crate::Error;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(RecoveryToken {
            uuid: model
                .uuid
                .parse()
                .map_err(|e| crate::Error::InvalidData(format!("recovery token uuid: {e}")))?,
            pivtoken: model
                .pivtoken
                .parse()
                .map_err(|e| crate::Error::InvalidData(format!("recovery token pivtoken: {e}")))?,
            recovery_configuration: model.recovery_configuration.parse().map_err(|e| {
                crate::Error::InvalidData(format!("recovery token configuration: {e}"))
            })?,
            token: hex::decode(&model.token)
                .map_err(|e| crate::Error::InvalidData(format!("recovery token body: {e}")))?,
            created: model.created,
            staged: model.staged,
            activated: model.activated,
            expired: model.expired,
            etag: model.etag,
        })
    }
}

impl From<&RecoveryToken> for ActiveModel {
    fn from(token: &RecoveryToken) -> Self {
        ActiveModel {
            uuid: Set(token.uuid.to_string()),
            pivtoken: Set(token.pivtoken.to_string()),
            recovery_configuration: Set(token.recovery_configuration.to_string()),
            token: Set(token.token_hex()),
            created: Set(token.created),
            staged: Set(token.staged),
            activated: Set(token.activated),
            expired: Set(token.expired),
            v: Set(SCHEMA_VERSION),
            etag: Set(token.etag.clone()),
        }
    }
}
