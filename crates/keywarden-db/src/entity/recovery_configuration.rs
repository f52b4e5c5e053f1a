//! recovery configuration entity for database storage.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;

use keywarden_types::RecoveryConfiguration;

use crate::SCHEMA_VERSION;

/// recovery configuration database model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "recovery_configurations")]
pub struct Model {
    /// hash-derived uuid, hyphenated lowercase.
    #[sea_orm(primary_key, auto_increment = false)]
    pub uuid: String,
    /// base64 ebox template, newlines stripped.
    #[sea_orm(column_type = "Text")]
    pub template: String,
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
    #[sea_orm(has_many = "super::recovery_token::Entity")]
    RecoveryTokens,
    #[sea_orm(has_many = "super::transition::Entity")]
    Transitions,
}

impl Related<super::recovery_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecoveryTokens.def()
    }
}

impl Related<super::transition::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transitions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for RecoveryConfiguration {
    type Error = crate::Error;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(RecoveryConfiguration {
            uuid: model.uuid.parse().map_err(|e| {
                crate::Error::InvalidData(format!("recovery configuration uuid: {e}"))
            })?,
            template: model.template,
            created: model.created,
            staged: model.staged,
            activated: model.activated,
            expired: model.expired,
            etag: model.etag,
        })
    }
}

impl From<&RecoveryConfiguration> for ActiveModel {
    fn from(config: &RecoveryConfiguration) -> Self {
        ActiveModel {
            uuid: Set(config.uuid.to_string()),
            template: Set(config.template.clone()),
            created: Set(config.created),
            staged: Set(config.staged),
            activated: Set(config.activated),
            expired: Set(config.expired),
            v: Set(SCHEMA_VERSION),
            etag: Set(config.etag.clone()),
        }
    }
}
