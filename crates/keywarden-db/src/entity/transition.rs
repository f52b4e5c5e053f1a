//! recovery configuration transition entity for database storage.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use uuid::Uuid;

use keywarden_types::{Transition, TransitionErr};

use crate::SCHEMA_VERSION;

/// transition database model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "recovery_configuration_transitions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub uuid: String,
    pub recovery_config_uuid: String,
    /// transition name as string ("stage", "unstage", "activate", "deactivate").
    pub name: String,
    /// json-serialized vec<uuid>
    #[sea_orm(column_type = "Text")]
    pub targets: String,
    /// json-serialized vec<uuid>
    #[sea_orm(column_type = "Text")]
    pub completed: String,
    /// json-serialized vec<string>
    #[sea_orm(column_type = "Text")]
    pub taskids: String,
    /// json-serialized vec<transitionerr>
    #[sea_orm(column_type = "Text")]
    pub errs: String,
    pub concurrency: i32,
    pub standalone: bool,
    pub forced: bool,
    pub locked_by: Option<String>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub aborted: bool,
    /// schema version
    pub v: i32,
    pub etag: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recovery_configuration::Entity",
        from = "Column::RecoveryConfigUuid",
        to = "super::recovery_configuration::Column::Uuid"
    )]
    RecoveryConfiguration,
}

impl Related<super::recovery_configuration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecoveryConfiguration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Transition {
    type Error = crate::Error;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let invalid = |what: &str, e: &dyn std::fmt::Display| {
            crate::Error::InvalidData(format!("transition {what}: {e}"))
        };

        let targets: Vec<Uuid> =
            serde_json::from_str(&model.targets).map_err(|e| invalid("targets", &e))?;
        let completed: Vec<Uuid> =
            serde_json::from_str(&model.completed).map_err(|e| invalid("completed", &e))?;
        let taskids: Vec<String> =
            serde_json::from_str(&model.taskids).map_err(|e| invalid("taskids", &e))?;
        // empty placeholder objects from older rows are pruned here
        let errs: Vec<TransitionErr> = serde_json::from_str::<Vec<serde_json::Value>>(&model.errs)
            .map_err(|e| invalid("errs", &e))?
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();

        Ok(Transition {
            uuid: model.uuid.parse().map_err(|e| invalid("uuid", &e))?,
            recovery_config_uuid: model
                .recovery_config_uuid
                .parse()
                .map_err(|e| invalid("recovery_config_uuid", &e))?,
            name: model.name.parse().map_err(|e| invalid("name", &e))?,
            targets,
            completed,
            taskids,
            errs,
            concurrency: model.concurrency.max(1) as u32,
            standalone: model.standalone,
            forced: model.forced,
            locked_by: model
                .locked_by
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|e| invalid("locked_by", &e))?,
            created: model.created,
            started: model.started,
            finished: model.finished,
            aborted: model.aborted,
            etag: model.etag,
        })
    }
}

impl From<&Transition> for ActiveModel {
    fn from(t: &Transition) -> Self {
        ActiveModel {
            uuid: Set(t.uuid.to_string()),
            recovery_config_uuid: Set(t.recovery_config_uuid.to_string()),
            name: Set(t.name.to_string()),
            targets: Set(serde_json::to_string(&t.targets).unwrap_or_else(|_| "[]".to_string())),
            completed: Set(
                serde_json::to_string(&t.completed).unwrap_or_else(|_| "[]".to_string())
            ),
            taskids: Set(serde_json::to_string(&t.taskids).unwrap_or_else(|_| "[]".to_string())),
            errs: Set(serde_json::to_string(&t.errs).unwrap_or_else(|_| "[]".to_string())),
            concurrency: Set(t.concurrency as i32),
            standalone: Set(t.standalone),
            forced: Set(t.forced),
            locked_by: Set(t.locked_by.map(|u| u.to_string())),
            created: Set(t.created),
            started: Set(t.started),
            finished: Set(t.finished),
            aborted: Set(t.aborted),
            v: Set(SCHEMA_VERSION),
            etag: Set(t.etag.clone()),
        }
    }
}
