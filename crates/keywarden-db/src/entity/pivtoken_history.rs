//! pivtoken history entity - append-only archive written at delete time.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::NotSet;
use serde::{Deserialize, Serialize};

use keywarden_types::{PivToken, PivTokenHistory, RecoveryToken};

use crate::SCHEMA_VERSION;

/// pivtoken history database model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "pivtoken_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// guid of the archived token. not unique.
    pub guid: String,
    /// json-serialized archive of the token and its recovery tokens.
    #[sea_orm(column_type = "Text")]
    pub record: String,
    /// start of the token's active range.
    pub created: DateTime<Utc>,
    /// end of the token's active range; retention filters on this.
    pub deleted_at: DateTime<Utc>,
    /// schema version
    pub v: i32,
    pub etag: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// shape of the json `record` column.
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    token: PivToken,
    recovery_tokens: Vec<RecoveryToken>,
}

impl TryFrom<Model> for PivTokenHistory {
    type Error = crate::Error;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let record: Record = serde_json::from_str(&model.record)
            .map_err(|e| crate::Error::InvalidData(format!("history record: {e}")))?;
        Ok(PivTokenHistory {
            guid: model
                .guid
                .parse()
                .map_err(|e| crate::Error::InvalidData(format!("history guid: {e}")))?,
            token: record.token,
            recovery_tokens: record.recovery_tokens,
            created: model.created,
            deleted_at: model.deleted_at,
        })
    }
}

/// build an insertable archive row for a token and its recovery tokens.
pub fn archive(
    token: &PivToken,
    recovery_tokens: &[RecoveryToken],
    deleted_at: DateTime<Utc>,
    etag: String,
) -> ActiveModel {
    let record = Record {
        token: token.clone(),
        recovery_tokens: recovery_tokens.to_vec(),
    };
    ActiveModel {
        id: NotSet,
        guid: Set(token.guid.to_string()),
        record: Set(serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string())),
        created: Set(token.created),
        deleted_at: Set(deleted_at),
        v: Set(SCHEMA_VERSION),
        etag: Set(etag),
    }
}
