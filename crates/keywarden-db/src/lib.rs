//! database layer for keywarden.
//!
//! this crate provides persistent storage for:
//! - PIVTokens
//! - RecoveryTokens
//! - RecoveryConfigurations
//! - RecoveryConfigurationTransitions
//! - PIVTokenHistory
//!
//! every row carries a schema version and a server-issued `etag`; writes that
//! carry an etag are conditional and report [`Error::Conflict`] when the row
//! changed underneath the caller. every multi-row invariant (sibling token
//! expiry, delete-with-archive, expire/reactivate fan-in) runs as one
//! all-or-nothing transaction - never as two writes.

#![warn(missing_docs)]

mod entity;
mod error;
mod migration;

pub use error::Error;

use std::future::Future;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database as SeaOrmDatabase,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use keywarden_types::{
    Config, Guid, PivToken, PivTokenHistory, RecoveryConfiguration, RecoveryToken, Transition,
    TransitionName,
};

/// result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// schema version written into every row.
pub const SCHEMA_VERSION: i32 = 1;

/// generate a fresh etag: 8 random bytes, hex-encoded.
fn new_etag() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// database trait for keywarden storage operations.
///
/// this trait abstracts over different database backends (sqlite, postgresql)
/// and is the only surface higher layers use to reach storage.
pub trait Database: Send + Sync {
    // ─── Health Check ─────────────────────────────────────────────────────────

    /// ping the database to verify connectivity.
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    // ─── PIVToken Operations ─────────────────────────────────────────────────

    /// create a piv token together with its first recovery token, atomically.
    ///
    /// a piv token never exists without a recovery token; the pair is one
    /// transaction. returns [`Error::Duplicate`] if the guid is taken.
    fn create_pivtoken(
        &self,
        token: &PivToken,
        recovery: &RecoveryToken,
    ) -> impl Future<Output = Result<(PivToken, RecoveryToken)>> + Send;

    /// get a piv token by guid.
    fn get_pivtoken(&self, guid: &Guid)
    -> impl Future<Output = Result<Option<PivToken>>> + Send;

    /// list all piv tokens, ordered by guid.
    fn list_pivtokens(&self) -> impl Future<Output = Result<Vec<PivToken>>> + Send;

    /// list a page of piv tokens, ordered by guid.
    fn list_pivtokens_range(
        &self,
        offset: u64,
        limit: u64,
    ) -> impl Future<Output = Result<Vec<PivToken>>> + Send;

    /// list piv tokens whose compute node is in `cn_uuids`.
    fn list_pivtokens_by_cn(
        &self,
        cn_uuids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<PivToken>>> + Send;

    /// count all piv tokens (the fleet size).
    fn count_pivtokens(&self) -> impl Future<Output = Result<u64>> + Send;

    /// update a piv token's compute node, conditional on its etag.
    ///
    /// `cn_uuid` is the only mutable field (chassis swap).
    fn update_pivtoken_cn(
        &self,
        token: &PivToken,
        cn_uuid: Uuid,
    ) -> impl Future<Output = Result<PivToken>> + Send;

    /// delete a piv token: archive it (with its recovery tokens) into
    /// history, delete the row and delete-many its recovery tokens, in one
    /// transaction. the delete is conditional on the token's etag.
    fn delete_pivtoken(&self, token: &PivToken) -> impl Future<Output = Result<()>> + Send;

    /// atomic replacement: archive + delete `old` and all its recovery
    /// tokens, then create `new` with its first recovery token - one
    /// transaction.
    fn replace_pivtoken(
        &self,
        old: &PivToken,
        new: &PivToken,
        recovery: &RecoveryToken,
    ) -> impl Future<Output = Result<(PivToken, RecoveryToken)>> + Send;

    // ─── PIVTokenHistory Operations ──────────────────────────────────────────

    /// list archived copies of a guid, newest first.
    fn list_pivtoken_history(
        &self,
        guid: &Guid,
    ) -> impl Future<Output = Result<Vec<PivTokenHistory>>> + Send;

    /// delete history rows whose active range ended before `cutoff`.
    /// returns the number deleted.
    fn prune_pivtoken_history(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64>> + Send;

    // ─── RecoveryToken Operations ────────────────────────────────────────────

    /// insert a recovery token; when `supersede` names an unused sibling it
    /// is expired in the same transaction (a token that was never staged,
    /// activated or expired must not outlive its replacement).
    fn create_recovery_token(
        &self,
        token: &RecoveryToken,
        supersede: Option<&RecoveryToken>,
    ) -> impl Future<Output = Result<RecoveryToken>> + Send;

    /// get a recovery token by uuid.
    fn get_recovery_token(
        &self,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Option<RecoveryToken>>> + Send;

    /// list a piv token's recovery tokens ordered by `created` ascending.
    fn list_recovery_tokens_for_pivtoken(
        &self,
        guid: &Guid,
    ) -> impl Future<Output = Result<Vec<RecoveryToken>>> + Send;

    /// list every recovery token referencing a configuration.
    fn list_recovery_tokens_for_configuration(
        &self,
        config_uuid: Uuid,
    ) -> impl Future<Output = Result<Vec<RecoveryToken>>> + Send;

    /// count recovery tokens referencing a configuration.
    fn count_recovery_tokens(&self, config_uuid: Uuid)
    -> impl Future<Output = Result<u64>> + Send;

    /// count staged-and-unexpired recovery tokens for a configuration.
    fn count_staged_recovery_tokens(
        &self,
        config_uuid: Uuid,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// count unexpired recovery tokens for a configuration.
    fn count_unexpired_recovery_tokens(
        &self,
        config_uuid: Uuid,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// conditional full put of a recovery token.
    fn put_recovery_token(
        &self,
        token: &RecoveryToken,
    ) -> impl Future<Output = Result<RecoveryToken>> + Send;

    /// conditional put of `token` plus expiry of every sibling in
    /// `siblings`, atomically.
    ///
    /// this is the write behind the staged/active sibling invariants: when a
    /// token is staged (or activated), each sibling that previously held a
    /// role the write claims is expired in the same transaction. a write
    /// that both stages and activates can displace two siblings at once.
    fn put_recovery_token_expiring_siblings(
        &self,
        token: &RecoveryToken,
        siblings: &[RecoveryToken],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<RecoveryToken>> + Send;

    /// conditional delete of a recovery token.
    fn delete_recovery_token(
        &self,
        token: &RecoveryToken,
    ) -> impl Future<Output = Result<()>> + Send;

    /// delete recovery tokens expired before `cutoff`. returns the number deleted.
    fn prune_expired_recovery_tokens(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64>> + Send;

    // ─── RecoveryConfiguration Operations ────────────────────────────────────

    /// insert a recovery configuration. returns [`Error::Duplicate`] when the
    /// hash-derived uuid already exists.
    fn create_recovery_configuration(
        &self,
        config: &RecoveryConfiguration,
    ) -> impl Future<Output = Result<RecoveryConfiguration>> + Send;

    /// get a configuration by uuid.
    fn get_recovery_configuration(
        &self,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Option<RecoveryConfiguration>>> + Send;

    /// list all configurations, ordered by `created`.
    fn list_recovery_configurations(
        &self,
    ) -> impl Future<Output = Result<Vec<RecoveryConfiguration>>> + Send;

    /// find the configuration with `activated` set and `expired` unset.
    fn find_active_recovery_configuration(
        &self,
    ) -> impl Future<Output = Result<Option<RecoveryConfiguration>>> + Send;

    /// count all configurations.
    fn count_recovery_configurations(&self) -> impl Future<Output = Result<u64>> + Send;

    /// conditional full put of a configuration.
    fn put_recovery_configuration(
        &self,
        config: &RecoveryConfiguration,
    ) -> impl Future<Output = Result<RecoveryConfiguration>> + Send;

    /// conditional delete of a configuration. state guards live in the
    /// handler; storage only enforces the etag.
    fn delete_recovery_configuration(
        &self,
        config: &RecoveryConfiguration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// expire a configuration: set `expired` on the row and on every one of
    /// its not-yet-expired recovery tokens, in one transaction.
    fn expire_recovery_configuration(
        &self,
        config: &RecoveryConfiguration,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<RecoveryConfiguration>> + Send;

    /// reactivate an expired configuration: clear its staged/activated/
    /// expired timestamps, delete all its prior transitions, and clear the
    /// same timestamps on every one of its recovery tokens - one transaction.
    fn reactivate_recovery_configuration(
        &self,
        config: &RecoveryConfiguration,
    ) -> impl Future<Output = Result<RecoveryConfiguration>> + Send;

    // ─── Transition Operations ───────────────────────────────────────────────

    /// insert a transition row.
    fn create_transition(
        &self,
        transition: &Transition,
    ) -> impl Future<Output = Result<Transition>> + Send;

    /// insert an already-finished transition and put the advanced
    /// configuration in the same transaction (the empty-fleet bootstrap
    /// path: there is nothing to fan out to, so scheduling and completion
    /// collapse into one write).
    fn create_finished_transition(
        &self,
        transition: &Transition,
        config: &RecoveryConfiguration,
    ) -> impl Future<Output = Result<(Transition, RecoveryConfiguration)>> + Send;

    /// get a transition by uuid.
    fn get_transition(
        &self,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Option<Transition>>> + Send;

    /// find the transition for a configuration with neither `finished` nor
    /// `aborted` set, if any.
    fn find_unfinished_transition(
        &self,
        config_uuid: Uuid,
    ) -> impl Future<Output = Result<Option<Transition>>> + Send;

    /// find the unfinished transition of a given name for a configuration.
    fn find_unfinished_transition_named(
        &self,
        config_uuid: Uuid,
        name: TransitionName,
    ) -> impl Future<Output = Result<Option<Transition>>> + Send;

    /// find the most recent transition of a given name for a configuration,
    /// finished or not (the watch endpoint).
    fn find_latest_transition(
        &self,
        config_uuid: Uuid,
        name: TransitionName,
    ) -> impl Future<Output = Result<Option<Transition>>> + Send;

    /// oldest transition with `finished` unset, aborted or not. the
    /// orchestrator finalizes aborted rows it picks up.
    fn next_pending_transition(&self) -> impl Future<Output = Result<Option<Transition>>> + Send;

    /// conditional full put of a transition. this is the contention gate
    /// between orchestrator instances: the `locked_by` write only succeeds
    /// for the worker holding the current etag.
    fn put_transition(
        &self,
        transition: &Transition,
    ) -> impl Future<Output = Result<Transition>> + Send;

    /// delete every transition row for a configuration. returns the number deleted.
    fn delete_transitions_for_configuration(
        &self,
        config_uuid: Uuid,
    ) -> impl Future<Output = Result<u64>> + Send;
}

/// the main database implementation using sea-orm.
#[derive(Clone)]
pub struct KeywardenDb {
    conn: DatabaseConnection,
}

impl KeywardenDb {
    /// create a new database connection from config.
    pub async fn new(config: &Config) -> Result<Self> {
        let url = Self::build_connection_url(&config.database)?;
        let conn: DatabaseConnection = SeaOrmDatabase::connect(&url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let db = Self { conn };
        db.migrate().await?;
        Ok(db)
    }

    /// build a sea-orm compatible connection url from config.
    fn build_connection_url(config: &keywarden_types::DatabaseConfig) -> Result<String> {
        match config.db_type.as_str() {
            "sqlite" => {
                let path = if config.connection_string.starts_with("sqlite:") {
                    config.connection_string.clone()
                } else {
                    format!("sqlite:{}", config.connection_string)
                };
                // add ?mode=rwc to create the file if it doesn't exist
                if path.contains('?') {
                    Ok(path)
                } else {
                    Ok(format!("{}?mode=rwc", path))
                }
            }
            "postgres" | "postgresql" => Ok(config.connection_string.clone()),
            other => Err(Error::Connection(format!(
                "unsupported database type: {}",
                other
            ))),
        }
    }

    /// create an in-memory sqlite database for testing.
    pub async fn new_in_memory() -> Result<Self> {
        let conn: DatabaseConnection = SeaOrmDatabase::connect("sqlite::memory:")
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let db = Self { conn };
        db.migrate().await?;
        Ok(db)
    }

    /// run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        migration::Migrator::up(&self.conn, None)
            .await
            .map_err(|e| Error::Migration(e.to_string()))?;
        Ok(())
    }
}

// ─── transaction-shareable write helpers ─────────────────────────────────────
//
// every helper takes a ConnectionTrait so the same code runs standalone or
// inside a transaction.

async fn insert_pivtoken_on<C: ConnectionTrait>(conn: &C, token: &PivToken) -> Result<PivToken> {
    let mut created = token.clone();
    created.etag = new_etag();
    let model: entity::pivtoken::ActiveModel = (&created).into();
    model.insert(conn).await?;
    Ok(created)
}

async fn insert_recovery_token_on<C: ConnectionTrait>(
    conn: &C,
    token: &RecoveryToken,
) -> Result<RecoveryToken> {
    let mut created = token.clone();
    created.etag = new_etag();
    let model: entity::recovery_token::ActiveModel = (&created).into();
    model.insert(conn).await?;
    Ok(created)
}

async fn put_recovery_token_on<C: ConnectionTrait>(
    conn: &C,
    token: &RecoveryToken,
) -> Result<RecoveryToken> {
    let mut updated = token.clone();
    updated.etag = new_etag();
    let model: entity::recovery_token::ActiveModel = (&updated).into();
    let res = entity::recovery_token::Entity::update_many()
        .set(model)
        .filter(entity::recovery_token::Column::Uuid.eq(token.uuid.to_string()))
        .filter(entity::recovery_token::Column::Etag.eq(token.etag.as_str()))
        .exec(conn)
        .await?;
    if res.rows_affected == 0 {
        return Err(Error::Conflict(format!("recovery token {}", token.uuid)));
    }
    Ok(updated)
}

async fn put_recovery_configuration_on<C: ConnectionTrait>(
    conn: &C,
    config: &RecoveryConfiguration,
) -> Result<RecoveryConfiguration> {
    let mut updated = config.clone();
    updated.etag = new_etag();
    let model: entity::recovery_configuration::ActiveModel = (&updated).into();
    let res = entity::recovery_configuration::Entity::update_many()
        .set(model)
        .filter(entity::recovery_configuration::Column::Uuid.eq(config.uuid.to_string()))
        .filter(entity::recovery_configuration::Column::Etag.eq(config.etag.as_str()))
        .exec(conn)
        .await?;
    if res.rows_affected == 0 {
        return Err(Error::Conflict(format!(
            "recovery configuration {}",
            config.uuid
        )));
    }
    Ok(updated)
}

async fn archive_pivtoken_on<C: ConnectionTrait>(
    conn: &C,
    token: &PivToken,
    now: DateTime<Utc>,
) -> Result<()> {
    let tokens: Vec<RecoveryToken> = entity::recovery_token::Entity::find()
        .filter(entity::recovery_token::Column::Pivtoken.eq(token.guid.as_str()))
        .order_by_asc(entity::recovery_token::Column::Created)
        .all(conn)
        .await?
        .into_iter()
        .map(RecoveryToken::try_from)
        .collect::<Result<_>>()?;

    entity::pivtoken_history::archive(token, &tokens, now, new_etag())
        .insert(conn)
        .await?;

    // children first, then the token row itself
    entity::recovery_token::Entity::delete_many()
        .filter(entity::recovery_token::Column::Pivtoken.eq(token.guid.as_str()))
        .exec(conn)
        .await?;

    let res = entity::pivtoken::Entity::delete_many()
        .filter(entity::pivtoken::Column::Guid.eq(token.guid.as_str()))
        .filter(entity::pivtoken::Column::Etag.eq(token.etag.as_str()))
        .exec(conn)
        .await?;
    if res.rows_affected == 0 {
        return Err(Error::Conflict(format!("pivtoken {}", token.guid)));
    }

    Ok(())
}

impl Database for KeywardenDb {
    // health check

    async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(())
    }

    // pivtoken operations

    async fn create_pivtoken(
        &self,
        token: &PivToken,
        recovery: &RecoveryToken,
    ) -> Result<(PivToken, RecoveryToken)> {
        let txn = self.conn.begin().await?;
        let token = insert_pivtoken_on(&txn, token).await?;
        let recovery = insert_recovery_token_on(&txn, recovery).await?;
        txn.commit().await?;
        Ok((token, recovery))
    }

    async fn get_pivtoken(&self, guid: &Guid) -> Result<Option<PivToken>> {
        entity::pivtoken::Entity::find_by_id(guid.as_str())
            .one(&self.conn)
            .await?
            .map(PivToken::try_from)
            .transpose()
    }

    async fn list_pivtokens(&self) -> Result<Vec<PivToken>> {
        entity::pivtoken::Entity::find()
            .order_by_asc(entity::pivtoken::Column::Guid)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(PivToken::try_from)
            .collect()
    }

    async fn list_pivtokens_range(&self, offset: u64, limit: u64) -> Result<Vec<PivToken>> {
        entity::pivtoken::Entity::find()
            .order_by_asc(entity::pivtoken::Column::Guid)
            .offset(offset)
            .limit(limit)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(PivToken::try_from)
            .collect()
    }

    async fn list_pivtokens_by_cn(&self, cn_uuids: &[Uuid]) -> Result<Vec<PivToken>> {
        let cns: Vec<String> = cn_uuids.iter().map(Uuid::to_string).collect();
        entity::pivtoken::Entity::find()
            .filter(entity::pivtoken::Column::CnUuid.is_in(cns))
            .order_by_asc(entity::pivtoken::Column::Guid)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(PivToken::try_from)
            .collect()
    }

    async fn count_pivtokens(&self) -> Result<u64> {
        Ok(entity::pivtoken::Entity::find().count(&self.conn).await?)
    }

    async fn update_pivtoken_cn(&self, token: &PivToken, cn_uuid: Uuid) -> Result<PivToken> {
        let mut updated = token.clone();
        updated.cn_uuid = cn_uuid;
        updated.etag = new_etag();
        let model: entity::pivtoken::ActiveModel = (&updated).into();
        let res = entity::pivtoken::Entity::update_many()
            .set(model)
            .filter(entity::pivtoken::Column::Guid.eq(token.guid.as_str()))
            .filter(entity::pivtoken::Column::Etag.eq(token.etag.as_str()))
            .exec(&self.conn)
            .await?;
        if res.rows_affected == 0 {
            return Err(Error::Conflict(format!("pivtoken {}", token.guid)));
        }
        Ok(updated)
    }

    async fn delete_pivtoken(&self, token: &PivToken) -> Result<()> {
        let txn = self.conn.begin().await?;
        archive_pivtoken_on(&txn, token, Utc::now()).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn replace_pivtoken(
        &self,
        old: &PivToken,
        new: &PivToken,
        recovery: &RecoveryToken,
    ) -> Result<(PivToken, RecoveryToken)> {
        let txn = self.conn.begin().await?;
        archive_pivtoken_on(&txn, old, Utc::now()).await?;
        let new = insert_pivtoken_on(&txn, new).await?;
        let recovery = insert_recovery_token_on(&txn, recovery).await?;
        txn.commit().await?;
        Ok((new, recovery))
    }

    // pivtoken history operations

    async fn list_pivtoken_history(&self, guid: &Guid) -> Result<Vec<PivTokenHistory>> {
        entity::pivtoken_history::Entity::find()
            .filter(entity::pivtoken_history::Column::Guid.eq(guid.as_str()))
            .order_by_desc(entity::pivtoken_history::Column::DeletedAt)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(PivTokenHistory::try_from)
            .collect()
    }

    async fn prune_pivtoken_history(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = entity::pivtoken_history::Entity::delete_many()
            .filter(entity::pivtoken_history::Column::DeletedAt.lt(cutoff))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }

    // recovery token operations

    async fn create_recovery_token(
        &self,
        token: &RecoveryToken,
        supersede: Option<&RecoveryToken>,
    ) -> Result<RecoveryToken> {
        let txn = self.conn.begin().await?;
        if let Some(previous) = supersede {
            let mut expired = previous.clone();
            expired.expired = Some(token.created);
            put_recovery_token_on(&txn, &expired).await?;
        }
        let token = insert_recovery_token_on(&txn, token).await?;
        txn.commit().await?;
        Ok(token)
    }

    async fn get_recovery_token(&self, uuid: Uuid) -> Result<Option<RecoveryToken>> {
        entity::recovery_token::Entity::find_by_id(uuid.to_string())
            .one(&self.conn)
            .await?
            .map(RecoveryToken::try_from)
            .transpose()
    }

    async fn list_recovery_tokens_for_pivtoken(&self, guid: &Guid) -> Result<Vec<RecoveryToken>> {
        entity::recovery_token::Entity::find()
            .filter(entity::recovery_token::Column::Pivtoken.eq(guid.as_str()))
            .order_by_asc(entity::recovery_token::Column::Created)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(RecoveryToken::try_from)
            .collect()
    }

    async fn list_recovery_tokens_for_configuration(
        &self,
        config_uuid: Uuid,
    ) -> Result<Vec<RecoveryToken>> {
        entity::recovery_token::Entity::find()
            .filter(
                entity::recovery_token::Column::RecoveryConfiguration
                    .eq(config_uuid.to_string()),
            )
            .order_by_asc(entity::recovery_token::Column::Created)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(RecoveryToken::try_from)
            .collect()
    }

    async fn count_recovery_tokens(&self, config_uuid: Uuid) -> Result<u64> {
        Ok(entity::recovery_token::Entity::find()
            .filter(
                entity::recovery_token::Column::RecoveryConfiguration
                    .eq(config_uuid.to_string()),
            )
            .count(&self.conn)
            .await?)
    }

    async fn count_staged_recovery_tokens(&self, config_uuid: Uuid) -> Result<u64> {
        Ok(entity::recovery_token::Entity::find()
            .filter(
                entity::recovery_token::Column::RecoveryConfiguration
                    .eq(config_uuid.to_string()),
            )
            .filter(entity::recovery_token::Column::Staged.is_not_null())
            .filter(entity::recovery_token::Column::Expired.is_null())
            .count(&self.conn)
            .await?)
    }

    async fn count_unexpired_recovery_tokens(&self, config_uuid: Uuid) -> Result<u64> {
        Ok(entity::recovery_token::Entity::find()
            .filter(
                entity::recovery_token::Column::RecoveryConfiguration
                    .eq(config_uuid.to_string()),
            )
            .filter(entity::recovery_token::Column::Expired.is_null())
            .count(&self.conn)
            .await?)
    }

    async fn put_recovery_token(&self, token: &RecoveryToken) -> Result<RecoveryToken> {
        put_recovery_token_on(&self.conn, token).await
    }

    async fn put_recovery_token_expiring_siblings(
        &self,
        token: &RecoveryToken,
        siblings: &[RecoveryToken],
        now: DateTime<Utc>,
    ) -> Result<RecoveryToken> {
        let txn = self.conn.begin().await?;
        for sibling in siblings {
            let mut expired = sibling.clone();
            expired.expired = Some(now);
            put_recovery_token_on(&txn, &expired).await?;
        }
        let token = put_recovery_token_on(&txn, token).await?;
        txn.commit().await?;
        Ok(token)
    }

    async fn delete_recovery_token(&self, token: &RecoveryToken) -> Result<()> {
        let res = entity::recovery_token::Entity::delete_many()
            .filter(entity::recovery_token::Column::Uuid.eq(token.uuid.to_string()))
            .filter(entity::recovery_token::Column::Etag.eq(token.etag.as_str()))
            .exec(&self.conn)
            .await?;
        if res.rows_affected == 0 {
            return Err(Error::Conflict(format!("recovery token {}", token.uuid)));
        }
        Ok(())
    }

    async fn prune_expired_recovery_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = entity::recovery_token::Entity::delete_many()
            .filter(entity::recovery_token::Column::Expired.is_not_null())
            .filter(entity::recovery_token::Column::Expired.lt(cutoff))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }

    // recovery configuration operations

    async fn create_recovery_configuration(
        &self,
        config: &RecoveryConfiguration,
    ) -> Result<RecoveryConfiguration> {
        let mut created = config.clone();
        created.etag = new_etag();
        let model: entity::recovery_configuration::ActiveModel = (&created).into();
        model.insert(&self.conn).await?;
        Ok(created)
    }

    async fn get_recovery_configuration(
        &self,
        uuid: Uuid,
    ) -> Result<Option<RecoveryConfiguration>> {
        entity::recovery_configuration::Entity::find_by_id(uuid.to_string())
            .one(&self.conn)
            .await?
            .map(RecoveryConfiguration::try_from)
            .transpose()
    }

    async fn list_recovery_configurations(&self) -> Result<Vec<RecoveryConfiguration>> {
        entity::recovery_configuration::Entity::find()
            .order_by_asc(entity::recovery_configuration::Column::Created)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(RecoveryConfiguration::try_from)
            .collect()
    }

    async fn find_active_recovery_configuration(
        &self,
    ) -> Result<Option<RecoveryConfiguration>> {
        entity::recovery_configuration::Entity::find()
            .filter(entity::recovery_configuration::Column::Activated.is_not_null())
            .filter(entity::recovery_configuration::Column::Expired.is_null())
            .order_by_desc(entity::recovery_configuration::Column::Activated)
            .one(&self.conn)
            .await?
            .map(RecoveryConfiguration::try_from)
            .transpose()
    }

    async fn count_recovery_configurations(&self) -> Result<u64> {
        Ok(entity::recovery_configuration::Entity::find()
            .count(&self.conn)
            .await?)
    }

    async fn put_recovery_configuration(
        &self,
        config: &RecoveryConfiguration,
    ) -> Result<RecoveryConfiguration> {
        put_recovery_configuration_on(&self.conn, config).await
    }

    async fn delete_recovery_configuration(&self, config: &RecoveryConfiguration) -> Result<()> {
        let txn = self.conn.begin().await?;
        entity::transition::Entity::delete_many()
            .filter(
                entity::transition::Column::RecoveryConfigUuid.eq(config.uuid.to_string()),
            )
            .exec(&txn)
            .await?;
        let res = entity::recovery_configuration::Entity::delete_many()
            .filter(entity::recovery_configuration::Column::Uuid.eq(config.uuid.to_string()))
            .filter(entity::recovery_configuration::Column::Etag.eq(config.etag.as_str()))
            .exec(&txn)
            .await?;
        if res.rows_affected == 0 {
            return Err(Error::Conflict(format!(
                "recovery configuration {}",
                config.uuid
            )));
        }
        txn.commit().await?;
        Ok(())
    }

    async fn expire_recovery_configuration(
        &self,
        config: &RecoveryConfiguration,
        now: DateTime<Utc>,
    ) -> Result<RecoveryConfiguration> {
        let txn = self.conn.begin().await?;

        let mut expired = config.clone();
        expired.expired = Some(now);
        let expired = put_recovery_configuration_on(&txn, &expired).await?;

        entity::recovery_token::Entity::update_many()
            .col_expr(
                entity::recovery_token::Column::Expired,
                sea_orm::sea_query::Expr::value(now),
            )
            .col_expr(
                entity::recovery_token::Column::Etag,
                sea_orm::sea_query::Expr::value(new_etag()),
            )
            .filter(
                entity::recovery_token::Column::RecoveryConfiguration
                    .eq(config.uuid.to_string()),
            )
            .filter(entity::recovery_token::Column::Expired.is_null())
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(expired)
    }

    async fn reactivate_recovery_configuration(
        &self,
        config: &RecoveryConfiguration,
    ) -> Result<RecoveryConfiguration> {
        let txn = self.conn.begin().await?;

        let mut cleared = config.clone();
        cleared.staged = None;
        cleared.activated = None;
        cleared.expired = None;
        let cleared = put_recovery_configuration_on(&txn, &cleared).await?;

        entity::transition::Entity::delete_many()
            .filter(
                entity::transition::Column::RecoveryConfigUuid.eq(config.uuid.to_string()),
            )
            .exec(&txn)
            .await?;

        entity::recovery_token::Entity::update_many()
            .col_expr(
                entity::recovery_token::Column::Staged,
                sea_orm::sea_query::Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                entity::recovery_token::Column::Activated,
                sea_orm::sea_query::Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                entity::recovery_token::Column::Expired,
                sea_orm::sea_query::Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                entity::recovery_token::Column::Etag,
                sea_orm::sea_query::Expr::value(new_etag()),
            )
            .filter(
                entity::recovery_token::Column::RecoveryConfiguration
                    .eq(config.uuid.to_string()),
            )
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(cleared)
    }

    // transition operations

    async fn create_transition(&self, transition: &Transition) -> Result<Transition> {
        let mut created = transition.clone();
        created.etag = new_etag();
        let model: entity::transition::ActiveModel = (&created).into();
        model.insert(&self.conn).await?;
        Ok(created)
    }

    async fn create_finished_transition(
        &self,
        transition: &Transition,
        config: &RecoveryConfiguration,
    ) -> Result<(Transition, RecoveryConfiguration)> {
        let txn = self.conn.begin().await?;
        let mut created = transition.clone();
        created.etag = new_etag();
        let model: entity::transition::ActiveModel = (&created).into();
        model.insert(&txn).await?;
        let config = put_recovery_configuration_on(&txn, config).await?;
        txn.commit().await?;
        Ok((created, config))
    }

    async fn get_transition(&self, uuid: Uuid) -> Result<Option<Transition>> {
        entity::transition::Entity::find_by_id(uuid.to_string())
            .one(&self.conn)
            .await?
            .map(Transition::try_from)
            .transpose()
    }

    async fn find_unfinished_transition(&self, config_uuid: Uuid) -> Result<Option<Transition>> {
        entity::transition::Entity::find()
            .filter(entity::transition::Column::RecoveryConfigUuid.eq(config_uuid.to_string()))
            .filter(entity::transition::Column::Finished.is_null())
            .filter(entity::transition::Column::Aborted.eq(false))
            .order_by_asc(entity::transition::Column::Created)
            .one(&self.conn)
            .await?
            .map(Transition::try_from)
            .transpose()
    }

    async fn find_unfinished_transition_named(
        &self,
        config_uuid: Uuid,
        name: TransitionName,
    ) -> Result<Option<Transition>> {
        entity::transition::Entity::find()
            .filter(entity::transition::Column::RecoveryConfigUuid.eq(config_uuid.to_string()))
            .filter(entity::transition::Column::Name.eq(name.to_string()))
            .filter(entity::transition::Column::Finished.is_null())
            .filter(entity::transition::Column::Aborted.eq(false))
            .order_by_asc(entity::transition::Column::Created)
            .one(&self.conn)
            .await?
            .map(Transition::try_from)
            .transpose()
    }

    async fn find_latest_transition(
        &self,
        config_uuid: Uuid,
        name: TransitionName,
    ) -> Result<Option<Transition>> {
        entity::transition::Entity::find()
            .filter(entity::transition::Column::RecoveryConfigUuid.eq(config_uuid.to_string()))
            .filter(entity::transition::Column::Name.eq(name.to_string()))
            .order_by_desc(entity::transition::Column::Created)
            .one(&self.conn)
            .await?
            .map(Transition::try_from)
            .transpose()
    }

    async fn next_pending_transition(&self) -> Result<Option<Transition>> {
        entity::transition::Entity::find()
            .filter(entity::transition::Column::Finished.is_null())
            .order_by_asc(entity::transition::Column::Created)
            .one(&self.conn)
            .await?
            .map(Transition::try_from)
            .transpose()
    }

    async fn put_transition(&self, transition: &Transition) -> Result<Transition> {
        let mut updated = transition.clone();
        updated.etag = new_etag();
        let model: entity::transition::ActiveModel = (&updated).into();
        let res = entity::transition::Entity::update_many()
            .set(model)
            .filter(entity::transition::Column::Uuid.eq(transition.uuid.to_string()))
            .filter(entity::transition::Column::Etag.eq(transition.etag.as_str()))
            .exec(&self.conn)
            .await?;
        if res.rows_affected == 0 {
            return Err(Error::Conflict(format!("transition {}", transition.uuid)));
        }
        Ok(updated)
    }

    async fn delete_transitions_for_configuration(&self, config_uuid: Uuid) -> Result<u64> {
        let res = entity::transition::Entity::delete_many()
            .filter(entity::transition::Column::RecoveryConfigUuid.eq(config_uuid.to_string()))
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }
}
