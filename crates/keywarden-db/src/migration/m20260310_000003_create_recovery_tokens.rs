//! create recovery_tokens table migration

use sea_orm_migration::prelude::*;

use super::m20260310_000001_create_pivtokens::Pivtokens;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RecoveryTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecoveryTokens::Uuid)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RecoveryTokens::Pivtoken)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecoveryTokens::RecoveryConfiguration)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(ColumnDef::new(RecoveryTokens::Token).string().not_null())
                    .col(
                        ColumnDef::new(RecoveryTokens::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RecoveryTokens::Staged).timestamp_with_time_zone())
                    .col(ColumnDef::new(RecoveryTokens::Activated).timestamp_with_time_zone())
                    .col(ColumnDef::new(RecoveryTokens::Expired).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(RecoveryTokens::V)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(RecoveryTokens::Etag)
                            .string_len(16)
                            .not_null(),
                    )
                    // no constraint on recovery_configuration: an expired
                    // configuration may be deleted while expired tokens
                    // still reference it for history
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_recovery_tokens_pivtoken")
                            .from(RecoveryTokens::Table, RecoveryTokens::Pivtoken)
                            .to(Pivtokens::Table, Pivtokens::Guid)
                            // history archiving handles cleanup; no cascade
                            .on_delete(ForeignKeyAction::NoAction),
                    )
                    .to_owned(),
            )
            .await?;

        // index on pivtoken for chain lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_recovery_tokens_pivtoken")
                    .table(RecoveryTokens::Table)
                    .col(RecoveryTokens::Pivtoken)
                    .to_owned(),
            )
            .await?;

        // index on recovery_configuration for fleet distribution queries
        manager
            .create_index(
                Index::create()
                    .name("idx_recovery_tokens_configuration")
                    .table(RecoveryTokens::Table)
                    .col(RecoveryTokens::RecoveryConfiguration)
                    .to_owned(),
            )
            .await?;

        // index on expired for the pruner
        manager
            .create_index(
                Index::create()
                    .name("idx_recovery_tokens_expired")
                    .table(RecoveryTokens::Table)
                    .col(RecoveryTokens::Expired)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RecoveryTokens::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum RecoveryTokens {
    Table,
    Uuid,
    Pivtoken,
    RecoveryConfiguration,
    Token,
    Created,
    Staged,
    Activated,
    Expired,
    V,
    Etag,
}
