//! create recovery_configuration_transitions table migration

use sea_orm_migration::prelude::*;

use super::m20260310_000002_create_recovery_configurations::RecoveryConfigurations;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Transitions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transitions::Uuid)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Transitions::RecoveryConfigUuid)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transitions::Name).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Transitions::Targets)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Transitions::Completed)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Transitions::Taskids)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Transitions::Errs)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Transitions::Concurrency)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transitions::Standalone)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Transitions::Forced)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Transitions::LockedBy).string_len(36))
                    .col(
                        ColumnDef::new(Transitions::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transitions::Started).timestamp_with_time_zone())
                    .col(ColumnDef::new(Transitions::Finished).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Transitions::Aborted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Transitions::V)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Transitions::Etag)
                            .string_len(16)
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_transitions_configuration")
                            .from(Transitions::Table, Transitions::RecoveryConfigUuid)
                            .to(RecoveryConfigurations::Table, RecoveryConfigurations::Uuid)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // index on recovery_config_uuid for per-configuration lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_transitions_config")
                    .table(Transitions::Table)
                    .col(Transitions::RecoveryConfigUuid)
                    .to_owned(),
            )
            .await?;

        // index on finished for the orchestrator's pending pick
        manager
            .create_index(
                Index::create()
                    .name("idx_transitions_finished")
                    .table(Transitions::Table)
                    .col(Transitions::Finished)
                    .col(Transitions::Created)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Transitions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Transitions {
    #[sea_orm(iden = "recovery_configuration_transitions")]
    Table,
    Uuid,
    RecoveryConfigUuid,
    Name,
    Targets,
    Completed,
    Taskids,
    Errs,
    Concurrency,
    Standalone,
    Forced,
    LockedBy,
    Created,
    Started,
    Finished,
    Aborted,
    V,
    Etag,
}
