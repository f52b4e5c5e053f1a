//! create recovery_configurations table migration

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RecoveryConfigurations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecoveryConfigurations::Uuid)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RecoveryConfigurations::Template)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecoveryConfigurations::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecoveryConfigurations::Staged)
                            .timestamp_with_time_zone(),
                    )
                    .col(
                        ColumnDef::new(RecoveryConfigurations::Activated)
                            .timestamp_with_time_zone(),
                    )
                    .col(
                        ColumnDef::new(RecoveryConfigurations::Expired)
                            .timestamp_with_time_zone(),
                    )
                    .col(
                        ColumnDef::new(RecoveryConfigurations::V)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(RecoveryConfigurations::Etag)
                            .string_len(16)
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // index for the active-configuration lookup (activated set, expired unset)
        manager
            .create_index(
                Index::create()
                    .name("idx_recovery_configurations_activated")
                    .table(RecoveryConfigurations::Table)
                    .col(RecoveryConfigurations::Activated)
                    .col(RecoveryConfigurations::Expired)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RecoveryConfigurations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum RecoveryConfigurations {
    Table,
    Uuid,
    Template,
    Created,
    Staged,
    Activated,
    Expired,
    V,
    Etag,
}
