//! create pivtoken_history table migration

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PivtokenHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PivtokenHistory::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PivtokenHistory::Guid)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PivtokenHistory::Record).text().not_null())
                    .col(
                        ColumnDef::new(PivtokenHistory::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PivtokenHistory::DeletedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PivtokenHistory::V)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(PivtokenHistory::Etag)
                            .string_len(16)
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // index on guid for restore lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_pivtoken_history_guid")
                    .table(PivtokenHistory::Table)
                    .col(PivtokenHistory::Guid)
                    .to_owned(),
            )
            .await?;

        // index on deleted_at for retention pruning
        manager
            .create_index(
                Index::create()
                    .name("idx_pivtoken_history_deleted_at")
                    .table(PivtokenHistory::Table)
                    .col(PivtokenHistory::DeletedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PivtokenHistory::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum PivtokenHistory {
    Table,
    Id,
    Guid,
    Record,
    Created,
    DeletedAt,
    V,
    Etag,
}
