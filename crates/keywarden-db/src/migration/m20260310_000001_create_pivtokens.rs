//! create pivtokens table migration

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Pivtokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Pivtokens::Guid)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Pivtokens::CnUuid).string_len(36).not_null())
                    .col(ColumnDef::new(Pivtokens::Serial).string())
                    .col(ColumnDef::new(Pivtokens::Model).string())
                    .col(ColumnDef::new(Pivtokens::Pubkeys).text().not_null())
                    .col(ColumnDef::new(Pivtokens::Attestation).text())
                    .col(ColumnDef::new(Pivtokens::Pin).string().not_null())
                    .col(
                        ColumnDef::new(Pivtokens::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Pivtokens::V).integer().not_null().default(1))
                    .col(ColumnDef::new(Pivtokens::Etag).string_len(16).not_null())
                    .to_owned(),
            )
            .await?;

        // index on cn_uuid for list-by-compute-node lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_pivtokens_cn_uuid")
                    .table(Pivtokens::Table)
                    .col(Pivtokens::CnUuid)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Pivtokens::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Pivtokens {
    Table,
    Guid,
    CnUuid,
    Serial,
    Model,
    Pubkeys,
    Attestation,
    Pin,
    Created,
    V,
    Etag,
}
