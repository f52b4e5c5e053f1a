//! database migrations for keywarden.

pub use sea_orm_migration::prelude::*;

mod m20260310_000001_create_pivtokens;
mod m20260310_000002_create_recovery_configurations;
mod m20260310_000003_create_recovery_tokens;
mod m20260310_000004_create_transitions;
mod m20260310_000005_create_pivtoken_history;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260310_000001_create_pivtokens::Migration),
            Box::new(m20260310_000002_create_recovery_configurations::Migration),
            Box::new(m20260310_000003_create_recovery_tokens::Migration),
            Box::new(m20260310_000004_create_transitions::Migration),
            Box::new(m20260310_000005_create_pivtoken_history::Migration),
        ]
    }
}
