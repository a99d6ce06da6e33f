pub use sea_orm_migration::prelude::*;

mod m20261016_000001_create_identity_tables;
mod m20261016_000002_create_resource_catalog;
mod m20261016_000003_create_persisted_grant;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261016_000001_create_identity_tables::Migration),
            Box::new(m20261016_000002_create_resource_catalog::Migration),
            Box::new(m20261016_000003_create_persisted_grant::Migration),
        ]
    }
}
