//! Creates the persisted grant store.
//!
//! Backs authorization codes and refresh tokens. Rows are keyed by the SHA-256
//! of the handle handed to the client and are removed by the token cleanup
//! task once `expires_at` has passed.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PersistedGrant::Table)
                    .col(
                        ColumnDef::new(PersistedGrant::Key)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PersistedGrant::GrantType)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PersistedGrant::ClientId).string().not_null())
                    .col(ColumnDef::new(PersistedGrant::SubjectId).string().not_null())
                    .col(
                        ColumnDef::new(PersistedGrant::FamilyId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PersistedGrant::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PersistedGrant::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PersistedGrant::ConsumedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(PersistedGrant::Data).text().not_null())
                    .to_owned(),
            )
            .await?;

        // Cleanup scans by expiry
        manager
            .create_index(
                Index::create()
                    .name("idx_persisted_grant_expires_at")
                    .table(PersistedGrant::Table)
                    .col(PersistedGrant::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_persisted_grant_family_id")
                    .table(PersistedGrant::Table)
                    .col(PersistedGrant::FamilyId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_persisted_grant_subject_client")
                    .table(PersistedGrant::Table)
                    .col(PersistedGrant::SubjectId)
                    .col(PersistedGrant::ClientId)
                    .col(PersistedGrant::GrantType)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_persisted_grant_subject_client")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_persisted_grant_family_id").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_persisted_grant_expires_at")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(PersistedGrant::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum PersistedGrant {
    Table,
    Key,
    GrantType,
    ClientId,
    SubjectId,
    FamilyId,
    CreatedAt,
    ExpiresAt,
    ConsumedAt,
    Data,
}
