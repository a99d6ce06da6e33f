//! Creates the read-mostly resource catalog (API and identity resources).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiResource::Table)
                    .col(
                        ColumnDef::new(ApiResource::Name)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ApiResource::DisplayName).string().not_null())
                    .col(ColumnDef::new(ApiResource::Description).text().null())
                    .col(ColumnDef::new(ApiResource::Scopes).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(IdentityResource::Table)
                    .col(
                        ColumnDef::new(IdentityResource::Name)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IdentityResource::DisplayName)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IdentityResource::Description).text().null())
                    .col(
                        ColumnDef::new(IdentityResource::ClaimTypes)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IdentityResource::Required)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IdentityResource::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ApiResource::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum ApiResource {
    Table,
    Name,
    DisplayName,
    Description,
    Scopes,
}

#[derive(DeriveIden)]
enum IdentityResource {
    Table,
    Name,
    DisplayName,
    Description,
    ClaimTypes,
    Required,
}
