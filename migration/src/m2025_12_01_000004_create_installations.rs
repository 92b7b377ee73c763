//! Migration to create the installations table.
//!
//! Caches GitHub App installation tokens so the labeling stage can reuse a
//! write-scoped credential until it nears expiry.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Installations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Installations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Installations::InstallationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Installations::Login).text().not_null())
                    .col(ColumnDef::new(Installations::Token).text().not_null())
                    .col(
                        ColumnDef::new(Installations::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Installations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Installations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_installations_installation_id_unique")
                    .table(Installations::Table)
                    .col(Installations::InstallationId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_installations_installation_id_unique")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Installations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Installations {
    Table,
    Id,
    InstallationId,
    Login,
    Token,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}
