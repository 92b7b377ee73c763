//! Migration to create the repos table.
//!
//! This migration creates the repos table which tracks every repository the
//! orchestrator keeps up to date, including its lifecycle state and optional
//! per-repo update configuration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Repos::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Repos::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Repos::Owner).text().not_null())
                    .col(ColumnDef::new(Repos::Name).text().not_null())
                    .col(
                        ColumnDef::new(Repos::State)
                            .text()
                            .not_null()
                            .default("collecting"),
                    )
                    .col(ColumnDef::new(Repos::Config).json_binary().null())
                    .col(ColumnDef::new(Repos::InstallationId).big_integer().null())
                    .col(ColumnDef::new(Repos::AddedBy).text().null())
                    .col(
                        ColumnDef::new(Repos::AddedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Repos::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one tracked row per (owner, name)
        manager
            .create_index(
                Index::create()
                    .name("idx_repos_owner_name_unique")
                    .table(Repos::Table)
                    .col(Repos::Owner)
                    .col(Repos::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // State scans for sweep/backlog views
        manager
            .create_index(
                Index::create()
                    .name("idx_repos_state")
                    .table(Repos::Table)
                    .col(Repos::State)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_repos_state").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_repos_owner_name_unique").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Repos::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Repos {
    Table,
    Id,
    Owner,
    Name,
    State,
    Config,
    InstallationId,
    AddedBy,
    AddedAt,
    UpdatedAt,
}
