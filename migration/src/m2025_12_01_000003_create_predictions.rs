//! Migration to create the predictions table.
//!
//! One row per (repo, issue, newcomer threshold) with the predicted
//! good-first-issue probability and the label/comment bookkeeping flags used
//! by the labeling stage.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Predictions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Predictions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Predictions::Owner).text().not_null())
                    .col(ColumnDef::new(Predictions::Name).text().not_null())
                    .col(ColumnDef::new(Predictions::Number).integer().not_null())
                    .col(
                        ColumnDef::new(Predictions::Threshold)
                            .small_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Predictions::Probability).double().not_null())
                    .col(
                        ColumnDef::new(Predictions::State)
                            .text()
                            .not_null()
                            .default("open"),
                    )
                    .col(
                        ColumnDef::new(Predictions::Tagged)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Predictions::Commented)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Predictions::LastUpdated)
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
                    .name("idx_predictions_repo_issue_threshold_unique")
                    .table(Predictions::Table)
                    .col(Predictions::Owner)
                    .col(Predictions::Name)
                    .col(Predictions::Number)
                    .col(Predictions::Threshold)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Labeling stage scans open, untagged predictions per repo/threshold
        manager
            .create_index(
                Index::create()
                    .name("idx_predictions_repo_threshold_state")
                    .table(Predictions::Table)
                    .col(Predictions::Owner)
                    .col(Predictions::Name)
                    .col(Predictions::Threshold)
                    .col(Predictions::State)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_predictions_repo_threshold_state")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_predictions_repo_issue_threshold_unique")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Predictions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Predictions {
    Table,
    Id,
    Owner,
    Name,
    Number,
    Threshold,
    Probability,
    State,
    Tagged,
    Commented,
    LastUpdated,
}
