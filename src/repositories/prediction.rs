//! # Prediction Repository
//!
//! Repository operations for the predictions table: one row per
//! (repo, issue, newcomer threshold), written by the predict stage and read
//! back by the labeling pass.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::prediction::{ActiveModel, Column, Entity, Model};

/// Repository for prediction database operations
pub struct PredictionRepository {
    db: DatabaseConnection,
}

impl PredictionRepository {
    /// Create a new PredictionRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert or refresh the prediction for one issue at one threshold.
    ///
    /// Refreshing keeps the `tagged`/`commented` flags so a later labeling
    /// pass never re-touches an issue it already handled.
    pub async fn upsert(
        &self,
        owner: &str,
        name: &str,
        number: i32,
        threshold: i16,
        probability: f64,
        issue_state: &str,
    ) -> Result<Model, OrchestratorError> {
        let now = Utc::now().fixed_offset();

        let existing = Entity::find()
            .filter(Column::Owner.eq(owner))
            .filter(Column::Name.eq(name))
            .filter(Column::Number.eq(number))
            .filter(Column::Threshold.eq(threshold))
            .one(&self.db)
            .await?;

        if let Some(existing) = existing {
            let mut active: ActiveModel = existing.into();
            active.probability = Set(probability);
            active.state = Set(issue_state.to_string());
            active.last_updated = Set(now);
            return Ok(active.update(&self.db).await?);
        }

        let prediction = ActiveModel {
            id: Set(Uuid::new_v4()),
            owner: Set(owner.to_string()),
            name: Set(name.to_string()),
            number: Set(number),
            threshold: Set(threshold),
            probability: Set(probability),
            state: Set(issue_state.to_string()),
            tagged: Set(false),
            commented: Set(false),
            last_updated: Set(now),
        };
        Ok(prediction.insert(&self.db).await?)
    }

    /// Open issues at the given threshold whose probability clears the bar,
    /// highest probability first.
    pub async fn list_labelable(
        &self,
        owner: &str,
        name: &str,
        threshold: i16,
        min_probability: f64,
    ) -> Result<Vec<Model>, OrchestratorError> {
        let predictions = Entity::find()
            .filter(Column::Owner.eq(owner))
            .filter(Column::Name.eq(name))
            .filter(Column::Threshold.eq(threshold))
            .filter(Column::State.eq("open"))
            .filter(Column::Probability.gte(min_probability))
            .order_by_desc(Column::Probability)
            .all(&self.db)
            .await?;
        Ok(predictions)
    }

    pub async fn mark_tagged(&self, id: Uuid) -> Result<(), OrchestratorError> {
        Entity::update_many()
            .col_expr(Column::Tagged, Expr::value(true))
            .col_expr(Column::LastUpdated, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn mark_commented(&self, id: Uuid) -> Result<(), OrchestratorError> {
        Entity::update_many()
            .col_expr(Column::Commented, Expr::value(true))
            .col_expr(Column::LastUpdated, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Drop every prediction for a repo when it is untracked.
    pub async fn delete_for_repo(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<u64, OrchestratorError> {
        let result = Entity::delete_many()
            .filter(Column::Owner.eq(owner))
            .filter(Column::Name.eq(name))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
