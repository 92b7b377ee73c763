//! Prediction entity model
//!
//! One row per (repo, issue, newcomer threshold) carrying the predicted
//! good-first-issue probability plus the label/comment bookkeeping flags.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Prediction entity for a single issue at a single newcomer threshold
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "predictions")]
pub struct Model {
    /// Unique identifier for the prediction row (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// GitHub owner login
    pub owner: String,

    /// GitHub repository name
    pub name: String,

    /// Issue number within the repository
    pub number: i32,

    /// Newcomer-experience threshold this prediction was computed at (1..=5)
    pub threshold: i16,

    /// Predicted probability that the issue is a good first issue
    pub probability: f64,

    /// Issue state as last observed (open|closed)
    pub state: String,

    /// Whether the configured label has been applied to the issue
    pub tagged: bool,

    /// Whether the explanatory comment has been posted
    pub commented: bool,

    /// Timestamp of the last prediction refresh or labeling update
    pub last_updated: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
