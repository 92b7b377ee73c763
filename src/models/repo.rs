//! Repo entity model
//!
//! This module contains the SeaORM entity model for the repos table, which
//! tracks every repository the orchestrator keeps up to date along with its
//! lifecycle state and optional per-repo update configuration.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Repo entity representing a tracked repository and its update lifecycle
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "repos")]
pub struct Model {
    /// Unique identifier for the tracked repository (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// GitHub owner login (unique together with name)
    pub owner: String,

    /// GitHub repository name (unique together with owner)
    pub name: String,

    /// Lifecycle state (collecting|training|done|error)
    pub state: String,

    /// Per-repo update configuration; absent rows are swept by the daemon job
    #[sea_orm(column_type = "JsonBinary")]
    pub config: Option<JsonValue>,

    /// GitHub App installation bound to this repository, if any
    pub installation_id: Option<i64>,

    /// Login of the user who tracked the repository
    pub added_by: Option<String>,

    /// Timestamp when the repository was first tracked
    pub added_at: DateTimeWithTimeZone,

    /// Timestamp of the last lifecycle state transition
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle states of a tracked repository.
///
/// `Collecting` and `Training` mean an update run is in flight; `Done` and
/// `Error` are the terminal states a new trigger may restart from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoState {
    Collecting,
    Training,
    Done,
    Error,
}

impl RepoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoState::Collecting => "collecting",
            RepoState::Training => "training",
            RepoState::Done => "done",
            RepoState::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "collecting" => Some(RepoState::Collecting),
            "training" => Some(RepoState::Training),
            "done" => Some(RepoState::Done),
            "error" => Some(RepoState::Error),
            _ => None,
        }
    }

    /// True while an update run owns this repository.
    pub fn is_running(&self) -> bool {
        matches!(self, RepoState::Collecting | RepoState::Training)
    }
}

impl std::fmt::Display for RepoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
