//! # Repo Repository
//!
//! Repository operations for the repos table. The state machine lives here:
//! every lifecycle transition goes through a single conditional UPDATE so
//! concurrent triggers for the same repo resolve at the database rather than
//! in application locks.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::repo::{ActiveModel, Column, Entity, Model};
use crate::models::{RepoConfig, RepoState};

/// Repository for tracked-repo database operations
#[derive(Clone)]
pub struct RepoRepository {
    db: DatabaseConnection,
}

impl RepoRepository {
    /// Create a new RepoRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Track a repository, or refresh its config if it is already tracked.
    ///
    /// New rows are written with identical `added_at` and `updated_at` so a
    /// freshly tracked repo is claimable despite starting in `collecting`.
    pub async fn track(
        &self,
        owner: &str,
        name: &str,
        added_by: Option<&str>,
        config: Option<&RepoConfig>,
        installation_id: Option<i64>,
    ) -> Result<Model, OrchestratorError> {
        if let Some(config) = config {
            config.validate()?;
        }
        let stored = config.map(|c| c.to_stored()).transpose()?;

        if let Some(existing) = self.find(owner, name).await? {
            let mut active: ActiveModel = existing.into();
            if stored.is_some() {
                active.config = Set(stored);
            }
            if installation_id.is_some() {
                active.installation_id = Set(installation_id);
            }
            if let Some(login) = added_by {
                active.added_by = Set(Some(login.to_string()));
            }
            let updated = active.update(&self.db).await?;
            return Ok(updated);
        }

        let now = Utc::now().fixed_offset();
        let repo = ActiveModel {
            id: Set(Uuid::new_v4()),
            owner: Set(owner.to_string()),
            name: Set(name.to_string()),
            state: Set(RepoState::Collecting.as_str().to_string()),
            config: Set(stored),
            installation_id: Set(installation_id),
            added_by: Set(added_by.map(str::to_string)),
            added_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = repo.insert(&self.db).await?;
        tracing::info!(owner = %owner, name = %name, "repository tracked");
        Ok(inserted)
    }

    /// Remove a repository from tracking. Returns false if it was unknown.
    pub async fn untrack(&self, owner: &str, name: &str) -> Result<bool, OrchestratorError> {
        let result = Entity::delete_many()
            .filter(Column::Owner.eq(owner))
            .filter(Column::Name.eq(name))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn find(&self, owner: &str, name: &str) -> Result<Option<Model>, OrchestratorError> {
        let repo = Entity::find()
            .filter(Column::Owner.eq(owner))
            .filter(Column::Name.eq(name))
            .one(&self.db)
            .await?;
        Ok(repo)
    }

    pub async fn list_all(&self) -> Result<Vec<Model>, OrchestratorError> {
        Ok(Entity::find().all(&self.db).await?)
    }

    /// Repos tracked without an explicit update policy; these are covered by
    /// the daily daemon sweep instead of a per-repo trigger.
    pub async fn list_unconfigured(&self) -> Result<Vec<Model>, OrchestratorError> {
        let repos = Entity::find()
            .filter(Column::Config.is_null())
            .all(&self.db)
            .await?;
        Ok(repos)
    }

    /// Atomically claim a repo for an update run.
    ///
    /// The claim succeeds when the repo is in a terminal state, or when it is
    /// still in its initial `collecting` state and no run has ever touched it
    /// (`updated_at` equals `added_at`). Exactly one of any set of concurrent
    /// claimers wins; the rest observe zero affected rows.
    pub async fn claim_for_update(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<bool, OrchestratorError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::State, Expr::value(RepoState::Collecting.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Owner.eq(owner))
            .filter(Column::Name.eq(name))
            .filter(
                Condition::any()
                    .add(
                        Column::State
                            .is_in([RepoState::Done.as_str(), RepoState::Error.as_str()]),
                    )
                    .add(
                        Condition::all()
                            .add(Column::State.eq(RepoState::Collecting.as_str()))
                            .add(Expr::col(Column::UpdatedAt).eq(Expr::col(Column::AddedAt))),
                    ),
            )
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Record a lifecycle transition for a repo an update run already owns.
    pub async fn set_state(
        &self,
        owner: &str,
        name: &str,
        state: RepoState,
    ) -> Result<(), OrchestratorError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::State, Expr::value(state.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Owner.eq(owner))
            .filter(Column::Name.eq(name))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(OrchestratorError::repo_not_found(owner, name));
        }
        Ok(())
    }

    pub async fn get_state(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<RepoState>, OrchestratorError> {
        let repo = self.find(owner, name).await?;
        Ok(repo.and_then(|r| RepoState::parse(&r.state)))
    }

    /// Replace a repo's update policy. The policy is validated before the
    /// write so a bad cron expression never reaches the scheduler.
    pub async fn update_config(
        &self,
        owner: &str,
        name: &str,
        config: &RepoConfig,
    ) -> Result<Model, OrchestratorError> {
        config.validate()?;
        let repo = self
            .find(owner, name)
            .await?
            .ok_or_else(|| OrchestratorError::repo_not_found(owner, name))?;

        // updated_at is left alone: it records state transitions, and touching
        // it here would make a never-run repo unclaimable.
        let mut active: ActiveModel = repo.into();
        active.config = Set(Some(config.to_stored()?));
        let updated = active.update(&self.db).await?;
        Ok(updated)
    }
}
