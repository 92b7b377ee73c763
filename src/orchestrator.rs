//! # Orchestrator Facade
//!
//! The operations callers use to manage tracked repositories: track and
//! untrack, request immediate update or labeling runs, inspect lifecycle
//! state, and replace update policies. Mutations keep the database and the
//! scheduler's job map in step.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use tracing::info;

use crate::cron::CronExpr;
use crate::error::OrchestratorError;
use crate::models::repo::Model as RepoModel;
use crate::models::{RepoConfig, RepoState};
use crate::pipeline::PipelineRunner;
use crate::repositories::{PredictionRepository, RepoRepository};
use crate::scheduler::{
    JobKind, ScheduledJob, SchedulerHandle, manual_tag_job_id, manual_update_job_id,
};

/// Facade over tracking, triggering, and state inspection.
pub struct Orchestrator {
    repos: RepoRepository,
    predictions: PredictionRepository,
    pipeline: Arc<PipelineRunner>,
    scheduler: SchedulerHandle,
    jitter_max_seconds: u64,
}

impl Orchestrator {
    pub fn new(
        db: DatabaseConnection,
        pipeline: Arc<PipelineRunner>,
        scheduler: SchedulerHandle,
        jitter_max_seconds: u64,
    ) -> Self {
        Self {
            repos: RepoRepository::new(db.clone()),
            predictions: PredictionRepository::new(db),
            pipeline,
            scheduler,
            jitter_max_seconds,
        }
    }

    /// Start tracking a repository.
    ///
    /// A repo tracked with a config gets its own periodic trigger; without
    /// one it is covered by the daemon sweep. Tracking an already tracked
    /// repo refreshes its config and trigger instead of duplicating either.
    pub async fn track_repository(
        &self,
        owner: &str,
        name: &str,
        added_by: Option<&str>,
        config: Option<&RepoConfig>,
        installation_id: Option<i64>,
    ) -> Result<RepoModel, OrchestratorError> {
        let repo = self
            .repos
            .track(owner, name, added_by, config, installation_id)
            .await?;

        if let Some(config) = config {
            self.schedule_periodic_update(owner, name, config)?;
        }

        Ok(repo)
    }

    /// Stop tracking a repository, dropping its predictions and any
    /// scheduled jobs. Returns false when the repo was not tracked.
    pub async fn untrack_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<bool, OrchestratorError> {
        self.scheduler.remove_repo_jobs(owner, name);
        self.predictions.delete_for_repo(owner, name).await?;
        let removed = self.repos.untrack(owner, name).await?;
        if removed {
            info!(owner, name, "repository untracked");
        }
        Ok(removed)
    }

    /// Queue a full update run to fire on the next scheduler tick.
    ///
    /// Re-requesting replaces the pending manual job rather than stacking a
    /// second one; whether the run actually executes is still decided by the
    /// state machine when the job fires.
    pub async fn request_immediate_update(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.require_tracked(owner, name).await?;
        self.scheduler.upsert(ScheduledJob {
            id: manual_update_job_id(owner, name),
            kind: JobKind::Update {
                owner: owner.to_string(),
                name: name.to_string(),
            },
            next_fire: Utc::now(),
            cron: None,
        });
        Ok(())
    }

    /// Queue a labeling-only pass to fire on the next scheduler tick.
    pub async fn request_immediate_label_pass(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.require_tracked(owner, name).await?;
        self.scheduler.upsert(ScheduledJob {
            id: manual_tag_job_id(owner, name),
            kind: JobKind::LabelPass {
                owner: owner.to_string(),
                name: name.to_string(),
            },
            next_fire: Utc::now(),
            cron: None,
        });
        Ok(())
    }

    /// Current lifecycle state of a tracked repository.
    pub async fn get_state(&self, owner: &str, name: &str) -> Result<RepoState, OrchestratorError> {
        self.repos
            .get_state(owner, name)
            .await?
            .ok_or_else(|| OrchestratorError::repo_not_found(owner, name))
    }

    /// Replace a repo's update policy and reschedule its trigger.
    pub async fn update_config(
        &self,
        owner: &str,
        name: &str,
        config: &RepoConfig,
    ) -> Result<RepoModel, OrchestratorError> {
        let repo = self.repos.update_config(owner, name, config).await?;
        self.schedule_periodic_update(owner, name, config)?;
        Ok(repo)
    }

    /// Run an update synchronously instead of through the scheduler.
    pub async fn run_update_now(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<crate::pipeline::RunOutcome, OrchestratorError> {
        self.pipeline.run_update(owner, name).await
    }

    async fn require_tracked(&self, owner: &str, name: &str) -> Result<(), OrchestratorError> {
        if self.repos.find(owner, name).await?.is_none() {
            return Err(OrchestratorError::repo_not_found(owner, name));
        }
        Ok(())
    }

    fn schedule_periodic_update(
        &self,
        owner: &str,
        name: &str,
        config: &RepoConfig,
    ) -> Result<(), OrchestratorError> {
        let expr = CronExpr::parse(&config.update_cron)
            .map_err(|source| OrchestratorError::invalid_cron(&config.update_cron, source))?;
        let mut rng = rand::thread_rng();
        if let Some(job) = crate::scheduler::periodic_update_job(
            owner,
            name,
            expr,
            Utc::now(),
            self.jitter_max_seconds,
            &mut rng,
        ) {
            self.scheduler.upsert(job);
        }
        Ok(())
    }
}
