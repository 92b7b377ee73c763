//! # Batch Coordinator
//!
//! Full-corpus sweep: run the update pipeline over every tracked repo at
//! once, typically at startup or after a model change. Valid credentials are
//! resolved once up front and dealt round-robin across repos, and each
//! worker runs on its own database connection rather than sharing the
//! coordinator's pool.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::credentials::{CredentialPool, round_robin};
use crate::error::OrchestratorError;
use crate::pipeline::{PipelineRunner, RunOutcome};
use crate::repositories::RepoRepository;

/// Supplies each batch worker with a pipeline runner bound to a fresh
/// database connection.
#[async_trait]
pub trait WorkerRunnerProvider: Send + Sync {
    async fn runner(&self) -> Result<Arc<PipelineRunner>, OrchestratorError>;
}

/// Production provider: every worker gets a runner over its own single
/// connection opened through [`crate::db::worker_connection`].
pub struct FreshConnectionRunnerProvider {
    pub config: Arc<AppConfig>,
    pub pool: Arc<CredentialPool>,
    pub fetcher: Arc<dyn crate::collaborators::SourceDataFetcher>,
    pub builder: Arc<dyn crate::collaborators::DatasetBuilder>,
    pub predictor: Arc<dyn crate::collaborators::Predictor>,
    pub labeler: Arc<dyn crate::collaborators::IssueLabeler>,
}

#[async_trait]
impl WorkerRunnerProvider for FreshConnectionRunnerProvider {
    async fn runner(&self) -> Result<Arc<PipelineRunner>, OrchestratorError> {
        let conn = crate::db::worker_connection(&self.config).await?;
        let since = chrono::NaiveDate::parse_from_str(
            &self.config.pipeline.dataset_since,
            "%Y-%m-%d",
        )
        .map_err(|_| crate::config::ConfigError::InvalidDatasetSince {
            value: self.config.pipeline.dataset_since.clone(),
        })?;
        Ok(Arc::new(PipelineRunner::new(
            conn,
            self.pool.clone(),
            self.fetcher.clone(),
            self.builder.clone(),
            self.predictor.clone(),
            self.labeler.clone(),
            since,
        )))
    }
}

/// Tally of one batch sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Coordinates a bounded-concurrency sweep over every tracked repo.
pub struct BatchCoordinator {
    config: Arc<AppConfig>,
    repos: RepoRepository,
    pool: Arc<CredentialPool>,
    provider: Arc<dyn WorkerRunnerProvider>,
}

impl BatchCoordinator {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        pool: Arc<CredentialPool>,
        provider: Arc<dyn WorkerRunnerProvider>,
    ) -> Self {
        Self {
            config,
            repos: RepoRepository::new(db),
            pool,
            provider,
        }
    }

    /// Run the sweep. Fails fast before dispatching any work when the
    /// credential pool is empty.
    pub async fn sweep(&self) -> Result<BatchSummary, OrchestratorError> {
        let repos = self.repos.list_all().await?;
        let tokens = self.pool.valid_tokens().await?;
        if tokens.is_empty() {
            return Err(OrchestratorError::NoValidCredential);
        }

        let total = repos.len();
        info!(
            repos = total,
            tokens = tokens.len(),
            workers = self.config.batch.workers,
            "batch sweep starting"
        );
        let started = Instant::now();

        let semaphore = Arc::new(Semaphore::new(self.config.batch.workers as usize));
        let mut handles = Vec::with_capacity(total);

        for (index, repo) in repos.into_iter().enumerate() {
            // Pool is non-empty, so the assignment always resolves.
            let Some(token) = round_robin(&tokens, index).cloned() else {
                break;
            };
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let provider = self.provider.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let runner = provider.runner().await?;
                runner
                    .run_update_with(&repo.owner, &repo.name, Some(&token))
                    .await
            }));
        }

        let mut summary = BatchSummary {
            total,
            ..BatchSummary::default()
        };
        for handle in handles {
            match handle.await {
                Ok(Ok(RunOutcome::Completed)) => summary.completed += 1,
                Ok(Ok(RunOutcome::Skipped)) => summary.skipped += 1,
                Ok(Err(e)) => {
                    summary.failed += 1;
                    warn!(error = %e, "batch worker run failed");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "batch worker panicked");
                }
            }
        }

        counter!("batch_sweeps_total").increment(1);
        counter!("batch_repos_failed_total").increment(summary.failed as u64);
        histogram!("batch_sweep_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch sweep finished"
        );

        Ok(summary)
    }
}
