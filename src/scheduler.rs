//! # Trigger Scheduler
//!
//! Background task that keeps one jittered cron trigger per configured repo
//! plus a daily daemon sweep over repos tracked without an explicit policy.
//! Jobs live in an in-memory map keyed by a stable id; registering a job
//! under an existing id replaces it, so a manual trigger always supersedes a
//! pending one instead of stacking.
//!
//! Fire times are pure functions of the cron expression, the reference
//! instant, and an injected RNG for the jitter, which keeps the cadence
//! logic testable without a clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use rand::Rng;
use sea_orm::DatabaseConnection;
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AppConfig;
use crate::cron::CronExpr;
use crate::error::OrchestratorError;
use crate::models::RepoConfig;
use crate::models::repo::Model as RepoModel;
use crate::pipeline::PipelineRunner;
use crate::repositories::RepoRepository;

/// Job id of the daily sweep over unconfigured repos.
pub const DAEMON_JOB_ID: &str = "gfibot-daemon";

pub fn update_job_id(owner: &str, name: &str) -> String {
    format!("{}-{}-update", owner, name)
}

pub fn manual_update_job_id(owner: &str, name: &str) -> String {
    format!("{}-{}-manual-update", owner, name)
}

pub fn manual_tag_job_id(owner: &str, name: &str) -> String {
    format!("{}-{}-manual-tag", owner, name)
}

/// What a scheduled job does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Full update pipeline for one repo.
    Update { owner: String, name: String },
    /// Labeling pass only.
    LabelPass { owner: String, name: String },
    /// Sequential update sweep over every repo without an explicit policy.
    DaemonSweep,
}

/// One entry in the scheduler's job map.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub id: String,
    pub kind: JobKind,
    pub next_fire: DateTime<Utc>,
    /// Recurring jobs carry their cron; one-shot jobs are removed after
    /// firing.
    pub cron: Option<CronExpr>,
}

/// Shared, mutable view of the scheduler's job map.
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job, replacing any existing job with the same id.
    pub fn upsert(&self, job: ScheduledJob) {
        let mut jobs = self.jobs.lock().expect("scheduler job map poisoned");
        if jobs.insert(job.id.clone(), job.clone()).is_some() {
            debug!(job_id = %job.id, "replaced existing scheduled job");
        }
        gauge!("scheduler_jobs_gauge").set(jobs.len() as f64);
    }

    /// Remove a job by id. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock().expect("scheduler job map poisoned");
        let removed = jobs.remove(id).is_some();
        gauge!("scheduler_jobs_gauge").set(jobs.len() as f64);
        removed
    }

    /// Drop every job belonging to a repo when it is untracked.
    pub fn remove_repo_jobs(&self, owner: &str, name: &str) {
        self.remove(&update_job_id(owner, name));
        self.remove(&manual_update_job_id(owner, name));
        self.remove(&manual_tag_job_id(owner, name));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs
            .lock()
            .expect("scheduler job map poisoned")
            .contains_key(id)
    }

    pub fn next_fire(&self, id: &str) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .expect("scheduler job map poisoned")
            .get(id)
            .map(|j| j.next_fire)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().expect("scheduler job map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect jobs due at `now`. Recurring jobs are rescheduled with fresh
    /// jitter; one-shot jobs leave the map.
    fn take_due<R: Rng + ?Sized>(
        &self,
        now: DateTime<Utc>,
        jitter_max_seconds: u64,
        rng: &mut R,
    ) -> Vec<ScheduledJob> {
        let mut jobs = self.jobs.lock().expect("scheduler job map poisoned");
        let due_ids: Vec<String> = jobs
            .values()
            .filter(|j| j.next_fire <= now)
            .map(|j| j.id.clone())
            .collect();

        let mut due = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            let Some(job) = jobs.get(&id) else { continue };
            let fired = job.clone();
            match &fired.cron {
                Some(expr) => match jittered_next_fire(expr, now, jitter_max_seconds, rng) {
                    Some(next) => {
                        if let Some(job) = jobs.get_mut(&id) {
                            job.next_fire = next;
                        }
                    }
                    None => {
                        warn!(job_id = %id, "cron expression never fires again, dropping job");
                        jobs.remove(&id);
                    }
                },
                None => {
                    jobs.remove(&id);
                }
            }
            due.push(fired);
        }

        gauge!("scheduler_jobs_gauge").set(jobs.len() as f64);
        due
    }
}

/// Background scheduler service.
pub struct TriggerScheduler {
    config: Arc<AppConfig>,
    repos: RepoRepository,
    pipeline: Arc<PipelineRunner>,
    handle: SchedulerHandle,
}

impl TriggerScheduler {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        pipeline: Arc<PipelineRunner>,
        handle: SchedulerHandle,
    ) -> Self {
        Self {
            config,
            repos: RepoRepository::new(db),
            pipeline,
            handle,
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        info!("Starting trigger scheduler");
        self.bootstrap().await?;

        let tick_interval = TokioDuration::from_secs(self.config.scheduler.tick_interval_seconds);
        let workers = Arc::new(Semaphore::new(
            self.config.scheduler.worker_concurrency as usize,
        ));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Trigger scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    self.tick(&workers).await;
                    histogram!("scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Trigger scheduler stopped");
        Ok(())
    }

    /// Seed the job map from the database: one cron trigger per configured
    /// repo plus the daemon sweep.
    async fn bootstrap(&self) -> Result<(), OrchestratorError> {
        let repos = self.repos.list_all().await?;
        let daemon_cron = CronExpr::parse(&self.config.scheduler.daemon_cron).map_err(|source| {
            OrchestratorError::invalid_cron(&self.config.scheduler.daemon_cron, source)
        })?;

        let mut rng = rand::thread_rng();
        let jobs = bootstrap_jobs(
            &repos,
            &daemon_cron,
            self.config.scheduler.daemon_init,
            Utc::now(),
            self.config.scheduler.jitter_max_seconds,
            &mut rng,
        );

        let count = jobs.len();
        for job in jobs {
            self.handle.upsert(job);
        }
        info!(jobs = count, "trigger scheduler bootstrapped");
        Ok(())
    }

    async fn tick(&self, workers: &Arc<Semaphore>) {
        let mut rng = rand::thread_rng();
        let due = self.handle.take_due(
            Utc::now(),
            self.config.scheduler.jitter_max_seconds,
            &mut rng,
        );
        drop(rng);

        for job in due {
            counter!("scheduler_jobs_fired_total").increment(1);

            // The permit is acquired inside the task: a full worker pool must
            // delay the run, not the tick loop.
            let workers = workers.clone();
            let pipeline = self.pipeline.clone();
            let repos = self.repos.clone();
            tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    // Closed only at shutdown.
                    return;
                };
                run_job(&job, pipeline.as_ref(), &repos).await;
            });
        }
    }
}

async fn run_job(job: &ScheduledJob, pipeline: &PipelineRunner, repos: &RepoRepository) {
    debug!(job_id = %job.id, "scheduled job firing");
    match &job.kind {
        JobKind::Update { owner, name } => {
            if let Err(e) = pipeline.run_update(owner, name).await {
                error!(job_id = %job.id, error = %e, "scheduled update failed");
            }
        }
        JobKind::LabelPass { owner, name } => {
            if let Err(e) = pipeline.run_label_pass(owner, name).await {
                error!(job_id = %job.id, error = %e, "scheduled labeling pass failed");
            }
        }
        JobKind::DaemonSweep => {
            let unconfigured = match repos.list_unconfigured().await {
                Ok(repos) => repos,
                Err(e) => {
                    error!(error = %e, "daemon sweep failed to list repos");
                    return;
                }
            };
            info!(repos = unconfigured.len(), "daemon sweep starting");
            for repo in unconfigured {
                if let Err(e) = pipeline.run_update(&repo.owner, &repo.name).await {
                    error!(owner = %repo.owner, name = %repo.name, error = %e,
                        "daemon sweep update failed, continuing");
                }
            }
        }
    }
}

/// Build the bootstrap job set for the given repos.
///
/// Repos carrying a config get their own cron trigger; the rest are covered
/// by the daemon sweep. With `daemon_init` the sweep fires on the first tick
/// instead of waiting for its next cron fire.
fn bootstrap_jobs<R: Rng + ?Sized>(
    repos: &[RepoModel],
    daemon_cron: &CronExpr,
    daemon_init: bool,
    now: DateTime<Utc>,
    jitter_max_seconds: u64,
    rng: &mut R,
) -> Vec<ScheduledJob> {
    let mut jobs = Vec::new();

    for repo in repos {
        if repo.config.is_none() {
            continue;
        }
        let config = match RepoConfig::from_stored(repo.config.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!(owner = %repo.owner, name = %repo.name, error = %e,
                    "skipping repo with malformed config");
                continue;
            }
        };
        let expr = match CronExpr::parse(&config.update_cron) {
            Ok(expr) => expr,
            Err(e) => {
                warn!(owner = %repo.owner, name = %repo.name, error = %e,
                    "skipping repo with invalid cron");
                continue;
            }
        };
        if let Some(job) =
            periodic_update_job(&repo.owner, &repo.name, expr, now, jitter_max_seconds, rng)
        {
            jobs.push(job);
        }
    }

    let daemon_next_fire = if daemon_init {
        Some(now)
    } else {
        jittered_next_fire(daemon_cron, now, jitter_max_seconds, rng)
    };
    if let Some(next_fire) = daemon_next_fire {
        jobs.push(ScheduledJob {
            id: DAEMON_JOB_ID.to_string(),
            kind: JobKind::DaemonSweep,
            next_fire,
            cron: Some(daemon_cron.clone()),
        });
    }

    jobs
}

/// Build the recurring update trigger for one repo from its policy cron.
/// Returns None when the expression never fires again.
pub fn periodic_update_job<R: Rng + ?Sized>(
    owner: &str,
    name: &str,
    expr: CronExpr,
    now: DateTime<Utc>,
    jitter_max_seconds: u64,
    rng: &mut R,
) -> Option<ScheduledJob> {
    let next_fire = jittered_next_fire(&expr, now, jitter_max_seconds, rng)?;
    Some(ScheduledJob {
        id: update_job_id(owner, name),
        kind: JobKind::Update {
            owner: owner.to_string(),
            name: name.to_string(),
        },
        next_fire,
        cron: Some(expr),
    })
}

/// Next fire time for a cron job: the cron's next fire time pushed forward
/// by a uniform random delay in `[0, jitter_max_seconds]`.
fn jittered_next_fire<R: Rng + ?Sized>(
    expr: &CronExpr,
    after: DateTime<Utc>,
    jitter_max_seconds: u64,
    rng: &mut R,
) -> Option<DateTime<Utc>> {
    let base = expr.next_fire_time(after)?;
    let jitter = compute_jitter_seconds(jitter_max_seconds, rng);
    base.checked_add_signed(Duration::seconds(jitter as i64))
}

fn compute_jitter_seconds<R: Rng + ?Sized>(jitter_max_seconds: u64, rng: &mut R) -> u64 {
    if jitter_max_seconds == 0 {
        return 0;
    }
    rng.gen_range(0..=jitter_max_seconds)
}
