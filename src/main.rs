//! # GFI-Bot Orchestrator Main Entry Point
//!
//! Runs the trigger scheduler daemon by default; `gfibot batch` runs a
//! one-off full-corpus sweep instead.

use std::sync::Arc;

use gfibot::batch::{BatchCoordinator, FreshConnectionRunnerProvider};
use gfibot::collaborators::github::{AppCredentials, GithubClient};
use gfibot::collaborators::process::{
    CommandDatasetBuilder, CommandPredictor, CommandSourceDataFetcher,
};
use gfibot::collaborators::{
    CredentialHealthChecker, DatasetBuilder, InstallationTokenMinter, IssueLabeler, Predictor,
    SourceDataFetcher,
};
use gfibot::config::{AppConfig, ConfigError, ConfigLoader};
use gfibot::credentials::CredentialPool;
use gfibot::migration::{Migrator, MigratorTrait};
use gfibot::orchestrator::Orchestrator;
use gfibot::pipeline::PipelineRunner;
use gfibot::repositories::{InstallationRepository, UserRepository};
use gfibot::scheduler::{SchedulerHandle, TriggerScheduler};
use gfibot::{db, telemetry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from layered env files and variables
    let config_loader = ConfigLoader::new();
    let config = Arc::new(config_loader.load()?);

    telemetry::init_tracing(&config)?;
    info!(profile = %config.profile, "loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        info!(config = %redacted_json, "effective configuration");
    }

    let conn = db::init_pool(&config).await?;
    Migrator::up(&conn, None).await?;

    let app_credentials = match (&config.github_app_id, &config.github_app_private_key) {
        (Some(app_id), Some(private_key)) => Some(AppCredentials {
            app_id: app_id.clone(),
            private_key: private_key.clone(),
        }),
        _ => None,
    };
    let github = GithubClient::new(config.github_api_base.clone(), app_credentials.clone())?;

    let minter: Option<Arc<dyn InstallationTokenMinter>> = if app_credentials.is_some() {
        Some(Arc::new(github.clone()))
    } else {
        None
    };
    let pool = Arc::new(CredentialPool::new(
        config.tokens.clone(),
        UserRepository::new(conn.clone()),
        InstallationRepository::new(conn.clone()),
        Arc::new(github.clone()) as Arc<dyn CredentialHealthChecker>,
        minter,
    ));

    let fetcher: Arc<dyn SourceDataFetcher> = Arc::new(CommandSourceDataFetcher::new(
        config.pipeline.fetch_command.clone(),
    ));
    let builder: Arc<dyn DatasetBuilder> = Arc::new(CommandDatasetBuilder::new(
        config.pipeline.dataset_command.clone(),
    ));
    let predictor: Arc<dyn Predictor> = Arc::new(CommandPredictor::new(
        config.pipeline.predict_command.clone(),
    ));
    let labeler: Arc<dyn IssueLabeler> = Arc::new(github);

    let dataset_since = chrono::NaiveDate::parse_from_str(
        &config.pipeline.dataset_since,
        "%Y-%m-%d",
    )
    .map_err(|_| ConfigError::InvalidDatasetSince {
        value: config.pipeline.dataset_since.clone(),
    })?;

    let pipeline = Arc::new(PipelineRunner::new(
        conn.clone(),
        pool.clone(),
        fetcher.clone(),
        builder.clone(),
        predictor.clone(),
        labeler.clone(),
        dataset_since,
    ));

    if std::env::args().nth(1).as_deref() == Some("batch") {
        let provider = Arc::new(FreshConnectionRunnerProvider {
            config: config.clone(),
            pool: pool.clone(),
            fetcher,
            builder,
            predictor,
            labeler,
        });
        let coordinator = BatchCoordinator::new(config, conn, pool, provider);
        let summary = coordinator.sweep().await?;
        info!(
            total = summary.total,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch sweep done"
        );
        return Ok(());
    }

    let handle = SchedulerHandle::new();
    let orchestrator = Orchestrator::new(
        conn.clone(),
        pipeline.clone(),
        handle.clone(),
        config.scheduler.jitter_max_seconds,
    );
    seed_projects(&orchestrator, &config).await;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let scheduler = TriggerScheduler::new(config, conn, pipeline, handle);
    scheduler.run(shutdown).await?;
    Ok(())
}

/// Track the statically configured projects. These carry no per-repo policy,
/// so the daily daemon sweep covers them until one is set.
async fn seed_projects(orchestrator: &Orchestrator, config: &AppConfig) {
    for slug in &config.projects {
        let Some((owner, name)) = slug.split_once('/') else {
            warn!(slug = %slug, "skipping malformed project slug");
            continue;
        };
        if let Err(e) = orchestrator
            .track_repository(owner, name, None, None, None)
            .await
        {
            warn!(slug = %slug, error = %e, "failed to track configured project");
        }
    }
}
