//! # Update Pipeline
//!
//! The four-stage update run for one repository: fetch repository data,
//! rebuild the training dataset, train and predict across every newcomer
//! threshold, then optionally label and comment on the issues that cleared
//! the bar.
//!
//! The lifecycle state machine brackets the run: a claim moves the repo to
//! `collecting`, dataset completion moves it to `training`, and the run ends
//! in `done` or `error`. Stage failures fail the run, with two exceptions: a
//! credential-rejected fetch earns a single retry with a different token, and
//! labeling problems never fail a run that has already produced predictions.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tracing::{debug, error, info, warn};

use crate::collaborators::{DatasetBuilder, IssueLabeler, Predictor, SourceDataFetcher};
use crate::credentials::CredentialPool;
use crate::error::OrchestratorError;
use crate::models::repo::Model as RepoModel;
use crate::models::{RepoConfig, RepoState};
use crate::repositories::{PredictionRepository, RepoRepository};

/// Newcomer thresholds every update run predicts for.
pub const THRESHOLDS: std::ops::RangeInclusive<i16> = 1..=5;

/// How an update run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run executed the full pipeline.
    Completed,
    /// Another run already owned the repo; nothing was done.
    Skipped,
}

/// Runs the update pipeline for individual repositories.
pub struct PipelineRunner {
    repos: RepoRepository,
    predictions: PredictionRepository,
    pool: Arc<CredentialPool>,
    fetcher: Arc<dyn SourceDataFetcher>,
    builder: Arc<dyn DatasetBuilder>,
    predictor: Arc<dyn Predictor>,
    labeler: Arc<dyn IssueLabeler>,
    dataset_since: NaiveDate,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DatabaseConnection,
        pool: Arc<CredentialPool>,
        fetcher: Arc<dyn SourceDataFetcher>,
        builder: Arc<dyn DatasetBuilder>,
        predictor: Arc<dyn Predictor>,
        labeler: Arc<dyn IssueLabeler>,
        dataset_since: NaiveDate,
    ) -> Self {
        Self {
            repos: RepoRepository::new(db.clone()),
            predictions: PredictionRepository::new(db),
            pool,
            fetcher,
            builder,
            predictor,
            labeler,
            dataset_since,
        }
    }

    /// Run the full update pipeline for one repository.
    ///
    /// Returns `Skipped` without touching anything when another run already
    /// owns the repo. On failure the repo lands in `error` and the failure is
    /// returned to the caller.
    pub async fn run_update(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.run_update_with(owner, name, None).await
    }

    /// Like [`run_update`](Self::run_update), but fetching starts with the
    /// given token instead of a random pool draw. Batch sweeps use this to
    /// spread workers round-robin across the pool.
    pub async fn run_update_with(
        &self,
        owner: &str,
        name: &str,
        preferred_token: Option<&str>,
    ) -> Result<RunOutcome, OrchestratorError> {
        if self.repos.find(owner, name).await?.is_none() {
            return Err(OrchestratorError::repo_not_found(owner, name));
        }

        if !self.repos.claim_for_update(owner, name).await? {
            debug!(owner, name, "update already in flight, skipping trigger");
            counter!("pipeline_runs_skipped_total").increment(1);
            return Ok(RunOutcome::Skipped);
        }

        counter!("pipeline_runs_total").increment(1);
        let started = Instant::now();

        match self.execute(owner, name, preferred_token).await {
            Ok(()) => {
                self.repos.set_state(owner, name, RepoState::Done).await?;
                histogram!("pipeline_run_duration_ms")
                    .record(started.elapsed().as_millis() as f64);
                info!(owner, name, "update run completed");
                Ok(RunOutcome::Completed)
            }
            Err(e) => {
                counter!("pipeline_runs_failed_total").increment(1);
                error!(owner, name, error = %e, "update run failed");
                self.repos.set_state(owner, name, RepoState::Error).await?;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        owner: &str,
        name: &str,
        preferred_token: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.fetch_with_rotation(owner, name, preferred_token).await?;

        self.builder
            .rebuild(owner, name, self.dataset_since)
            .await?;
        self.repos
            .set_state(owner, name, RepoState::Training)
            .await?;

        for threshold in THRESHOLDS {
            let predicted = self.predictor.predict(owner, name, threshold).await?;
            debug!(owner, name, threshold, count = predicted.len(), "predictions stored");
            for prediction in predicted {
                self.predictions
                    .upsert(
                        owner,
                        name,
                        prediction.number,
                        threshold,
                        prediction.probability,
                        &prediction.state,
                    )
                    .await?;
            }
        }

        // Labeling problems must not undo a run that already has fresh
        // predictions.
        if let Err(e) = self.label_repo(owner, name).await {
            warn!(owner, name, error = %e, "labeling pass failed, run completes without labels");
        }

        Ok(())
    }

    /// Fetch with a single rotate-and-retry on credential rejection.
    async fn fetch_with_rotation(
        &self,
        owner: &str,
        name: &str,
        preferred_token: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let first = match preferred_token {
            Some(token) => token.to_string(),
            None => self.pool.select().await?,
        };
        match self.fetcher.fetch(owner, name, &first).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient_credential() => {
                warn!(owner, name, "fetch credential rejected, rotating token");
                counter!("fetch_credential_rotations_total").increment(1);
                let second = self
                    .pool
                    .select_excluding(std::slice::from_ref(&first))
                    .await?;
                self.fetcher
                    .fetch(owner, name, &second)
                    .await
                    .map_err(|e| e.into_fatal().into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Standalone labeling pass, used by the manual tag operation.
    pub async fn run_label_pass(&self, owner: &str, name: &str) -> Result<(), OrchestratorError> {
        if self.repos.find(owner, name).await?.is_none() {
            return Err(OrchestratorError::repo_not_found(owner, name));
        }
        self.label_repo(owner, name).await
    }

    async fn label_repo(&self, owner: &str, name: &str) -> Result<(), OrchestratorError> {
        let repo = self
            .repos
            .find(owner, name)
            .await?
            .ok_or_else(|| OrchestratorError::repo_not_found(owner, name))?;
        let config = RepoConfig::from_stored(repo.config.as_ref())?;

        // auto_label gates the whole stage; need_comment only decides whether
        // labeled issues also get the explanatory comment.
        if !config.auto_label {
            return Ok(());
        }

        let token = self.write_token(&repo).await?;
        let candidates = self
            .predictions
            .list_labelable(owner, name, config.newcomer_threshold, config.gfi_threshold)
            .await?;

        for prediction in candidates {
            // One bad issue must not stop the rest of the pass.
            if !prediction.tagged {
                match self
                    .labeler
                    .ensure_label(&token, owner, name, prediction.number, &config.issue_label)
                    .await
                {
                    Ok(applied) => {
                        if applied {
                            counter!("issues_labeled_total").increment(1);
                        }
                        self.predictions.mark_tagged(prediction.id).await?;
                    }
                    Err(e) => {
                        warn!(owner, name, issue = prediction.number, error = %e,
                            "labeling issue failed, continuing");
                        continue;
                    }
                }
            }

            if config.need_comment && !prediction.commented {
                match self
                    .labeler
                    .post_comment(
                        &token,
                        owner,
                        name,
                        prediction.number,
                        &comment_body(prediction.probability),
                    )
                    .await
                {
                    Ok(()) => {
                        counter!("issues_commented_total").increment(1);
                        self.predictions.mark_commented(prediction.id).await?;
                    }
                    Err(e) => {
                        warn!(owner, name, issue = prediction.number, error = %e,
                            "commenting on issue failed, continuing");
                    }
                }
            }
        }

        Ok(())
    }

    /// Pick the write credential for a labeling pass: the repo's App
    /// installation when one is bound, otherwise any pool token.
    async fn write_token(&self, repo: &RepoModel) -> Result<String, OrchestratorError> {
        match repo.installation_id {
            Some(installation_id) => self.pool.installation_token(installation_id).await,
            None => self.pool.select().await,
        }
    }
}

fn comment_body(probability: f64) -> String {
    format!(
        "This issue was predicted to be a good first issue for newcomers \
         with probability {:.0}%.",
        probability * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use migration::MigratorTrait;
    use sea_orm::Database;

    use crate::collaborators::{
        CredentialHealthChecker, InstallationTokenMinter, IssuePrediction, MintedToken,
    };
    use crate::error::{PipelineError, Stage};
    use crate::repositories::{InstallationRepository, UserRepository};

    struct AlwaysValid;

    #[async_trait]
    impl CredentialHealthChecker for AlwaysValid {
        async fn is_valid(&self, _token: &str) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct RecordingFetcher {
        calls: Mutex<Vec<String>>,
        fail_first: AtomicBool,
    }

    #[async_trait]
    impl SourceDataFetcher for RecordingFetcher {
        async fn fetch(&self, _owner: &str, _name: &str, token: &str) -> Result<(), PipelineError> {
            self.calls.lock().unwrap().push(token.to_string());
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(PipelineError::transient_credential(
                    Stage::Fetch,
                    "bad credentials",
                ));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubBuilder {
        calls: Mutex<Vec<NaiveDate>>,
    }

    #[async_trait]
    impl DatasetBuilder for StubBuilder {
        async fn rebuild(
            &self,
            _owner: &str,
            _name: &str,
            since: NaiveDate,
        ) -> Result<(), PipelineError> {
            self.calls.lock().unwrap().push(since);
            Ok(())
        }
    }

    /// Emits predictions at threshold 5 only; optionally fails at one
    /// threshold to exercise fail-fast.
    struct StubPredictor {
        fail_at: Option<i16>,
        thresholds_seen: Mutex<Vec<i16>>,
    }

    impl StubPredictor {
        fn new(fail_at: Option<i16>) -> Self {
            Self {
                fail_at,
                thresholds_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Predictor for StubPredictor {
        async fn predict(
            &self,
            _owner: &str,
            _name: &str,
            threshold: i16,
        ) -> Result<Vec<IssuePrediction>, PipelineError> {
            self.thresholds_seen.lock().unwrap().push(threshold);
            if self.fail_at == Some(threshold) {
                return Err(PipelineError::fatal(Stage::Predict, "training blew up"));
            }
            if threshold != 5 {
                return Ok(Vec::new());
            }
            Ok(vec![
                IssuePrediction {
                    number: 1,
                    probability: 0.9,
                    state: "open".to_string(),
                },
                IssuePrediction {
                    number: 2,
                    probability: 0.8,
                    state: "open".to_string(),
                },
                IssuePrediction {
                    number: 3,
                    probability: 0.1,
                    state: "open".to_string(),
                },
            ])
        }
    }

    #[derive(Default)]
    struct RecordingLabeler {
        labeled: Mutex<Vec<i32>>,
        commented: Mutex<Vec<i32>>,
        fail_numbers: HashSet<i32>,
    }

    #[async_trait]
    impl IssueLabeler for RecordingLabeler {
        async fn ensure_label(
            &self,
            _token: &str,
            _owner: &str,
            _name: &str,
            number: i32,
            _label: &str,
        ) -> Result<bool, PipelineError> {
            if self.fail_numbers.contains(&number) {
                return Err(PipelineError::fatal(Stage::Label, "label rejected"));
            }
            self.labeled.lock().unwrap().push(number);
            Ok(true)
        }

        async fn post_comment(
            &self,
            _token: &str,
            _owner: &str,
            _name: &str,
            number: i32,
            _body: &str,
        ) -> Result<(), PipelineError> {
            if self.fail_numbers.contains(&number) {
                return Err(PipelineError::fatal(Stage::Label, "comment rejected"));
            }
            self.commented.lock().unwrap().push(number);
            Ok(())
        }
    }

    struct NeverMint;

    #[async_trait]
    impl InstallationTokenMinter for NeverMint {
        async fn mint(&self, _installation_id: i64) -> Result<MintedToken, PipelineError> {
            Err(PipelineError::fatal(Stage::Label, "no minting in tests"))
        }
    }

    struct Harness {
        db: DatabaseConnection,
        runner: PipelineRunner,
        fetcher: Arc<RecordingFetcher>,
        predictor: Arc<StubPredictor>,
        labeler: Arc<RecordingLabeler>,
    }

    async fn harness_with(
        tokens: Vec<&str>,
        fetcher: RecordingFetcher,
        predictor: StubPredictor,
        labeler: RecordingLabeler,
    ) -> Harness {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();

        let pool = Arc::new(CredentialPool::new(
            tokens.into_iter().map(str::to_string).collect(),
            UserRepository::new(db.clone()),
            InstallationRepository::new(db.clone()),
            Arc::new(AlwaysValid),
            Some(Arc::new(NeverMint)),
        ));

        let fetcher = Arc::new(fetcher);
        let predictor = Arc::new(predictor);
        let labeler = Arc::new(labeler);

        let runner = PipelineRunner::new(
            db.clone(),
            pool,
            fetcher.clone(),
            Arc::new(StubBuilder::default()),
            predictor.clone(),
            labeler.clone(),
            NaiveDate::from_ymd_opt(2008, 1, 1).unwrap(),
        );

        Harness {
            db,
            runner,
            fetcher,
            predictor,
            labeler,
        }
    }

    async fn harness() -> Harness {
        harness_with(
            vec!["t1", "t2"],
            RecordingFetcher::default(),
            StubPredictor::new(None),
            RecordingLabeler::default(),
        )
        .await
    }

    #[tokio::test]
    async fn successful_run_ends_done_with_predictions_and_comments() {
        let h = harness().await;
        let repos = RepoRepository::new(h.db.clone());
        let config = RepoConfig {
            auto_label: true,
            ..RepoConfig::default()
        };
        let tracked = repos
            .track("octocat", "hello-world", None, Some(&config), None)
            .await
            .unwrap();

        let outcome = h.runner.run_update("octocat", "hello-world").await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(
            repos.get_state("octocat", "hello-world").await.unwrap(),
            Some(RepoState::Done)
        );

        // The run's state transitions advance updated_at past the tracked row.
        let after = repos.find("octocat", "hello-world").await.unwrap().unwrap();
        assert!(after.updated_at > tracked.updated_at);

        // All five thresholds swept in order.
        assert_eq!(*h.predictor.thresholds_seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);

        // Issues 1 and 2 clear the 0.5 probability bar; issue 3 does not.
        assert_eq!(*h.labeler.labeled.lock().unwrap(), vec![1, 2]);
        assert_eq!(*h.labeler.commented.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn run_with_auto_label_disabled_makes_no_github_writes() {
        let h = harness().await;
        let repos = RepoRepository::new(h.db.clone());
        // Default policy: need_comment is on but auto_label is off, which
        // keeps the whole labeling stage dormant.
        repos
            .track("octocat", "quiet", None, Some(&RepoConfig::default()), None)
            .await
            .unwrap();

        let outcome = h.runner.run_update("octocat", "quiet").await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(h.labeler.labeled.lock().unwrap().is_empty());
        assert!(h.labeler.commented.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trigger_during_running_update_is_skipped() {
        let h = harness().await;
        let repos = RepoRepository::new(h.db.clone());
        repos.track("octocat", "busy", None, None, None).await.unwrap();
        // A state transition marks the repo as owned by a run.
        repos
            .set_state("octocat", "busy", RepoState::Training)
            .await
            .unwrap();

        let outcome = h.runner.run_update("octocat", "busy").await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped);
        assert!(h.fetcher.calls.lock().unwrap().is_empty());
        assert_eq!(
            repos.get_state("octocat", "busy").await.unwrap(),
            Some(RepoState::Training)
        );
    }

    #[tokio::test]
    async fn freshly_tracked_repo_is_claimable() {
        let h = harness().await;
        let repos = RepoRepository::new(h.db.clone());
        repos.track("octocat", "fresh", None, None, None).await.unwrap();
        // Starts in collecting, but no run has ever owned it.
        assert_eq!(
            repos.get_state("octocat", "fresh").await.unwrap(),
            Some(RepoState::Collecting)
        );

        let outcome = h.runner.run_update("octocat", "fresh").await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn rejected_fetch_retries_once_with_different_token() {
        let fetcher = RecordingFetcher::default();
        fetcher.fail_first.store(true, Ordering::SeqCst);
        let h = harness_with(
            vec!["t1", "t2"],
            fetcher,
            StubPredictor::new(None),
            RecordingLabeler::default(),
        )
        .await;
        let repos = RepoRepository::new(h.db.clone());
        repos.track("octocat", "retry", None, None, None).await.unwrap();

        let outcome = h.runner.run_update("octocat", "retry").await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let calls = h.fetcher.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn rejected_fetch_with_single_token_fails_the_run() {
        let fetcher = RecordingFetcher::default();
        fetcher.fail_first.store(true, Ordering::SeqCst);
        let h = harness_with(
            vec!["only"],
            fetcher,
            StubPredictor::new(None),
            RecordingLabeler::default(),
        )
        .await;
        let repos = RepoRepository::new(h.db.clone());
        repos.track("octocat", "solo", None, None, None).await.unwrap();

        let err = h
            .runner
            .run_update("octocat", "solo")
            .await
            .expect_err("must fail");
        assert!(matches!(err, OrchestratorError::NoValidCredential));
        assert_eq!(
            repos.get_state("octocat", "solo").await.unwrap(),
            Some(RepoState::Error)
        );
    }

    #[tokio::test]
    async fn predict_failure_fails_fast_and_ends_in_error() {
        let h = harness_with(
            vec!["t1"],
            RecordingFetcher::default(),
            StubPredictor::new(Some(3)),
            RecordingLabeler::default(),
        )
        .await;
        let repos = RepoRepository::new(h.db.clone());
        repos.track("octocat", "boom", None, None, None).await.unwrap();

        let err = h
            .runner
            .run_update("octocat", "boom")
            .await
            .expect_err("must fail");
        assert!(matches!(err, OrchestratorError::Pipeline(_)));
        assert_eq!(
            repos.get_state("octocat", "boom").await.unwrap(),
            Some(RepoState::Error)
        );
        // Thresholds 4 and 5 were never attempted.
        assert_eq!(*h.predictor.thresholds_seen.lock().unwrap(), vec![1, 2, 3]);
        assert!(h.labeler.commented.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn label_failures_are_isolated_per_issue() {
        let labeler = RecordingLabeler {
            fail_numbers: HashSet::from([1]),
            ..RecordingLabeler::default()
        };
        let h = harness_with(
            vec!["t1"],
            RecordingFetcher::default(),
            StubPredictor::new(None),
            labeler,
        )
        .await;
        let repos = RepoRepository::new(h.db.clone());
        let config = RepoConfig {
            auto_label: true,
            ..RepoConfig::default()
        };
        repos
            .track("octocat", "partial", None, Some(&config), None)
            .await
            .unwrap();

        let outcome = h.runner.run_update("octocat", "partial").await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(
            repos.get_state("octocat", "partial").await.unwrap(),
            Some(RepoState::Done)
        );

        // Issue 1 failed but issue 2 was still labeled and commented.
        assert_eq!(*h.labeler.labeled.lock().unwrap(), vec![2]);
        assert_eq!(*h.labeler.commented.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn label_pass_skips_already_handled_issues() {
        let h = harness().await;
        let repos = RepoRepository::new(h.db.clone());
        let predictions = PredictionRepository::new(h.db.clone());
        let config = RepoConfig {
            auto_label: true,
            ..RepoConfig::default()
        };
        repos
            .track("octocat", "tagged", None, Some(&config), None)
            .await
            .unwrap();

        let row = predictions
            .upsert("octocat", "tagged", 9, 5, 0.95, "open")
            .await
            .unwrap();
        predictions.mark_tagged(row.id).await.unwrap();
        predictions.mark_commented(row.id).await.unwrap();

        h.runner.run_label_pass("octocat", "tagged").await.unwrap();
        assert!(h.labeler.labeled.lock().unwrap().is_empty());
        assert!(h.labeler.commented.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn label_pass_on_untracked_repo_is_an_error() {
        let h = harness().await;
        let err = h
            .runner
            .run_label_pass("nobody", "nothing")
            .await
            .expect_err("must fail");
        assert!(matches!(err, OrchestratorError::RepoNotFound { .. }));
    }
}
