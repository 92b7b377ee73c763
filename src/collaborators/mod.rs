//! # Pipeline Collaborators
//!
//! Trait seams between the orchestrator and the systems it drives: GitHub's
//! REST API, the data-fetch tooling, and the model training stack. Production
//! wiring lives in [`github`] and [`process`]; tests substitute in-memory
//! fakes.

pub mod github;
pub mod process;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::PipelineError;

pub use github::GithubClient;
pub use process::{CommandDatasetBuilder, CommandPredictor, CommandSourceDataFetcher};

/// One issue's predicted probability at one newcomer threshold.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct IssuePrediction {
    pub number: i32,
    pub probability: f64,
    /// Issue state as observed during prediction (open|closed).
    pub state: String,
}

/// Token minted for a GitHub App installation.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Account login the installation is bound to.
    pub login: String,
}

/// Pulls raw repository data (issues, commits, contributors) from GitHub
/// into local storage.
#[async_trait]
pub trait SourceDataFetcher: Send + Sync {
    async fn fetch(&self, owner: &str, name: &str, token: &str) -> Result<(), PipelineError>;
}

/// Rebuilds the training dataset for a repository from fetched data.
#[async_trait]
pub trait DatasetBuilder: Send + Sync {
    async fn rebuild(
        &self,
        owner: &str,
        name: &str,
        since: NaiveDate,
    ) -> Result<(), PipelineError>;
}

/// Trains and predicts good-first-issue probabilities at one newcomer
/// threshold.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(
        &self,
        owner: &str,
        name: &str,
        threshold: i16,
    ) -> Result<Vec<IssuePrediction>, PipelineError>;
}

/// Applies labels and comments to issues on GitHub.
#[async_trait]
pub trait IssueLabeler: Send + Sync {
    /// Apply `label` to the issue unless it already carries it.
    /// Returns true when the label was newly applied.
    async fn ensure_label(
        &self,
        token: &str,
        owner: &str,
        name: &str,
        number: i32,
        label: &str,
    ) -> Result<bool, PipelineError>;

    async fn post_comment(
        &self,
        token: &str,
        owner: &str,
        name: &str,
        number: i32,
        body: &str,
    ) -> Result<(), PipelineError>;
}

/// Checks whether a token is still accepted by GitHub and has quota left.
#[async_trait]
pub trait CredentialHealthChecker: Send + Sync {
    async fn is_valid(&self, token: &str) -> bool;
}

/// Mints short-lived GitHub App installation tokens.
#[async_trait]
pub trait InstallationTokenMinter: Send + Sync {
    async fn mint(&self, installation_id: i64) -> Result<MintedToken, PipelineError>;
}
