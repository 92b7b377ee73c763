//! # Error Handling
//!
//! Error types for the orchestrator. Pipeline stage failures carry an
//! explicit kind so the retry policy is a pure function of the error kind
//! rather than being embedded in nested handlers.

use thiserror::Error;

use crate::config::ConfigError;
use crate::cron::CronParseError;

/// Pipeline stage where an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Dataset,
    Predict,
    Label,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Dataset => "dataset",
            Stage::Predict => "predict",
            Stage::Label => "label",
        };
        f.write_str(name)
    }
}

/// Classification of a pipeline stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    /// Authentication rejected or rate limit exceeded; eligible for a single
    /// retry with a different valid credential during the fetch stage.
    TransientCredential,
    /// Any other stage failure; the run fails and the repo enters `error`.
    Fatal,
}

/// Error raised by a pipeline stage or collaborator.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[error("{kind:?} error in {stage} stage: {message}")]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub stage: Stage,
    pub message: String,
}

impl PipelineError {
    pub fn transient_credential<S: Into<String>>(stage: Stage, message: S) -> Self {
        Self {
            kind: PipelineErrorKind::TransientCredential,
            stage,
            message: message.into(),
        }
    }

    pub fn fatal<S: Into<String>>(stage: Stage, message: S) -> Self {
        Self {
            kind: PipelineErrorKind::Fatal,
            stage,
            message: message.into(),
        }
    }

    /// Whether a single credential-rotation retry is allowed for this error.
    pub fn is_transient_credential(&self) -> bool {
        matches!(self.kind, PipelineErrorKind::TransientCredential)
    }

    /// Re-classify this error as fatal, preserving stage and message.
    pub fn into_fatal(mut self) -> Self {
        self.kind = PipelineErrorKind::Fatal;
        self
    }
}

/// Top-level orchestrator error.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("no valid credentials available")]
    NoValidCredential,

    #[error("repository {owner}/{name} is not tracked")]
    RepoNotFound { owner: String, name: String },

    #[error("invalid cron expression '{expr}': {source}")]
    InvalidCron {
        expr: String,
        source: CronParseError,
    },

    #[error("invalid repo config: {message}")]
    InvalidRepoConfig { message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn repo_not_found(owner: &str, name: &str) -> Self {
        Self::RepoNotFound {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    pub fn invalid_cron(expr: &str, source: CronParseError) -> Self {
        Self::InvalidCron {
            expr: expr.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_credential_is_retryable() {
        let err = PipelineError::transient_credential(Stage::Fetch, "bad credentials");
        assert!(err.is_transient_credential());
        assert_eq!(err.stage, Stage::Fetch);
    }

    #[test]
    fn fatal_is_not_retryable() {
        let err = PipelineError::fatal(Stage::Predict, "model training failed");
        assert!(!err.is_transient_credential());
    }

    #[test]
    fn into_fatal_preserves_stage_and_message() {
        let err = PipelineError::transient_credential(Stage::Fetch, "rate limited").into_fatal();
        assert_eq!(err.kind, PipelineErrorKind::Fatal);
        assert_eq!(err.stage, Stage::Fetch);
        assert_eq!(err.message, "rate limited");
    }

    #[test]
    fn pipeline_error_serializes_kind_and_stage() {
        let err = PipelineError::transient_credential(Stage::Fetch, "rate limited");
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["kind"], "transient_credential");
        assert_eq!(json["stage"], "fetch");
    }
}
