//! Command-backed pipeline stages.
//!
//! The fetch, dataset, and predict stages shell out to the data/ML tooling
//! rather than reimplementing it. A stage that exits with code 75
//! (EX_TEMPFAIL) signals a credential problem eligible for the single
//! rotate-and-retry; any other non-zero exit is fatal for the run.

use chrono::NaiveDate;
use tokio::process::Command;

use async_trait::async_trait;

use super::{DatasetBuilder, IssuePrediction, Predictor, SourceDataFetcher};
use crate::error::{PipelineError, Stage};

/// Exit code a stage uses to report a rejected or rate-limited credential.
const EXIT_TRANSIENT_CREDENTIAL: i32 = 75;

async fn run_stage(mut command: Command, stage: Stage) -> Result<Vec<u8>, PipelineError> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PipelineError::fatal(stage, format!("failed to spawn stage command: {}", e)))?;

    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.lines().last().unwrap_or("no stderr output");

    match output.status.code() {
        Some(EXIT_TRANSIENT_CREDENTIAL) => Err(PipelineError::transient_credential(
            stage,
            format!("credential rejected: {}", detail),
        )),
        Some(code) => Err(PipelineError::fatal(
            stage,
            format!("stage exited with code {}: {}", code, detail),
        )),
        None => Err(PipelineError::fatal(stage, "stage terminated by signal")),
    }
}

/// Fetches repository data by invoking the configured fetch command.
///
/// The token travels in the `GITHUB_TOKEN` environment variable so it never
/// shows up in process listings.
pub struct CommandSourceDataFetcher {
    command: String,
}

impl CommandSourceDataFetcher {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl SourceDataFetcher for CommandSourceDataFetcher {
    async fn fetch(&self, owner: &str, name: &str, token: &str) -> Result<(), PipelineError> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--owner")
            .arg(owner)
            .arg("--name")
            .arg(name)
            .env("GITHUB_TOKEN", token);
        run_stage(cmd, Stage::Fetch).await?;
        Ok(())
    }
}

/// Rebuilds the training dataset by invoking the configured dataset command.
pub struct CommandDatasetBuilder {
    command: String,
}

impl CommandDatasetBuilder {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl DatasetBuilder for CommandDatasetBuilder {
    async fn rebuild(
        &self,
        owner: &str,
        name: &str,
        since: NaiveDate,
    ) -> Result<(), PipelineError> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--owner")
            .arg(owner)
            .arg("--name")
            .arg(name)
            .arg("--since")
            .arg(since.format("%Y-%m-%d").to_string());
        run_stage(cmd, Stage::Dataset).await?;
        Ok(())
    }
}

/// Runs training and prediction for one threshold by invoking the configured
/// predict command, which prints one JSON prediction per stdout line.
pub struct CommandPredictor {
    command: String,
}

impl CommandPredictor {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Predictor for CommandPredictor {
    async fn predict(
        &self,
        owner: &str,
        name: &str,
        threshold: i16,
    ) -> Result<Vec<IssuePrediction>, PipelineError> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--owner")
            .arg(owner)
            .arg("--name")
            .arg(name)
            .arg("--threshold")
            .arg(threshold.to_string());
        let stdout = run_stage(cmd, Stage::Predict).await?;

        let text = String::from_utf8_lossy(&stdout);
        let mut predictions = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let prediction: IssuePrediction = serde_json::from_str(line).map_err(|e| {
                PipelineError::fatal(
                    Stage::Predict,
                    format!("malformed prediction output: {}", e),
                )
            })?;
            predictions.push(prediction);
        }
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_command_is_fatal() {
        let fetcher =
            CommandSourceDataFetcher::new("/nonexistent/gfi-fetch-test-binary".to_string());
        let err = fetcher
            .fetch("octocat", "hello-world", "token")
            .await
            .expect_err("spawn must fail");
        assert!(!err.is_transient_credential());
        assert_eq!(err.stage, Stage::Fetch);
    }

    #[tokio::test]
    async fn transient_exit_code_maps_to_credential_error() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!("exit {}", EXIT_TRANSIENT_CREDENTIAL));
        let err = run_stage(cmd, Stage::Fetch).await.expect_err("must fail");
        assert!(err.is_transient_credential());
    }

    #[tokio::test]
    async fn other_exit_codes_are_fatal() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 1");
        let err = run_stage(cmd, Stage::Dataset).await.expect_err("must fail");
        assert!(!err.is_transient_credential());
    }

    #[tokio::test]
    async fn parses_prediction_lines() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(
            r#"printf '{"number":42,"probability":0.91,"state":"open"}\n{"number":7,"probability":0.12,"state":"closed"}\n'"#,
        );
        let stdout = run_stage(cmd, Stage::Predict).await.expect("run");
        let text = String::from_utf8(stdout).expect("utf8");
        let predictions: Vec<IssuePrediction> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("parse"))
            .collect();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].number, 42);
        assert!((predictions[0].probability - 0.91).abs() < f64::EPSILON);
    }
}
