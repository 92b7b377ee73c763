//! Per-repo update policy stored in the `repos.config` column.
//!
//! A repo with no stored policy falls back to these defaults and is swept by
//! the daily daemon job instead of getting its own trigger.

use serde::{Deserialize, Serialize};

use crate::cron::CronExpr;
use crate::error::OrchestratorError;

/// Update policy for one tracked repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Cron expression driving periodic updates.
    #[serde(default = "default_update_cron")]
    pub update_cron: String,

    /// Newcomer threshold whose predictions drive labeling, 1 to 5.
    #[serde(default = "default_newcomer_threshold")]
    pub newcomer_threshold: i16,

    /// Minimum probability for an issue to count as a good first issue.
    #[serde(default = "default_gfi_threshold")]
    pub gfi_threshold: f64,

    /// Whether to comment on issues that cross the threshold.
    #[serde(default = "default_need_comment")]
    pub need_comment: bool,

    /// Whether to apply the label to issues that cross the threshold.
    #[serde(default = "default_auto_label")]
    pub auto_label: bool,

    /// Label text applied when `auto_label` is set.
    #[serde(default = "default_issue_label")]
    pub issue_label: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            update_cron: default_update_cron(),
            newcomer_threshold: default_newcomer_threshold(),
            gfi_threshold: default_gfi_threshold(),
            need_comment: default_need_comment(),
            auto_label: default_auto_label(),
            issue_label: default_issue_label(),
        }
    }
}

impl RepoConfig {
    /// Validate the policy before it is written to the database.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        CronExpr::parse(&self.update_cron)
            .map_err(|source| OrchestratorError::invalid_cron(&self.update_cron, source))?;

        if !(1..=5).contains(&self.newcomer_threshold) {
            return Err(OrchestratorError::InvalidRepoConfig {
                message: format!(
                    "newcomer threshold must be between 1 and 5, got {}",
                    self.newcomer_threshold
                ),
            });
        }

        if !(0.0..=1.0).contains(&self.gfi_threshold) {
            return Err(OrchestratorError::InvalidRepoConfig {
                message: format!(
                    "gfi threshold must be between 0.0 and 1.0, got {}",
                    self.gfi_threshold
                ),
            });
        }

        Ok(())
    }

    /// Parse a stored config value, falling back to defaults for a repo
    /// tracked without an explicit policy.
    pub fn from_stored(value: Option<&serde_json::Value>) -> Result<Self, OrchestratorError> {
        match value {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                OrchestratorError::InvalidRepoConfig {
                    message: format!("stored config is malformed: {}", e),
                }
            }),
            None => Ok(Self::default()),
        }
    }

    pub fn to_stored(&self) -> Result<serde_json::Value, OrchestratorError> {
        serde_json::to_value(self).map_err(|e| OrchestratorError::InvalidRepoConfig {
            message: format!("config failed to serialize: {}", e),
        })
    }
}

fn default_update_cron() -> String {
    "0 0 * * *".to_string()
}

fn default_newcomer_threshold() -> i16 {
    5
}

fn default_gfi_threshold() -> f64 {
    0.5
}

fn default_need_comment() -> bool {
    true
}

fn default_auto_label() -> bool {
    false
}

fn default_issue_label() -> String {
    "good first issue".to_string()
}
