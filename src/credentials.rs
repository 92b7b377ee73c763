//! # Credential Pool
//!
//! Merges statically configured tokens with user-contributed OAuth tokens,
//! filters them through a live health check, and hands them out either at
//! random (trigger runs) or round-robin (batch sweeps). Also resolves
//! write-scoped GitHub App installation tokens through a database-backed
//! cache.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::gauge;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::collaborators::{CredentialHealthChecker, InstallationTokenMinter};
use crate::error::OrchestratorError;
use crate::repositories::{InstallationRepository, UserRepository};

/// Reuse a cached installation token only while it has this much life left.
const INSTALLATION_TOKEN_LEAD_SECONDS: i64 = 300;

/// Pool of GitHub credentials shared by every pipeline run.
pub struct CredentialPool {
    static_tokens: Vec<String>,
    users: UserRepository,
    installations: InstallationRepository,
    health: Arc<dyn CredentialHealthChecker>,
    minter: Option<Arc<dyn InstallationTokenMinter>>,
}

/// Merge static and user tokens, deduplicating while preserving order.
fn merge_tokens(static_tokens: &[String], user_tokens: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for token in static_tokens.iter().cloned().chain(user_tokens) {
        if !token.is_empty() && !merged.contains(&token) {
            merged.push(token);
        }
    }
    merged
}

/// Deterministic batch-worker assignment: worker `index` gets
/// `tokens[index % len]`.
pub fn round_robin(tokens: &[String], index: usize) -> Option<&String> {
    if tokens.is_empty() {
        return None;
    }
    tokens.get(index % tokens.len())
}

impl CredentialPool {
    pub fn new(
        static_tokens: Vec<String>,
        users: UserRepository,
        installations: InstallationRepository,
        health: Arc<dyn CredentialHealthChecker>,
        minter: Option<Arc<dyn InstallationTokenMinter>>,
    ) -> Self {
        Self {
            static_tokens,
            users,
            installations,
            health,
            minter,
        }
    }

    /// Every currently valid token in the pool.
    ///
    /// A token is valid when GitHub still accepts it and it has rate-limit
    /// quota left. Invalid tokens are skipped, not removed; a token that
    /// recovers its quota rejoins the pool on the next call.
    pub async fn valid_tokens(&self) -> Result<Vec<String>, OrchestratorError> {
        let user_tokens = self.users.list_oauth_tokens().await?;
        let candidates = merge_tokens(&self.static_tokens, user_tokens);

        let mut valid = Vec::with_capacity(candidates.len());
        for token in candidates {
            if self.health.is_valid(&token).await {
                valid.push(token);
            } else {
                debug!("skipping invalid or exhausted token");
            }
        }

        gauge!("credential_pool_valid_tokens_gauge").set(valid.len() as f64);
        Ok(valid)
    }

    /// Pick one valid token at random. Fails fast when the pool is empty so
    /// a run never starts without a usable credential.
    pub async fn select(&self) -> Result<String, OrchestratorError> {
        self.select_excluding(&[]).await
    }

    /// Pick one valid token at random, skipping tokens a run already tried.
    ///
    /// Used by the fetch retry: the second attempt must run with a different
    /// credential, and if none exists the run fails.
    pub async fn select_excluding(
        &self,
        exclude: &[String],
    ) -> Result<String, OrchestratorError> {
        let valid = self.valid_tokens().await?;
        let remaining: Vec<String> = valid
            .into_iter()
            .filter(|t| !exclude.contains(t))
            .collect();

        let mut rng = rand::thread_rng();
        match pick(&remaining, &mut rng) {
            Some(token) => Ok(token.clone()),
            None => {
                warn!(
                    excluded = exclude.len(),
                    "no valid credential available in pool"
                );
                Err(OrchestratorError::NoValidCredential)
            }
        }
    }

    /// Resolve a write-scoped token for a GitHub App installation, minting a
    /// fresh one when the cached token is missing or near expiry.
    pub async fn installation_token(
        &self,
        installation_id: i64,
    ) -> Result<String, OrchestratorError> {
        let lead = Duration::seconds(INSTALLATION_TOKEN_LEAD_SECONDS);
        if let Some(cached) = self.installations.find(installation_id).await? {
            if cached.expires_at.with_timezone(&Utc) > Utc::now() + lead {
                return Ok(cached.token);
            }
        }

        let minter = self
            .minter
            .as_ref()
            .ok_or(OrchestratorError::NoValidCredential)?;
        let minted = minter.mint(installation_id).await?;
        self.installations
            .store_token(
                installation_id,
                &minted.login,
                &minted.token,
                minted.expires_at.fixed_offset(),
            )
            .await?;
        Ok(minted.token)
    }
}

fn pick<'a>(tokens: &'a [String], rng: &mut impl Rng) -> Option<&'a String> {
    tokens.choose(rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn merge_deduplicates_preserving_order() {
        let static_tokens = vec!["a".to_string(), "b".to_string()];
        let user_tokens = vec!["b".to_string(), "c".to_string(), "".to_string()];
        assert_eq!(
            merge_tokens(&static_tokens, user_tokens),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn round_robin_wraps_around() {
        let tokens = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(round_robin(&tokens, 0), Some(&"a".to_string()));
        assert_eq!(round_robin(&tokens, 1), Some(&"b".to_string()));
        assert_eq!(round_robin(&tokens, 2), Some(&"c".to_string()));
        assert_eq!(round_robin(&tokens, 3), Some(&"a".to_string()));
        assert_eq!(round_robin(&tokens, 7), Some(&"b".to_string()));
    }

    #[test]
    fn round_robin_on_empty_pool_is_none() {
        assert_eq!(round_robin(&[], 0), None);
    }

    #[test]
    fn pick_draws_from_the_slice() {
        let tokens = vec!["a".to_string(), "b".to_string()];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..16 {
            let token = pick(&tokens, &mut rng).expect("non-empty");
            assert!(tokens.contains(token));
        }
    }

    #[test]
    fn pick_on_empty_slice_is_none() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(pick(&[], &mut rng), None);
    }
}
