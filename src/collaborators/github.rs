//! GitHub REST client.
//!
//! One client backs three collaborator seams: credential health checks
//! against `/rate_limit`, issue labeling and commenting, and GitHub App
//! installation token minting (RS256 app JWT exchanged for a short-lived
//! installation token).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use super::{CredentialHealthChecker, InstallationTokenMinter, IssueLabeler, MintedToken};
use crate::error::{PipelineError, Stage};

const USER_AGENT: &str = concat!("gfibot/", env!("CARGO_PKG_VERSION"));
const ACCEPT_HEADER: &str = "application/vnd.github+json";

/// Credentials for minting GitHub App installation tokens.
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: String,
    /// PEM-encoded RS256 private key.
    pub private_key: String,
}

/// GitHub REST API client.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    app_credentials: Option<AppCredentials>,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitBucket,
}

#[derive(Debug, Deserialize)]
struct RateLimitBucket {
    remaining: u64,
}

#[derive(Debug, Deserialize)]
struct LabelEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct AppJwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct InstallationResponse {
    account: InstallationAccount,
}

#[derive(Debug, Deserialize)]
struct InstallationAccount {
    login: String,
}

/// Statuses GitHub returns for a rejected or exhausted credential.
fn is_credential_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
    )
}

impl GithubClient {
    pub fn new(
        api_base: String,
        app_credentials: Option<AppCredentials>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn app_jwt(&self, creds: &AppCredentials) -> Result<String, PipelineError> {
        let now = Utc::now().timestamp();
        let claims = AppJwtClaims {
            // 60s of clock-drift allowance, expiry well under GitHub's
            // 10 minute maximum.
            iat: now - 60,
            exp: now + 540,
            iss: creds.app_id.clone(),
        };
        let key = EncodingKey::from_rsa_pem(creds.private_key.as_bytes()).map_err(|e| {
            PipelineError::fatal(Stage::Label, format!("invalid App private key: {}", e))
        })?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| {
            PipelineError::fatal(Stage::Label, format!("failed to sign App JWT: {}", e))
        })
    }

    fn map_status(status: StatusCode, context: &str) -> PipelineError {
        if is_credential_status(status) {
            PipelineError::transient_credential(
                Stage::Label,
                format!("{} rejected with status {}", context, status),
            )
        } else {
            PipelineError::fatal(
                Stage::Label,
                format!("{} failed with status {}", context, status),
            )
        }
    }
}

#[async_trait]
impl CredentialHealthChecker for GithubClient {
    async fn is_valid(&self, token: &str) -> bool {
        let response = self
            .http
            .get(self.url("/rate_limit"))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("credential health check failed to reach GitHub: {}", e);
                return false;
            }
        };

        if !response.status().is_success() {
            return false;
        }

        match response.json::<RateLimitResponse>().await {
            Ok(body) => body.resources.core.remaining > 0,
            Err(e) => {
                warn!("credential health check returned malformed body: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl IssueLabeler for GithubClient {
    async fn ensure_label(
        &self,
        token: &str,
        owner: &str,
        name: &str,
        number: i32,
        label: &str,
    ) -> Result<bool, PipelineError> {
        let labels_url = self.url(&format!("/repos/{}/{}/issues/{}/labels", owner, name, number));

        let response = self
            .http
            .get(&labels_url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| PipelineError::fatal(Stage::Label, format!("label lookup failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "label lookup"));
        }

        let existing: Vec<LabelEntry> = response.json().await.map_err(|e| {
            PipelineError::fatal(Stage::Label, format!("malformed label list: {}", e))
        })?;
        if existing.iter().any(|l| l.name == label) {
            return Ok(false);
        }

        let response = self
            .http
            .post(&labels_url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .json(&serde_json::json!({ "labels": [label] }))
            .send()
            .await
            .map_err(|e| PipelineError::fatal(Stage::Label, format!("label apply failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "label apply"));
        }

        Ok(true)
    }

    async fn post_comment(
        &self,
        token: &str,
        owner: &str,
        name: &str,
        number: i32,
        body: &str,
    ) -> Result<(), PipelineError> {
        let url = self.url(&format!("/repos/{}/{}/issues/{}/comments", owner, name, number));
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| PipelineError::fatal(Stage::Label, format!("comment failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "comment"));
        }
        Ok(())
    }
}

#[async_trait]
impl InstallationTokenMinter for GithubClient {
    async fn mint(&self, installation_id: i64) -> Result<MintedToken, PipelineError> {
        let creds = self.app_credentials.as_ref().ok_or_else(|| {
            PipelineError::fatal(Stage::Label, "GitHub App credentials are not configured")
        })?;
        let jwt = self.app_jwt(creds)?;

        let response = self
            .http
            .post(self.url(&format!("/app/installations/{}/access_tokens", installation_id)))
            .bearer_auth(&jwt)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| PipelineError::fatal(Stage::Label, format!("token mint failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "token mint"));
        }

        let minted: AccessTokenResponse = response.json().await.map_err(|e| {
            PipelineError::fatal(Stage::Label, format!("malformed mint response: {}", e))
        })?;

        let response = self
            .http
            .get(self.url(&format!("/app/installations/{}", installation_id)))
            .bearer_auth(&jwt)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| {
                PipelineError::fatal(Stage::Label, format!("installation lookup failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "installation lookup"));
        }

        let installation: InstallationResponse = response.json().await.map_err(|e| {
            PipelineError::fatal(Stage::Label, format!("malformed installation body: {}", e))
        })?;

        Ok(MintedToken {
            token: minted.token,
            expires_at: minted.expires_at,
            login: installation.account.login,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GithubClient {
        GithubClient::new(server.uri(), None).expect("client")
    }

    #[tokio::test]
    async fn health_check_accepts_token_with_quota() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": { "core": { "remaining": 4999, "limit": 5000 } }
            })))
            .mount(&server)
            .await;

        assert!(client(&server).is_valid("good-token").await);
    }

    #[tokio::test]
    async fn health_check_rejects_unauthorized_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(!client(&server).is_valid("bad-token").await);
    }

    #[tokio::test]
    async fn health_check_rejects_exhausted_quota() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": { "core": { "remaining": 0, "limit": 5000 } }
            })))
            .mount(&server)
            .await;

        assert!(!client(&server).is_valid("exhausted-token").await);
    }

    #[tokio::test]
    async fn ensure_label_skips_already_labeled_issue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/hello-world/issues/42/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "name": "good first issue" },
                { "name": "bug" }
            ])))
            .mount(&server)
            .await;

        let applied = client(&server)
            .ensure_label("token", "octocat", "hello-world", 42, "good first issue")
            .await
            .expect("lookup");
        assert!(!applied);
    }

    #[tokio::test]
    async fn ensure_label_applies_missing_label() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/hello-world/issues/42/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/octocat/hello-world/issues/42/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "name": "good first issue" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let applied = client(&server)
            .ensure_label("token", "octocat", "hello-world", 42, "good first issue")
            .await
            .expect("apply");
        assert!(applied);
    }

    #[tokio::test]
    async fn rejected_label_write_is_transient_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/hello-world/issues/42/labels"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client(&server)
            .ensure_label("token", "octocat", "hello-world", 42, "good first issue")
            .await
            .expect_err("must fail");
        assert!(err.is_transient_credential());
    }

    #[tokio::test]
    async fn mint_without_app_credentials_is_fatal() {
        let server = MockServer::start().await;
        let err = client(&server).mint(1234).await.expect_err("must fail");
        assert!(!err.is_transient_credential());
    }
}
