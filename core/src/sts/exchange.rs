//! Token exchange endpoint implementation
//!
//! Exchanges a GitHub Actions ID token for an installation token scoped to
//! the workflow's repository plus every repository that trusts it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::trust::{resolve_repository_ids, Caller};
use crate::config::Config;
use crate::error::{ApiError, ErrorResponse, Result};
use crate::github::api::AccessTokenRequest;
use crate::github::{AppJwtSigner, GitHubClient};
use crate::oidc::{self, CertificatePinning, OidcClient};
use crate::platform::{Clock, HttpClient};

/// Token exchange request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeRequest {
    /// Node IDs of additional repositories the token should cover
    #[serde(default)]
    pub repositories: Vec<String>,
    /// API server the caller intends to use the token with
    #[serde(default)]
    pub api_url: String,
}

/// Token exchange response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub github_token: String,
}

/// Exchange handler; build once and share between requests
pub struct Handler {
    github: Arc<GitHubClient>,
    oidc: OidcClient,
    audience: String,
}

impl Handler {
    pub fn new(github: Arc<GitHubClient>, oidc: OidcClient, audience: impl Into<String>) -> Self {
        Self {
            github,
            oidc,
            audience: audience.into(),
        }
    }

    /// Wire the GitHub and OIDC clients from configuration
    pub fn from_config(
        config: &Config,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let signer = AppJwtSigner::from_pem(config.github_app_id, &config.github_app_private_key)?;
        let github = GitHubClient::new(
            &config.github_api_url,
            http.clone(),
            Arc::new(signer),
            clock.clone(),
        )?;
        let pinning = CertificatePinning::new(&config.oidc_thumbprints)?;
        if pinning.is_enabled() {
            info!(
                thumbprints = config.oidc_thumbprints.len(),
                "OIDC certificate pinning enabled"
            );
        }
        let oidc = OidcClient::new(config.oidc_issuer.clone(), http, clock, pinning);

        Ok(Self::new(Arc::new(github), oidc, config.audience()))
    }

    /// Serve one HTTP request and return the status code and JSON body
    pub async fn handle_request(
        &self,
        method: &str,
        authorization: Option<&str>,
        body: &[u8],
    ) -> (u16, Vec<u8>) {
        match self.serve(method, authorization, body).await {
            Ok(response) => (200, to_json(&response)),
            Err(e) => {
                let status = e.status_code();
                if status >= 500 {
                    error!(error = %e, kind = e.error_key(), "token exchange failed");
                } else {
                    warn!(error = %e, kind = e.error_key(), "token exchange rejected");
                }
                (status, to_json(&ErrorResponse::from(&e)))
            }
        }
    }

    async fn serve(
        &self,
        method: &str,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<ExchangeResponse> {
        if method != "POST" {
            return Err(ApiError::MethodNotAllowed);
        }
        let request: ExchangeRequest = serde_json::from_slice(body).map_err(|e| {
            ApiError::invalid_request(format!("failed to unmarshal the request body: {}", e))
        })?;
        self.exchange(authorization, &request).await
    }

    /// Run the exchange for an already decoded request
    pub async fn exchange(
        &self,
        authorization: Option<&str>,
        request: &ExchangeRequest,
    ) -> Result<ExchangeResponse> {
        self.github.validate_api_url(&request.api_url)?;

        let id_token = extract_bearer_token(authorization)?;
        let claims = oidc::validate_token(id_token, &self.oidc, &self.audience).await?;
        let (owner, repo) = claims.extra.owner_and_repo()?;
        let caller = Caller {
            owner: owner.to_string(),
            repo: repo.to_string(),
            id: claims.extra.repository_id()?,
        };

        let installation = match self.github.get_repos_installation(owner, repo).await {
            Ok(installation) => installation,
            Err(e) if e.is_status(404) => return Err(self.not_installed(owner, repo).await),
            Err(e) => return Err(e),
        };

        let repository_ids =
            resolve_repository_ids(&self.github, installation.id, &caller, &request.repositories)
                .await?;

        let token = self
            .github
            .create_access_token(
                installation.id,
                &AccessTokenRequest {
                    repository_ids: repository_ids.clone(),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            repository = %claims.extra.repository,
            installation_id = installation.id,
            repository_ids = ?repository_ids,
            expires_in = calculate_expires_in_from_now(&token.expires_at, self.oidc.now_secs() as i64),
            "issued installation token"
        );
        Ok(ExchangeResponse {
            github_token: token.token,
        })
    }

    /// Guidance for a repository the App is not installed on
    async fn not_installed(&self, owner: &str, repo: &str) -> ApiError {
        match self.github.get_app().await {
            Ok(app) => ApiError::installation_not_found(format!(
                "the GitHub App is not installed on {}/{}; install it from {}",
                owner, repo, app.html_url
            )),
            Err(e) => e,
        }
    }
}

/// The token of a `Bearer` Authorization header
pub fn extract_bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or_else(|| ApiError::invalid_request("missing Authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::invalid_request("Authorization header must use Bearer scheme"))?
        .trim();
    if token.is_empty() {
        return Err(ApiError::invalid_request("Authorization header has no token"));
    }
    Ok(token)
}

fn to_json<T: Serialize>(body: &T) -> Vec<u8> {
    serde_json::to_vec(body).unwrap_or_default()
}

/// Seconds until an ISO 8601 `expires_at`, given the current time
fn calculate_expires_in_from_now(expires_at: &str, now_secs: i64) -> Option<u64> {
    use chrono::{DateTime, Utc};

    let expires_dt: DateTime<Utc> = expires_at.parse().ok()?;
    let diff = expires_dt.timestamp() - now_secs;

    if diff > 0 {
        Some(diff as u64)
    } else {
        None
    }
}
