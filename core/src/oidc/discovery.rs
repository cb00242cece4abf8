//! OIDC Discovery document fetching
//!
//! Fetches and parses OpenID Connect discovery documents.

use serde::Deserialize;
use tracing::debug;

use super::jwks::CertificatePinning;
use super::USER_AGENT;
use crate::error::{ApiError, Result};
use crate::platform::HttpClient;

/// OpenID Provider metadata
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub subject_types_supported: Vec<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub claims_supported: Vec<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// Location of the discovery document for an issuer
pub fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

/// Fetch the discovery document at `url` and check that it names `issuer`
pub async fn fetch_discovery(
    url: &str,
    issuer: &str,
    http: &dyn HttpClient,
    pinning: &CertificatePinning,
) -> Result<DiscoveryDocument> {
    validate_issuer_url(issuer)?;
    debug!(url, "fetching discovery document");

    let response = http
        .get(
            url,
            &[("Accept", "application/json"), ("User-Agent", USER_AGENT)],
        )
        .await
        .map_err(|e| ApiError::upstream_error(format!("failed to fetch discovery document: {}", e)))?;
    pinning.check(&response)?;

    if response.status != 200 {
        return Err(ApiError::upstream_error(format!(
            "failed to fetch discovery document: HTTP {}",
            response.status
        )));
    }

    let doc: DiscoveryDocument = response
        .json()
        .map_err(|e| ApiError::upstream_error(format!("invalid discovery document: {}", e)))?;

    if doc.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(ApiError::upstream_error(format!(
            "issuer mismatch: expected '{}', got '{}'",
            issuer, doc.issuer
        )));
    }

    Ok(doc)
}

/// Validate issuer URL format per RFC 8414 and OpenID Connect Core 1.0
fn validate_issuer_url(issuer: &str) -> Result<()> {
    let url = ::url::Url::parse(issuer)
        .map_err(|_| ApiError::internal(format!("invalid issuer URL: {}", issuer)))?;

    let is_localhost = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
    if url.scheme() != "https" && !is_localhost {
        return Err(ApiError::internal("issuer must use HTTPS"));
    }

    if url.query().is_some() {
        return Err(ApiError::internal("issuer URL must not have query string"));
    }

    if url.fragment().is_some() {
        return Err(ApiError::internal("issuer URL must not have fragment"));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ApiError::internal("issuer URL must not have userinfo"));
    }

    Ok(())
}
