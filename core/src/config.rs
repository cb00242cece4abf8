//! Configuration and secrets management

use crate::error::{ApiError, Result};
use crate::github::url::canonical_url;
use crate::platform::Environment;

/// Public GitHub API endpoint
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Issuer of GitHub Actions ID tokens
pub const DEFAULT_OIDC_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// Local lifetime of cached discovery documents and key sets (1 hour)
pub const DISCOVERY_CACHE_TTL_SECS: u64 = 3600;

/// Timeout for a single discovery or JWKS fetch
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// GitHub App numeric ID
    pub github_app_id: u64,
    /// GitHub App private key (PEM format)
    pub github_app_private_key: String,
    /// Canonical GitHub API base URL
    pub github_api_url: String,
    /// Expected `iss` of incoming ID tokens
    pub oidc_issuer: String,
    /// Audience prefix; the App ID is appended to form the expected `aud`
    pub audience_prefix: String,
    /// Hex SHA-1 fingerprints of trusted OIDC TLS certificates.
    /// Empty means ordinary CA trust.
    pub oidc_thumbprints: Vec<String>,
}

impl Config {
    /// Load configuration from platform environment
    pub fn from_env(env: &dyn Environment) -> Result<Self> {
        let app_id = env
            .get_secret("GITHUB_APP_ID")
            .map_err(|_| ApiError::internal("GITHUB_APP_ID secret not set"))?;
        let github_app_id = app_id
            .trim()
            .parse::<u64>()
            .map_err(|e| ApiError::internal(format!("GITHUB_APP_ID is not a number: {}", e)))?;

        let github_api_url = env
            .get_var("GITHUB_API_URL")
            .unwrap_or_else(|_| DEFAULT_GITHUB_API_URL.to_string());

        Ok(Self {
            github_app_id,
            github_app_private_key: env
                .get_secret("GITHUB_APP_PRIVATE_KEY")
                .map_err(|_| ApiError::internal("GITHUB_APP_PRIVATE_KEY secret not set"))?,
            github_api_url: canonical_url(&github_api_url)
                .map_err(|e| ApiError::internal(format!("invalid GITHUB_API_URL: {}", e)))?,
            oidc_issuer: env
                .get_var("OIDC_ISSUER")
                .unwrap_or_else(|_| DEFAULT_OIDC_ISSUER.to_string()),
            audience_prefix: env
                .get_var("AUDIENCE_PREFIX")
                .map_err(|_| ApiError::internal("AUDIENCE_PREFIX not configured"))?,
            oidc_thumbprints: env
                .get_var("OIDC_THUMBPRINTS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Audience an ID token must carry to be accepted
    pub fn audience(&self) -> String {
        format!("{}{}", self.audience_prefix, self.github_app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockEnv;
    use std::collections::HashMap;

    fn secrets() -> HashMap<String, String> {
        HashMap::from([
            ("GITHUB_APP_ID".to_string(), "1234567890".to_string()),
            ("GITHUB_APP_PRIVATE_KEY".to_string(), "pem".to_string()),
        ])
    }

    #[test]
    fn test_from_env_defaults() {
        let vars = HashMap::from([(
            "AUDIENCE_PREFIX".to_string(),
            "https://app-token.example.com/".to_string(),
        )]);
        let config = Config::from_env(&MockEnv::new(vars, secrets())).expect("config should load");

        assert_eq!(config.github_app_id, 1234567890);
        assert_eq!(config.github_api_url, "https://api.github.com");
        assert_eq!(config.oidc_issuer, DEFAULT_OIDC_ISSUER);
        assert!(config.oidc_thumbprints.is_empty());
        assert_eq!(config.audience(), "https://app-token.example.com/1234567890");
    }

    #[test]
    fn test_from_env_overrides() {
        let vars = HashMap::from([
            ("AUDIENCE_PREFIX".to_string(), "aud-".to_string()),
            (
                "GITHUB_API_URL".to_string(),
                "HTTPS://GHE.Example.com:443/api/v3/".to_string(),
            ),
            (
                "OIDC_THUMBPRINTS".to_string(),
                "6938fd4d98bab03faadb97b34396831e3780aea1, 1c58a3a8518e8759bf075b76b750d4f2df264fcd"
                    .to_string(),
            ),
        ]);
        let config = Config::from_env(&MockEnv::new(vars, secrets())).expect("config should load");

        assert_eq!(config.github_api_url, "https://ghe.example.com/api/v3");
        assert_eq!(config.oidc_thumbprints.len(), 2);
        assert_eq!(config.audience(), "aud-1234567890");
    }

    #[test]
    fn test_from_env_missing_secret() {
        let vars = HashMap::from([("AUDIENCE_PREFIX".to_string(), "aud-".to_string())]);
        let result = Config::from_env(&MockEnv::new(vars, HashMap::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_env_bad_app_id() {
        let vars = HashMap::from([("AUDIENCE_PREFIX".to_string(), "aud-".to_string())]);
        let mut secrets = secrets();
        secrets.insert("GITHUB_APP_ID".to_string(), "my-app".to_string());
        let result = Config::from_env(&MockEnv::new(vars, secrets));
        assert!(result.is_err());
    }
}
