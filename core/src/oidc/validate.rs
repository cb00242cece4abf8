//! OIDC token validation
//!
//! Verifies a GitHub Actions ID token against the issuer's published keys and
//! extracts the workflow claims the exchange relies on.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::client::OidcClient;
use crate::error::{ApiError, Result};
use crate::jwk::{Key, KeySet};
use crate::jwt::{self, Algorithm, Claims, Header, JwtError, KeyFinder, Validation};

/// Algorithms an OpenID Provider may sign ID tokens with
///
/// Symmetric algorithms are excluded: a public JWKS never holds the secret.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Private claims of a GitHub Actions ID token
///
/// https://docs.github.com/en/actions/deployment/security-hardening-your-deployments/about-security-hardening-with-openid-connect#understanding-the-oidc-token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsClaims {
    #[serde(default)]
    pub environment: String,
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub repository_id: String,
    #[serde(default)]
    pub repository_owner: String,
    #[serde(default)]
    pub repository_owner_id: String,
    #[serde(default)]
    pub repository_visibility: String,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub actor_id: String,
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub head_ref: String,
    #[serde(default)]
    pub base_ref: String,
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub ref_type: String,
    #[serde(default)]
    pub job_workflow_ref: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub run_number: String,
    #[serde(default)]
    pub run_attempt: String,
}

impl ActionsClaims {
    /// Owner and name from `repository` (`owner/name`)
    pub fn owner_and_repo(&self) -> Result<(&str, &str)> {
        self.repository
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty() && !repo.contains('/'))
            .ok_or_else(|| {
                ApiError::invalid_token(format!("invalid repository claim: {:?}", self.repository))
            })
    }

    /// Numeric repository ID; the token carries it as a string
    pub fn repository_id(&self) -> Result<u64> {
        self.repository_id.parse().map_err(|_| {
            ApiError::invalid_token(format!(
                "invalid repository_id claim: {:?}",
                self.repository_id
            ))
        })
    }
}

/// Key lookup that also requires any attached certificate chain to be
/// within its validity period
struct CertifiedKeys<'a> {
    keys: &'a KeySet,
    now: i64,
}

impl KeyFinder for CertifiedKeys<'_> {
    fn find_key(&self, header: &Header) -> std::result::Result<&Key, JwtError> {
        let key = self.keys.find_key(header)?;
        if key.certificates().iter().all(|c| c.is_valid_at(self.now)) {
            Ok(key)
        } else {
            Err(JwtError::CertificateNotValid(
                key.key_id().unwrap_or_default().to_string(),
            ))
        }
    }
}

/// Validate an Actions ID token and return its claims
///
/// The audience must equal `audience` exactly.
pub async fn validate_token(
    token: &str,
    oidc: &OidcClient,
    audience: &str,
) -> Result<Claims<ActionsClaims>> {
    // reject garbage before touching the network
    jwt::decode_header(token)?;

    let config = oidc.get_config().await?;
    let keys = oidc.get_jwks(&config.jwks_uri).await?;

    let now = oidc.now_secs() as i64;
    let validation = Validation::new(ALLOWED_ALGORITHMS)
        .with_issuer(oidc.issuer().trim_end_matches('/'))
        .with_audience(audience);
    let finder = CertifiedKeys { keys: &keys, now };
    let verified = jwt::verify::<ActionsClaims>(token, &finder, &validation, now)?;

    let claims = verified.claims;
    claims.extra.owner_and_repo()?;
    claims.extra.repository_id()?;

    info!(
        repository = %claims.extra.repository,
        repository_id = %claims.extra.repository_id,
        sub = claims.sub.as_deref().unwrap_or_default(),
        "validated ID token"
    );
    Ok(claims)
}
