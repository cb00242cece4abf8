//! JWKS fetching and TLS certificate pinning

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::USER_AGENT;
use crate::error::{ApiError, Result};
use crate::jwk::KeySet;
use crate::platform::{HttpClient, HttpResponse};

/// Allow-list of SHA-1 fingerprints for the OIDC endpoints' TLS certificate
///
/// Empty means pinning is off and ordinary CA trust applies.
#[derive(Debug, Clone, Default)]
pub struct CertificatePinning {
    thumbprints: Vec<[u8; 20]>,
}

impl CertificatePinning {
    /// Build from hex fingerprints, as printed by `openssl x509 -fingerprint -sha1`
    pub fn new<S: AsRef<str>>(thumbprints: &[S]) -> Result<Self> {
        let thumbprints = thumbprints
            .iter()
            .map(|t| {
                let cleaned: String = t.as_ref().chars().filter(|c| *c != ':').collect();
                let mut sum = [0u8; 20];
                hex::decode_to_slice(&cleaned, &mut sum).map_err(|e| {
                    ApiError::internal(format!("invalid thumbprint {:?}: {}", t.as_ref(), e))
                })?;
                Ok(sum)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { thumbprints })
    }

    pub fn is_enabled(&self) -> bool {
        !self.thumbprints.is_empty()
    }

    /// Accept the response only if its leaf certificate is on the list
    pub fn check(&self, response: &HttpResponse) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let der = response
            .peer_certificate
            .as_deref()
            .ok_or_else(|| ApiError::upstream_error("the server certificate is not found"))?;

        let sum: [u8; 20] = Sha1::digest(der).into();
        let pinned = self
            .thumbprints
            .iter()
            .fold(false, |found, want| found | bool::from(sum[..].ct_eq(&want[..])));
        if pinned {
            Ok(())
        } else {
            warn!(thumbprint = %hex::encode(sum), "unpinned server certificate");
            Err(ApiError::upstream_error("invalid server certificate"))
        }
    }
}

/// Fetch and parse the JSON Web Key Set at `url`
pub async fn fetch_jwks(
    url: &str,
    http: &dyn HttpClient,
    pinning: &CertificatePinning,
) -> Result<KeySet> {
    debug!(url, "fetching JWKS");

    let response = http
        .get(
            url,
            &[
                ("Accept", "application/jwk-set+json"),
                ("User-Agent", USER_AGENT),
            ],
        )
        .await
        .map_err(|e| ApiError::upstream_error(format!("failed to fetch JWKS: {}", e)))?;
    pinning.check(&response)?;

    if response.status != 200 {
        return Err(ApiError::upstream_error(format!(
            "failed to fetch JWKS: HTTP {}",
            response.status
        )));
    }

    let keys = KeySet::parse(&response.body)
        .map_err(|e| ApiError::upstream_error(format!("invalid JWKS: {}", e)))?;
    debug!(url, keys = keys.len(), "fetched JWKS");
    Ok(keys)
}
