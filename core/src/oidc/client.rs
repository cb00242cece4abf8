//! Cached access to the issuer's discovery document and key set

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::discovery::{discovery_url, fetch_discovery, DiscoveryDocument};
use super::jwks::{fetch_jwks, CertificatePinning};
use crate::config::{DISCOVERY_CACHE_TTL_SECS, FETCH_TIMEOUT_SECS};
use crate::error::{ApiError, Result};
use crate::jwk::KeySet;
use crate::memoize::Memo;
use crate::platform::{Clock, HttpClient};

/// OpenID Provider client
///
/// Discovery documents and key sets are cached for
/// [`DISCOVERY_CACHE_TTL_SECS`] regardless of what the provider's
/// `cache-control` says; GitHub Actions answers with `no-store`.
#[derive(Clone)]
pub struct OidcClient {
    issuer: String,
    clock: Arc<dyn Clock>,
    config: Memo<String, Arc<DiscoveryDocument>, ApiError>,
    jwks: Memo<String, Arc<KeySet>, ApiError>,
}

impl OidcClient {
    pub fn new(
        issuer: impl Into<String>,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        pinning: CertificatePinning,
    ) -> Self {
        let issuer = issuer.into();
        let pinning = Arc::new(pinning);

        let config: Memo<String, Arc<DiscoveryDocument>, ApiError> = {
            let issuer = issuer.clone();
            let http = http.clone();
            let clock = clock.clone();
            let pinning = pinning.clone();
            Memo::new(clock.clone(), move |url: String| {
                let issuer = issuer.clone();
                let http = http.clone();
                let clock = clock.clone();
                let pinning = pinning.clone();
                async move {
                    let expires_at = clock.now_secs() + DISCOVERY_CACHE_TTL_SECS;
                    let doc = with_timeout(fetch_discovery(&url, &issuer, http.as_ref(), &pinning))
                        .await?;
                    Ok::<_, ApiError>((Arc::new(doc), expires_at))
                }
            })
        };

        let jwks: Memo<String, Arc<KeySet>, ApiError> = {
            let clock = clock.clone();
            Memo::new(clock.clone(), move |url: String| {
                let http = http.clone();
                let clock = clock.clone();
                let pinning = pinning.clone();
                async move {
                    let expires_at = clock.now_secs() + DISCOVERY_CACHE_TTL_SECS;
                    let keys = with_timeout(fetch_jwks(&url, http.as_ref(), &pinning)).await?;
                    Ok::<_, ApiError>((Arc::new(keys), expires_at))
                }
            })
        };

        Self {
            issuer,
            clock,
            config,
            jwks,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub(crate) fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }

    /// The issuer's discovery document
    pub async fn get_config(&self) -> Result<Arc<DiscoveryDocument>> {
        self.config.call(discovery_url(&self.issuer)).await
    }

    /// The key set published at `url`
    pub async fn get_jwks(&self, url: &str) -> Result<Arc<KeySet>> {
        self.jwks.call(url.to_string()).await
    }
}

async fn with_timeout<T>(fetch: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(FETCH_TIMEOUT_SECS), fetch)
        .await
        .map_err(|_| ApiError::UpstreamTimeout)?
}
