//! GitHub App authentication
//!
//! Generates the short-lived App JWT that authenticates every App-level call.

use async_trait::async_trait;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};
use crate::jwk::{Key, KeyMaterial};
use crate::jwt::{self, Algorithm, Header};
use crate::platform::JwtSigner;

/// Seconds the JWT is backdated to tolerate clock drift
const APP_JWT_BACKDATE_SECS: i64 = 60;

/// Lifetime of the JWT counted from now
const APP_JWT_LIFETIME_SECS: i64 = 5 * 60;

/// GitHub App JWT claims
#[derive(Serialize, Deserialize)]
struct AppJwtClaims {
    iat: i64,
    nbf: i64,
    exp: i64,
    iss: String,
}

/// JWT signer that uses the App's RSA private key
pub struct AppJwtSigner {
    app_id: u64,
    key: Key,
}

impl AppJwtSigner {
    /// Load the key from PEM, either PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8
    pub fn from_pem(app_id: u64, pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| ApiError::internal(format!("invalid private key: {}", e)))?;

        Ok(Self {
            app_id,
            key: Key::new(KeyMaterial::RsaPrivate(private)).with_algorithm("RS256"),
        })
    }

    pub fn app_id(&self) -> u64 {
        self.app_id
    }
}

#[async_trait]
impl JwtSigner for AppJwtSigner {
    async fn sign_app_jwt(&self, now_secs: i64) -> Result<String> {
        let claims = AppJwtClaims {
            iat: now_secs - APP_JWT_BACKDATE_SECS,
            nbf: now_secs - APP_JWT_BACKDATE_SECS,
            exp: now_secs + APP_JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        };

        jwt::sign(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| ApiError::internal(format!("failed to encode JWT: {}", e)))
    }
}
