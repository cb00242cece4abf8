//! JSON Web Token (RFC 7519) compact serialization
//!
//! Tokens are verified against keys from the [`crate::jwk`] model. Key lookup
//! goes through a [`KeyFinder`] supplied by the caller, so the same verifier
//! works with a fixed key set in tests and with a fetched JWKS in production.

mod sign;
mod verify;

pub use sign::sign;
pub use verify::{decode_header, verify, Validation, CLOCK_SKEW_LEEWAY_SECS};

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::ApiError;
use crate::jwk::{Key, KeySet};

/// Errors produced while signing or verifying a token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("algorithm {0} is not allowed")]
    AlgorithmNotAllowed(Algorithm),

    #[error("token header has no kid")]
    MissingKeyId,

    #[error("key {0:?} is not found")]
    KeyNotFound(String),

    #[error("token algorithm {header} does not match key algorithm {key}")]
    AlgorithmMismatch { header: String, key: String },

    #[error("key type {0} cannot be used with {1}")]
    IncompatibleKey(String, Algorithm),

    #[error("certificate of key {0:?} is outside its validity period")]
    CertificateNotValid(String),

    #[error("signature is invalid")]
    InvalidSignature,

    #[error("missing claim: {0}")]
    MissingClaim(&'static str),

    #[error("unexpected issuer: {0:?}")]
    InvalidIssuer(String),

    #[error("unexpected audience")]
    InvalidAudience,

    #[error("token is expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Malformed(_) | JwtError::MissingKeyId | JwtError::UnsupportedAlgorithm(_) => {
                ApiError::invalid_token(err.to_string())
            }
            JwtError::Signing(_) => ApiError::internal(err.to_string()),
            _ => ApiError::token_verification_failed(err.to_string()),
        }
    }
}

/// JWS signature algorithms (RFC 7518 section 3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Algorithm {
    HS256,
    HS384,
    HS512,
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
    ES256,
    ES384,
    EdDSA,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::EdDSA => "EdDSA",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = JwtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "HS256" => Self::HS256,
            "HS384" => Self::HS384,
            "HS512" => Self::HS512,
            "RS256" => Self::RS256,
            "RS384" => Self::RS384,
            "RS512" => Self::RS512,
            "PS256" => Self::PS256,
            "PS384" => Self::PS384,
            "PS512" => Self::PS512,
            "ES256" => Self::ES256,
            "ES384" => Self::ES384,
            "EdDSA" => Self::EdDSA,
            other => return Err(JwtError::UnsupportedAlgorithm(other.to_string())),
        })
    }
}

impl Serialize for Algorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// JOSE header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub alg: Algorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Header {
    pub fn new(alg: Algorithm) -> Self {
        Self {
            alg,
            typ: Some("JWT".to_string()),
            kid: None,
        }
    }

    pub fn with_key_id(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }
}

/// Seconds since the epoch, possibly fractional
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NumericDate {
    secs: i64,
    nanos: u32,
}

impl NumericDate {
    pub fn from_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    pub fn new(secs: i64, nanos: u32) -> Self {
        let secs = secs + i64::from(nanos / 1_000_000_000);
        Self {
            secs,
            nanos: nanos % 1_000_000_000,
        }
    }

    /// Whole seconds, rounded down
    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn subsec_nanos(&self) -> u32 {
        self.nanos
    }
}

impl Serialize for NumericDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.nanos == 0 {
            serializer.serialize_i64(self.secs)
        } else {
            serializer.serialize_f64(self.secs as f64 + f64::from(self.nanos) / 1e9)
        }
    }
}

impl<'de> Deserialize<'de> for NumericDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NumericDateVisitor;

        impl Visitor<'_> for NumericDateVisitor {
            type Value = NumericDate;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("seconds since the epoch")
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<NumericDate, E> {
                Ok(NumericDate::from_secs(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<NumericDate, E> {
                i64::try_from(value)
                    .map(NumericDate::from_secs)
                    .map_err(|_| E::custom("date out of range"))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<NumericDate, E> {
                if !value.is_finite() || value.abs() >= i64::MAX as f64 {
                    return Err(E::custom("date out of range"));
                }
                let secs = value.floor();
                let nanos = ((value - secs) * 1e9).round() as u32;
                Ok(NumericDate::new(secs as i64, nanos))
            }
        }

        deserializer.deserialize_any(NumericDateVisitor)
    }
}

/// `aud` claim; a single string or an array of strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience(pub Vec<String>);

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        self.0.iter().any(|a| a == audience)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Serialize for Audience {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [single] => serializer.serialize_str(single),
            many => many.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AudienceVisitor;

        impl<'de> Visitor<'de> for AudienceVisitor {
            type Value = Vec<String>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("string or array of strings")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Vec<String>, E> {
                Ok(vec![value.to_string()])
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Vec<String>, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element()? {
                    values.push(value);
                }
                Ok(values)
            }
        }

        deserializer.deserialize_any(AudienceVisitor).map(Audience)
    }
}

/// Registered claims plus a caller-defined extension
///
/// `T` is flattened into the same JSON object, so any struct deriving
/// `Deserialize` can pick up the private claims it knows about. The default
/// keeps every unregistered claim as raw JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims<T = serde_json::Map<String, serde_json::Value>> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<NumericDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<NumericDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<NumericDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(flatten)]
    pub extra: T,
}

/// A verified token
#[derive(Debug, Clone)]
pub struct Token<T> {
    pub header: Header,
    pub claims: Claims<T>,
}

/// Resolves the verification key for a token header
pub trait KeyFinder {
    fn find_key(&self, header: &Header) -> Result<&Key, JwtError>;
}

impl KeyFinder for KeySet {
    fn find_key(&self, header: &Header) -> Result<&Key, JwtError> {
        let kid = header.kid.as_deref().ok_or(JwtError::MissingKeyId)?;
        self.find(kid)
            .ok_or_else(|| JwtError::KeyNotFound(kid.to_string()))
    }
}
