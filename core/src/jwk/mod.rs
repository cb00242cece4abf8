//! JSON Web Key (RFC 7517) model
//!
//! A [`Key`] is decoded once from JSON and never changes afterwards. The
//! parameters shared by every key type live in one struct; the algebra
//! specific material is a tagged union selected by `kty`, `crv` and the
//! presence of the private `d` parameter.
//!
//! When a key carries an `x5c` chain, its public material and any declared
//! thumbprints are checked against the leaf certificate while parsing, so a
//! key that disagrees with its own certificate never reaches a verifier.

mod ec;
mod okp;
mod rsa;
mod set;
mod symmetric;
mod x509;

pub use ec::{EcPrivateKey, EcPublicKey};
pub use set::KeySet;
pub use x509::Certificate;

use ::rsa::pkcs8::DecodePublicKey;
use ::rsa::{RsaPrivateKey, RsaPublicKey};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Errors produced while decoding a key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwkError {
    #[error("invalid JWK JSON: {0}")]
    Json(String),

    #[error("unknown key type: {0:?}")]
    UnknownKeyType(String),

    #[error("unknown curve: {0:?}")]
    UnknownCurve(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("{0} does not match the leaf certificate")]
    ThumbprintMismatch(&'static str),

    #[error("public key does not match the leaf certificate")]
    CertificateKeyMismatch,
}

impl JwkError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Parameters every key type shares
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CommonParams {
    #[serde(default)]
    kty: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    public_key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    key_ops: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x5u: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    x5c: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x5t: Option<String>,
    #[serde(rename = "x5t#S256", default, skip_serializing_if = "Option::is_none")]
    x5t_s256: Option<String>,
}

/// Key material by algebra
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    RsaPublic(RsaPublicKey),
    RsaPrivate(RsaPrivateKey),
    EcPublic(EcPublicKey),
    EcPrivate(EcPrivateKey),
    Ed25519Public(ed25519_dalek::VerifyingKey),
    Ed25519Private(ed25519_dalek::SigningKey),
    Symmetric(Vec<u8>),
}

impl KeyMaterial {
    /// RFC 7518 `kty` value
    pub fn key_type(&self) -> &'static str {
        match self {
            Self::RsaPublic(_) | Self::RsaPrivate(_) => "RSA",
            Self::EcPublic(_) | Self::EcPrivate(_) => "EC",
            Self::Ed25519Public(_) | Self::Ed25519Private(_) => "OKP",
            Self::Symmetric(_) => "oct",
        }
    }

    /// Public half; `None` for symmetric keys
    pub fn public_key(&self) -> Option<PublicKey> {
        match self {
            Self::RsaPublic(key) => Some(PublicKey::Rsa(key.clone())),
            Self::RsaPrivate(key) => Some(PublicKey::Rsa(key.to_public_key())),
            Self::EcPublic(key) => Some(PublicKey::Ec(key.clone())),
            Self::EcPrivate(key) => Some(PublicKey::Ec(key.public_key())),
            Self::Ed25519Public(key) => Some(PublicKey::Ed25519(*key)),
            Self::Ed25519Private(key) => Some(PublicKey::Ed25519(key.verifying_key())),
            Self::Symmetric(_) => None,
        }
    }

    /// Secret half; `None` for public keys
    pub fn private_key(&self) -> Option<PrivateKey<'_>> {
        match self {
            Self::RsaPrivate(key) => Some(PrivateKey::Rsa(key)),
            Self::EcPrivate(key) => Some(PrivateKey::Ec(key)),
            Self::Ed25519Private(key) => Some(PrivateKey::Ed25519(key)),
            Self::Symmetric(key) => Some(PrivateKey::Symmetric(key)),
            Self::RsaPublic(_) | Self::EcPublic(_) | Self::Ed25519Public(_) => None,
        }
    }

    fn write_params(&self, map: &mut Map<String, Value>) {
        match self {
            Self::RsaPublic(key) => rsa::encode_public(key, map),
            Self::RsaPrivate(key) => rsa::encode_private(key, map),
            Self::EcPublic(key) => ec::encode_public(key, map),
            Self::EcPrivate(key) => ec::encode_private(key, map),
            Self::Ed25519Public(key) => okp::encode_public(key, map),
            Self::Ed25519Private(key) => okp::encode_private(key, map),
            Self::Symmetric(key) => symmetric::encode(key, map),
        }
    }
}

/// Public key material of an asymmetric key
#[derive(Debug, Clone, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ec(EcPublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    /// Decode a DER SubjectPublicKeyInfo as the same algebra as `self`
    fn same_kind_from_spki(&self, spki: &[u8]) -> Option<PublicKey> {
        match self {
            Self::Rsa(_) => RsaPublicKey::from_public_key_der(spki).ok().map(Self::Rsa),
            Self::Ec(EcPublicKey::P256(_)) => p256::PublicKey::from_public_key_der(spki)
                .ok()
                .map(|k| Self::Ec(EcPublicKey::P256(k))),
            Self::Ec(EcPublicKey::P384(_)) => p384::PublicKey::from_public_key_der(spki)
                .ok()
                .map(|k| Self::Ec(EcPublicKey::P384(k))),
            Self::Ed25519(_) => {
                use ed25519_dalek::pkcs8::DecodePublicKey as _;
                ed25519_dalek::VerifyingKey::from_public_key_der(spki)
                    .ok()
                    .map(Self::Ed25519)
            }
        }
    }
}

/// Borrowed secret key material
#[derive(Debug, Clone, Copy)]
pub enum PrivateKey<'a> {
    Rsa(&'a RsaPrivateKey),
    Ec(&'a EcPrivateKey),
    Ed25519(&'a ed25519_dalek::SigningKey),
    Symmetric(&'a [u8]),
}

/// A single JSON Web Key
#[derive(Debug, Clone)]
pub struct Key {
    common: CommonParams,
    certificates: Vec<Certificate>,
    material: KeyMaterial,
}

impl Key {
    /// Wrap key material with no optional parameters set
    pub fn new(material: KeyMaterial) -> Self {
        Self {
            common: CommonParams {
                kty: material.key_type().to_string(),
                ..Default::default()
            },
            certificates: Vec::new(),
            material,
        }
    }

    pub fn with_key_id(mut self, kid: impl Into<String>) -> Self {
        self.common.kid = Some(kid.into());
        self
    }

    pub fn with_algorithm(mut self, alg: impl Into<String>) -> Self {
        self.common.alg = Some(alg.into());
        self
    }

    /// Parse a single key from JSON
    pub fn parse(data: &[u8]) -> Result<Self, JwkError> {
        let value: Value =
            serde_json::from_slice(data).map_err(|e| JwkError::Json(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Decode a key from an already parsed JSON value
    pub fn from_value(value: &Value) -> Result<Self, JwkError> {
        #[derive(Deserialize)]
        struct Discriminant {
            #[serde(default)]
            crv: Option<String>,
            #[serde(default)]
            d: Option<Value>,
        }

        let common = CommonParams::deserialize(value).map_err(|e| JwkError::Json(e.to_string()))?;
        let hint = Discriminant::deserialize(value).map_err(|e| JwkError::Json(e.to_string()))?;
        let has_private = hint.d.is_some();

        let material = match (common.kty.as_str(), hint.crv.as_deref()) {
            ("", _) => return Err(JwkError::MissingParameter("kty")),
            ("RSA", _) => rsa::decode(value, has_private)?,
            ("EC", Some(crv)) => ec::decode(value, crv, has_private)?,
            ("OKP", Some("Ed25519")) => okp::decode(value, has_private)?,
            ("OKP", Some(crv)) => return Err(JwkError::UnknownCurve(crv.to_string())),
            ("EC", None) | ("OKP", None) => return Err(JwkError::MissingParameter("crv")),
            ("oct", _) => symmetric::decode(value)?,
            (kty, _) => return Err(JwkError::UnknownKeyType(kty.to_string())),
        };

        let certificates = x509::decode_chain(&common.x5c)?;
        let key = Self {
            common,
            certificates,
            material,
        };
        key.check_certificate()?;
        Ok(key)
    }

    pub fn key_type(&self) -> &str {
        &self.common.kty
    }

    pub fn public_key_use(&self) -> Option<&str> {
        self.common.public_key_use.as_deref()
    }

    pub fn key_operations(&self) -> &[String] {
        &self.common.key_ops
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.common.alg.as_deref()
    }

    pub fn key_id(&self) -> Option<&str> {
        self.common.kid.as_deref()
    }

    pub fn x509_url(&self) -> Option<&str> {
        self.common.x5u.as_deref()
    }

    /// Parsed `x5c` chain, leaf first
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.material.public_key()
    }

    pub fn private_key(&self) -> Option<PrivateKey<'_>> {
        self.material.private_key()
    }

    fn check_certificate(&self) -> Result<(), JwkError> {
        let Some(leaf) = self.certificates.first() else {
            return Ok(());
        };

        if let Some(x5t) = &self.common.x5t {
            let want = decode_b64(x5t, "x5t")?;
            let got = Sha1::digest(leaf.der());
            if !bool::from(want.as_slice().ct_eq(got.as_slice())) {
                return Err(JwkError::ThumbprintMismatch("x5t"));
            }
        }

        if let Some(x5t_s256) = &self.common.x5t_s256 {
            let want = decode_b64(x5t_s256, "x5t#S256")?;
            let got = Sha256::digest(leaf.der());
            if !bool::from(want.as_slice().ct_eq(got.as_slice())) {
                return Err(JwkError::ThumbprintMismatch("x5t#S256"));
            }
        }

        if let Some(public) = self.material.public_key() {
            match public.same_kind_from_spki(leaf.subject_public_key_info()) {
                Some(cert_key) if cert_key == public => {}
                _ => return Err(JwkError::CertificateKeyMismatch),
            }
        }

        Ok(())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = match serde_json::to_value(&self.common) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(serde::ser::Error::custom(e)),
        };
        self.material.write_params(&mut map);
        map.serialize(serializer)
    }
}

pub(crate) fn decode_b64(value: &str, name: &'static str) -> Result<Vec<u8>, JwkError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| JwkError::invalid(name, e.to_string()))
}

/// Decode a fixed-width octet string
pub(crate) fn decode_sized(
    value: &str,
    name: &'static str,
    len: usize,
) -> Result<Vec<u8>, JwkError> {
    let bytes = decode_b64(value, name)?;
    if bytes.len() != len {
        return Err(JwkError::invalid(
            name,
            format!("expected {} bytes, got {}", len, bytes.len()),
        ));
    }
    Ok(bytes)
}

pub(crate) fn encode_b64(data: &[u8]) -> Value {
    Value::String(URL_SAFE_NO_PAD.encode(data))
}

pub(crate) fn require<'a>(
    value: &'a Option<String>,
    name: &'static str,
) -> Result<&'a str, JwkError> {
    value.as_deref().ok_or(JwkError::MissingParameter(name))
}
