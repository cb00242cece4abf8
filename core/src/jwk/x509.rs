use base64::{engine::general_purpose::STANDARD, Engine};

use super::JwkError;

/// An X.509 certificate from a key's `x5c` chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    spki: Vec<u8>,
    not_before: i64,
    not_after: i64,
}

impl Certificate {
    pub fn from_der(der: Vec<u8>) -> Result<Self, JwkError> {
        let (spki, not_before, not_after) = {
            let (_, cert) = x509_parser::parse_x509_certificate(&der)
                .map_err(|e| JwkError::InvalidCertificate(e.to_string()))?;
            let validity = cert.validity();
            (
                cert.public_key().raw.to_vec(),
                validity.not_before.timestamp(),
                validity.not_after.timestamp(),
            )
        };
        Ok(Self {
            der,
            spki,
            not_before,
            not_after,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// DER encoded SubjectPublicKeyInfo
    pub fn subject_public_key_info(&self) -> &[u8] {
        &self.spki
    }

    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    pub fn is_valid_at(&self, unix_secs: i64) -> bool {
        self.not_before <= unix_secs && unix_secs <= self.not_after
    }
}

/// `x5c` entries are standard base64, not base64url
pub(super) fn decode_chain(x5c: &[String]) -> Result<Vec<Certificate>, JwkError> {
    x5c.iter()
        .map(|entry| {
            let der = STANDARD
                .decode(entry)
                .map_err(|e| JwkError::invalid("x5c", e.to_string()))?;
            Certificate::from_der(der)
        })
        .collect()
}
