use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{decode_sized, encode_b64, require, JwkError, KeyMaterial};

/// Public key on one of the supported NIST curves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcPublicKey {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
}

/// Private key on one of the supported NIST curves
#[derive(Debug, Clone)]
pub enum EcPrivateKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
}

impl EcPublicKey {
    pub fn curve(&self) -> &'static str {
        match self {
            Self::P256(_) => "P-256",
            Self::P384(_) => "P-384",
        }
    }

    /// Affine coordinates, each left-padded to the field size
    fn coordinates(&self) -> (Vec<u8>, Vec<u8>) {
        match self {
            Self::P256(key) => {
                let point = key.to_encoded_point(false);
                (
                    point.x().map(|x| x.to_vec()).unwrap_or_default(),
                    point.y().map(|y| y.to_vec()).unwrap_or_default(),
                )
            }
            Self::P384(key) => {
                let point = key.to_encoded_point(false);
                (
                    point.x().map(|x| x.to_vec()).unwrap_or_default(),
                    point.y().map(|y| y.to_vec()).unwrap_or_default(),
                )
            }
        }
    }
}

impl EcPrivateKey {
    pub fn public_key(&self) -> EcPublicKey {
        match self {
            Self::P256(key) => EcPublicKey::P256(key.public_key()),
            Self::P384(key) => EcPublicKey::P384(key.public_key()),
        }
    }

    pub fn curve(&self) -> &'static str {
        self.public_key().curve()
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::P256(key) => key.to_bytes().to_vec(),
            Self::P384(key) => key.to_bytes().to_vec(),
        }
    }
}

#[derive(Deserialize)]
struct EcParams {
    x: Option<String>,
    y: Option<String>,
    d: Option<String>,
}

pub(super) fn decode(value: &Value, crv: &str, has_private: bool) -> Result<KeyMaterial, JwkError> {
    let size = match crv {
        "P-256" => 32,
        "P-384" => 48,
        other => return Err(JwkError::UnknownCurve(other.to_string())),
    };
    let params = EcParams::deserialize(value).map_err(|e| JwkError::Json(e.to_string()))?;

    let x = decode_sized(require(&params.x, "x")?, "x", size)?;
    let y = decode_sized(require(&params.y, "y")?, "y", size)?;
    let mut sec1 = Vec::with_capacity(1 + 2 * size);
    sec1.push(0x04);
    sec1.extend_from_slice(&x);
    sec1.extend_from_slice(&y);

    let not_on_curve = |_| JwkError::InvalidKey(format!("point is not on {}", crv));
    let public = if size == 32 {
        EcPublicKey::P256(p256::PublicKey::from_sec1_bytes(&sec1).map_err(not_on_curve)?)
    } else {
        EcPublicKey::P384(p384::PublicKey::from_sec1_bytes(&sec1).map_err(not_on_curve)?)
    };

    if !has_private {
        return Ok(KeyMaterial::EcPublic(public));
    }

    let d = decode_sized(require(&params.d, "d")?, "d", size)?;
    let invalid_scalar = |_| JwkError::invalid("d", "scalar out of range");
    let private = match public {
        EcPublicKey::P256(_) => {
            EcPrivateKey::P256(p256::SecretKey::from_slice(&d).map_err(invalid_scalar)?)
        }
        EcPublicKey::P384(_) => {
            EcPrivateKey::P384(p384::SecretKey::from_slice(&d).map_err(invalid_scalar)?)
        }
    };
    if private.public_key() != public {
        return Err(JwkError::invalid("d", "does not match x and y"));
    }

    Ok(KeyMaterial::EcPrivate(private))
}

pub(super) fn encode_public(key: &EcPublicKey, map: &mut Map<String, Value>) {
    let (x, y) = key.coordinates();
    map.insert("crv".into(), Value::String(key.curve().to_string()));
    map.insert("x".into(), encode_b64(&x));
    map.insert("y".into(), encode_b64(&y));
}

pub(super) fn encode_private(key: &EcPrivateKey, map: &mut Map<String, Value>) {
    encode_public(&key.public_key(), map);
    map.insert("d".into(), encode_b64(&key.to_bytes()));
}
