use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{decode_b64, decode_sized, encode_b64, require, JwkError, KeyMaterial};

#[derive(Deserialize)]
struct OkpParams {
    x: Option<String>,
    d: Option<String>,
}

pub(super) fn decode(value: &Value, has_private: bool) -> Result<KeyMaterial, JwkError> {
    let params = OkpParams::deserialize(value).map_err(|e| JwkError::Json(e.to_string()))?;

    let x = decode_sized(require(&params.x, "x")?, "x", PUBLIC_KEY_LENGTH)?;
    let mut public_bytes = [0u8; PUBLIC_KEY_LENGTH];
    public_bytes.copy_from_slice(&x);
    let public = VerifyingKey::from_bytes(&public_bytes)
        .map_err(|e| JwkError::InvalidKey(e.to_string()))?;

    if !has_private {
        return Ok(KeyMaterial::Ed25519Public(public));
    }

    // `d` is the 32 byte seed; the 64 byte seed||public form is accepted too
    let d = decode_b64(require(&params.d, "d")?, "d")?;
    let seed = match d.len() {
        SECRET_KEY_LENGTH => &d[..],
        64 if d[SECRET_KEY_LENGTH..] == public_bytes => &d[..SECRET_KEY_LENGTH],
        64 => return Err(JwkError::invalid("d", "public half does not match x")),
        n => {
            return Err(JwkError::invalid(
                "d",
                format!("expected 32 or 64 bytes, got {}", n),
            ))
        }
    };
    let mut seed_bytes = [0u8; SECRET_KEY_LENGTH];
    seed_bytes.copy_from_slice(seed);
    let private = SigningKey::from_bytes(&seed_bytes);
    if private.verifying_key() != public {
        return Err(JwkError::invalid("d", "does not match x"));
    }

    Ok(KeyMaterial::Ed25519Private(private))
}

pub(super) fn encode_public(key: &VerifyingKey, map: &mut Map<String, Value>) {
    map.insert("crv".into(), Value::String("Ed25519".into()));
    map.insert("x".into(), encode_b64(key.as_bytes()));
}

pub(super) fn encode_private(key: &SigningKey, map: &mut Map<String, Value>) {
    encode_public(&key.verifying_key(), map);
    map.insert("d".into(), encode_b64(key.as_bytes()));
}
