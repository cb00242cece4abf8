use serde::Deserialize;
use serde_json::{Map, Value};

use super::{decode_b64, encode_b64, require, JwkError, KeyMaterial};

#[derive(Deserialize)]
struct OctParams {
    k: Option<String>,
}

pub(super) fn decode(value: &Value) -> Result<KeyMaterial, JwkError> {
    let params = OctParams::deserialize(value).map_err(|e| JwkError::Json(e.to_string()))?;
    let secret = decode_b64(require(&params.k, "k")?, "k")?;
    if secret.is_empty() {
        return Err(JwkError::invalid("k", "empty key"));
    }
    Ok(KeyMaterial::Symmetric(secret))
}

pub(super) fn encode(secret: &[u8], map: &mut Map<String, Value>) {
    map.insert("k".into(), encode_b64(secret));
}
