use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{decode_b64, encode_b64, require, JwkError, KeyMaterial};

#[derive(Deserialize)]
struct RsaParams {
    n: Option<String>,
    e: Option<String>,
    d: Option<String>,
    p: Option<String>,
    q: Option<String>,
    dp: Option<String>,
    dq: Option<String>,
    qi: Option<String>,
    #[serde(default)]
    oth: Vec<OtherPrime>,
}

/// RFC 7518 section 6.3.2.7
#[derive(Deserialize)]
struct OtherPrime {
    r: String,
    #[serde(default)]
    d: Option<String>,
    #[serde(default)]
    t: Option<String>,
}

fn big_uint(value: &str, name: &'static str) -> Result<BigUint, JwkError> {
    let bytes = decode_b64(value, name)?;
    if bytes.is_empty() {
        return Err(JwkError::invalid(name, "empty integer"));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

pub(super) fn decode(value: &Value, has_private: bool) -> Result<KeyMaterial, JwkError> {
    let params = RsaParams::deserialize(value).map_err(|e| JwkError::Json(e.to_string()))?;

    let n = big_uint(require(&params.n, "n")?, "n")?;
    let e = big_uint(require(&params.e, "e")?, "e")?;

    if !has_private {
        let key = RsaPublicKey::new(n, e).map_err(|e| JwkError::InvalidKey(e.to_string()))?;
        return Ok(KeyMaterial::RsaPublic(key));
    }

    let d = big_uint(require(&params.d, "d")?, "d")?;
    let mut primes = Vec::new();
    match (&params.p, &params.q) {
        (Some(p), Some(q)) => {
            primes.push(big_uint(p, "p")?);
            primes.push(big_uint(q, "q")?);
            for other in &params.oth {
                primes.push(big_uint(&other.r, "oth")?);
                // exponent and coefficient are recomputed from the primes
                if let Some(d) = &other.d {
                    decode_b64(d, "oth")?;
                }
                if let Some(t) = &other.t {
                    decode_b64(t, "oth")?;
                }
            }
        }
        (None, None) => {}
        (None, Some(_)) => return Err(JwkError::MissingParameter("p")),
        (Some(_), None) => return Err(JwkError::MissingParameter("q")),
    }

    let mut key = RsaPrivateKey::from_components(n, e, d, primes)
        .map_err(|e| JwkError::InvalidKey(e.to_string()))?;
    key.precompute()
        .map_err(|e| JwkError::InvalidKey(e.to_string()))?;

    if let Some(dp) = &params.dp {
        if key.dp() != Some(&big_uint(dp, "dp")?) {
            return Err(JwkError::invalid("dp", "does not match d and p"));
        }
    }
    if let Some(dq) = &params.dq {
        if key.dq() != Some(&big_uint(dq, "dq")?) {
            return Err(JwkError::invalid("dq", "does not match d and q"));
        }
    }
    if let Some(qi) = &params.qi {
        if key.crt_coefficient() != Some(big_uint(qi, "qi")?) {
            return Err(JwkError::invalid("qi", "does not match p and q"));
        }
    }

    Ok(KeyMaterial::RsaPrivate(key))
}

pub(super) fn encode_public(key: &RsaPublicKey, map: &mut Map<String, Value>) {
    map.insert("n".into(), encode_b64(&key.n().to_bytes_be()));
    map.insert("e".into(), encode_b64(&key.e().to_bytes_be()));
}

pub(super) fn encode_private(key: &RsaPrivateKey, map: &mut Map<String, Value>) {
    map.insert("n".into(), encode_b64(&key.n().to_bytes_be()));
    map.insert("e".into(), encode_b64(&key.e().to_bytes_be()));
    map.insert("d".into(), encode_b64(&key.d().to_bytes_be()));

    let primes = key.primes();
    if primes.len() < 2 {
        return;
    }
    map.insert("p".into(), encode_b64(&primes[0].to_bytes_be()));
    map.insert("q".into(), encode_b64(&primes[1].to_bytes_be()));
    if let Some(dp) = key.dp() {
        map.insert("dp".into(), encode_b64(&dp.to_bytes_be()));
    }
    if let Some(dq) = key.dq() {
        map.insert("dq".into(), encode_b64(&dq.to_bytes_be()));
    }
    if let Some(qi) = key.crt_coefficient() {
        map.insert("qi".into(), encode_b64(&qi.to_bytes_be()));
    }

    if primes.len() > 2 {
        let one = BigUint::from(1u32);
        let two = BigUint::from(2u32);
        let mut product = &primes[0] * &primes[1];
        let mut others = Vec::new();
        for r in &primes[2..] {
            let exponent = key.d() % (r - &one);
            // r is prime, so the inverse is product^(r-2) mod r
            let coefficient = product.modpow(&(r - &two), r);
            let mut entry = Map::new();
            entry.insert("r".into(), encode_b64(&r.to_bytes_be()));
            entry.insert("d".into(), encode_b64(&exponent.to_bytes_be()));
            entry.insert("t".into(), encode_b64(&coefficient.to_bytes_be()));
            others.push(Value::Object(entry));
            product = &product * r;
        }
        map.insert("oth".into(), Value::Array(others));
    }
}
