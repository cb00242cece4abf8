use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer};
use rsa::{pkcs1v15, pss};
use serde::Serialize;
use sha2::{Sha256, Sha384, Sha512};

use super::{Algorithm, Header, JwtError};
use crate::jwk::{EcPrivateKey, Key, PrivateKey};

/// Sign `claims` with `key` and return the compact serialization
pub fn sign<C: Serialize>(header: &Header, claims: &C, key: &Key) -> Result<String, JwtError> {
    let header_json =
        serde_json::to_vec(header).map_err(|e| JwtError::Signing(e.to_string()))?;
    let claims_json =
        serde_json::to_vec(claims).map_err(|e| JwtError::Signing(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );
    let signature = sign_bytes(header.alg, key, signing_input.as_bytes())?;

    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

fn sign_bytes(alg: Algorithm, key: &Key, message: &[u8]) -> Result<Vec<u8>, JwtError> {
    let private = key
        .private_key()
        .ok_or_else(|| JwtError::Signing(format!("{} key has no private part", key.key_type())))?;
    let incompatible = || JwtError::IncompatibleKey(key.key_type().to_string(), alg);

    match (alg, private) {
        (Algorithm::HS256, PrivateKey::Symmetric(k)) => hmac_sign::<Hmac<Sha256>>(k, message),
        (Algorithm::HS384, PrivateKey::Symmetric(k)) => hmac_sign::<Hmac<Sha384>>(k, message),
        (Algorithm::HS512, PrivateKey::Symmetric(k)) => hmac_sign::<Hmac<Sha512>>(k, message),
        (Algorithm::RS256, PrivateKey::Rsa(k)) => {
            encoded(pkcs1v15::SigningKey::<Sha256>::new(k.clone()).try_sign(message))
        }
        (Algorithm::RS384, PrivateKey::Rsa(k)) => {
            encoded(pkcs1v15::SigningKey::<Sha384>::new(k.clone()).try_sign(message))
        }
        (Algorithm::RS512, PrivateKey::Rsa(k)) => {
            encoded(pkcs1v15::SigningKey::<Sha512>::new(k.clone()).try_sign(message))
        }
        (Algorithm::PS256, PrivateKey::Rsa(k)) => encoded(
            pss::BlindedSigningKey::<Sha256>::new(k.clone())
                .try_sign_with_rng(&mut rand::thread_rng(), message),
        ),
        (Algorithm::PS384, PrivateKey::Rsa(k)) => encoded(
            pss::BlindedSigningKey::<Sha384>::new(k.clone())
                .try_sign_with_rng(&mut rand::thread_rng(), message),
        ),
        (Algorithm::PS512, PrivateKey::Rsa(k)) => encoded(
            pss::BlindedSigningKey::<Sha512>::new(k.clone())
                .try_sign_with_rng(&mut rand::thread_rng(), message),
        ),
        (Algorithm::ES256, PrivateKey::Ec(EcPrivateKey::P256(k))) => {
            let signing_key = p256::ecdsa::SigningKey::from(k);
            let signature: p256::ecdsa::Signature = signing_key
                .try_sign(message)
                .map_err(|e| JwtError::Signing(e.to_string()))?;
            Ok(signature.to_bytes().to_vec())
        }
        (Algorithm::ES384, PrivateKey::Ec(EcPrivateKey::P384(k))) => {
            let signing_key = p384::ecdsa::SigningKey::from(k);
            let signature: p384::ecdsa::Signature = signing_key
                .try_sign(message)
                .map_err(|e| JwtError::Signing(e.to_string()))?;
            Ok(signature.to_bytes().to_vec())
        }
        (Algorithm::EdDSA, PrivateKey::Ed25519(k)) => Ok(k.sign(message).to_bytes().to_vec()),
        _ => Err(incompatible()),
    }
}

fn encoded<S: SignatureEncoding>(result: rsa::signature::Result<S>) -> Result<Vec<u8>, JwtError> {
    result
        .map(|s| s.to_vec())
        .map_err(|e| JwtError::Signing(e.to_string()))
}

fn hmac_sign<M: Mac + hmac::digest::KeyInit>(
    secret: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, JwtError> {
    let mut mac =
        <M as Mac>::new_from_slice(secret).map_err(|e| JwtError::Signing(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}
