use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rsa::signature::Verifier;
use rsa::{pkcs1v15, pss};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Sha256, Sha384, Sha512};

use super::{Algorithm, Claims, Header, JwtError, KeyFinder, NumericDate, Token};
use crate::jwk::{EcPublicKey, Key, KeyMaterial, PublicKey};

/// Allowance for issuers that truncate `nbf` to whole seconds
pub const CLOCK_SKEW_LEEWAY_SECS: i64 = 1;

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// What a token must satisfy besides a valid signature
pub struct Validation {
    algorithms: Vec<Algorithm>,
    issuer: Option<Predicate>,
    audience: Option<Predicate>,
}

impl Validation {
    /// Accept only the listed algorithms; issuer and audience are unchecked
    pub fn new(algorithms: &[Algorithm]) -> Self {
        Self {
            algorithms: algorithms.to_vec(),
            issuer: None,
            audience: None,
        }
    }

    pub fn with_issuer(self, expected: impl Into<String>) -> Self {
        let expected = expected.into();
        self.with_issuer_matching(move |iss| iss == expected)
    }

    pub fn with_issuer_matching(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.issuer = Some(Box::new(f));
        self
    }

    pub fn with_audience(self, expected: impl Into<String>) -> Self {
        let expected = expected.into();
        self.with_audience_matching(move |aud| aud == expected)
    }

    pub fn with_audience_matching(
        mut self,
        f: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.audience = Some(Box::new(f));
        self
    }

    fn check_claims<T>(&self, claims: &Claims<T>, now: i64) -> Result<(), JwtError> {
        if let Some(matches) = &self.issuer {
            let iss = claims.iss.as_deref().ok_or(JwtError::MissingClaim("iss"))?;
            if !matches(iss) {
                return Err(JwtError::InvalidIssuer(iss.to_string()));
            }
        }

        if let Some(matches) = &self.audience {
            let aud = claims.aud.as_ref().ok_or(JwtError::MissingClaim("aud"))?;
            if !aud.iter().any(|a| matches(a)) {
                return Err(JwtError::InvalidAudience);
            }
        }

        let exp = claims.exp.ok_or(JwtError::MissingClaim("exp"))?;
        if NumericDate::from_secs(now) >= exp {
            return Err(JwtError::Expired);
        }
        if let Some(nbf) = claims.nbf {
            if nbf > NumericDate::from_secs(now + CLOCK_SKEW_LEEWAY_SECS) {
                return Err(JwtError::NotYetValid);
            }
        }

        Ok(())
    }
}

fn split(token: &str) -> Result<(&str, &str, &str), JwtError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => Err(JwtError::Malformed("expected three segments".to_string())),
    }
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, JwtError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| JwtError::Malformed(format!("invalid {} encoding: {}", name, e)))
}

fn parse_header(segment: &str) -> Result<Header, JwtError> {
    #[derive(Deserialize)]
    struct RawHeader {
        alg: String,
        #[serde(default)]
        typ: Option<String>,
        #[serde(default)]
        kid: Option<String>,
    }

    let bytes = decode_segment(segment, "header")?;
    let raw: RawHeader = serde_json::from_slice(&bytes)
        .map_err(|e| JwtError::Malformed(format!("invalid header: {}", e)))?;
    Ok(Header {
        alg: raw.alg.parse()?,
        typ: raw.typ,
        kid: raw.kid,
    })
}

/// Decode the header without verifying anything else
pub fn decode_header(token: &str) -> Result<Header, JwtError> {
    let (header, _, _) = split(token)?;
    parse_header(header)
}

/// Verify a compact token and decode its claims
///
/// `now` is the current Unix time in seconds.
pub fn verify<T: DeserializeOwned>(
    token: &str,
    finder: &dyn KeyFinder,
    validation: &Validation,
    now: i64,
) -> Result<Token<T>, JwtError> {
    let (header_segment, payload_segment, signature_segment) = split(token)?;
    let header = parse_header(header_segment)?;

    if header.kid.is_none() {
        return Err(JwtError::MissingKeyId);
    }
    if !validation.algorithms.contains(&header.alg) {
        return Err(JwtError::AlgorithmNotAllowed(header.alg));
    }

    let key = finder.find_key(&header)?;
    if let Some(alg) = key.algorithm() {
        if alg != header.alg.as_str() {
            return Err(JwtError::AlgorithmMismatch {
                header: header.alg.to_string(),
                key: alg.to_string(),
            });
        }
    }

    let signature = decode_segment(signature_segment, "signature")?;
    let signing_input = &token[..header_segment.len() + 1 + payload_segment.len()];
    verify_signature(header.alg, key, signing_input.as_bytes(), &signature)?;

    let payload = decode_segment(payload_segment, "payload")?;
    let claims: Claims<T> = serde_json::from_slice(&payload)
        .map_err(|e| JwtError::Malformed(format!("invalid claims: {}", e)))?;
    validation.check_claims(&claims, now)?;

    Ok(Token { header, claims })
}

fn verify_signature(
    alg: Algorithm,
    key: &Key,
    message: &[u8],
    signature: &[u8],
) -> Result<(), JwtError> {
    if let KeyMaterial::Symmetric(secret) = key.material() {
        return match alg {
            Algorithm::HS256 => verify_hmac::<Hmac<Sha256>>(secret, message, signature),
            Algorithm::HS384 => verify_hmac::<Hmac<Sha384>>(secret, message, signature),
            Algorithm::HS512 => verify_hmac::<Hmac<Sha512>>(secret, message, signature),
            _ => Err(JwtError::IncompatibleKey(key.key_type().to_string(), alg)),
        };
    }

    let incompatible = || JwtError::IncompatibleKey(key.key_type().to_string(), alg);
    let public = key.public_key().ok_or_else(incompatible)?;
    let valid = match (alg, public) {
        (Algorithm::RS256, PublicKey::Rsa(k)) => {
            verify_with::<_, pkcs1v15::Signature>(&pkcs1v15::VerifyingKey::<Sha256>::new(k), message, signature)
        }
        (Algorithm::RS384, PublicKey::Rsa(k)) => {
            verify_with::<_, pkcs1v15::Signature>(&pkcs1v15::VerifyingKey::<Sha384>::new(k), message, signature)
        }
        (Algorithm::RS512, PublicKey::Rsa(k)) => {
            verify_with::<_, pkcs1v15::Signature>(&pkcs1v15::VerifyingKey::<Sha512>::new(k), message, signature)
        }
        (Algorithm::PS256, PublicKey::Rsa(k)) => {
            verify_with::<_, pss::Signature>(&pss::VerifyingKey::<Sha256>::new(k), message, signature)
        }
        (Algorithm::PS384, PublicKey::Rsa(k)) => {
            verify_with::<_, pss::Signature>(&pss::VerifyingKey::<Sha384>::new(k), message, signature)
        }
        (Algorithm::PS512, PublicKey::Rsa(k)) => {
            verify_with::<_, pss::Signature>(&pss::VerifyingKey::<Sha512>::new(k), message, signature)
        }
        (Algorithm::ES256, PublicKey::Ec(EcPublicKey::P256(k))) => {
            verify_with::<_, p256::ecdsa::Signature>(
                &p256::ecdsa::VerifyingKey::from(k),
                message,
                signature,
            )
        }
        (Algorithm::ES384, PublicKey::Ec(EcPublicKey::P384(k))) => {
            verify_with::<_, p384::ecdsa::Signature>(
                &p384::ecdsa::VerifyingKey::from(k),
                message,
                signature,
            )
        }
        (Algorithm::EdDSA, PublicKey::Ed25519(k)) => ed25519_dalek::Signature::from_slice(signature)
            .map(|sig| k.verify_strict(message, &sig).is_ok())
            .unwrap_or(false),
        _ => return Err(incompatible()),
    };

    if valid {
        Ok(())
    } else {
        Err(JwtError::InvalidSignature)
    }
}

fn verify_with<V, S>(verifier: &V, message: &[u8], signature: &[u8]) -> bool
where
    V: Verifier<S>,
    S: for<'a> TryFrom<&'a [u8]>,
{
    match S::try_from(signature) {
        Ok(sig) => verifier.verify(message, &sig).is_ok(),
        Err(_) => false,
    }
}

fn verify_hmac<M: Mac + hmac::digest::KeyInit>(
    secret: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), JwtError> {
    let mut mac = <M as Mac>::new_from_slice(secret).map_err(|_| JwtError::InvalidSignature)?;
    mac.update(message);
    mac.verify_slice(signature)
        .map_err(|_| JwtError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwk::tests::{
        ED25519_WITH_CERT, EC_WITH_CERT, RFC_EC_PRIVATE, RFC_HMAC, RFC_RSA_PRIVATE,
    };
    use crate::jwk::KeySet;
    use crate::jwt::{sign, Audience};
    use serde_json::{json, Value};

    const NOW: i64 = 1_700_000_000;

    fn key(raw: &str) -> Key {
        Key::parse(raw.as_bytes()).expect("fixture key should parse")
    }

    /// RFC RSA key without its `alg` so the PS family can use it too
    fn rsa_key() -> Key {
        let mut value: Value = serde_json::from_str(RFC_RSA_PRIVATE).expect("JSON");
        value.as_object_mut().expect("object").remove("alg");
        Key::from_value(&value).expect("RSA key should parse")
    }

    fn claims() -> Value {
        json!({
            "iss": "https://token.actions.githubusercontent.com",
            "aud": "https://app-token.example.com/1234567890",
            "sub": "repo:octo/hello:ref:refs/heads/main",
            "exp": NOW + 300,
            "nbf": NOW - 10,
            "iat": NOW - 10,
        })
    }

    fn validation() -> Validation {
        Validation::new(&[
            Algorithm::RS256,
            Algorithm::PS256,
            Algorithm::ES256,
            Algorithm::EdDSA,
            Algorithm::HS256,
        ])
        .with_issuer("https://token.actions.githubusercontent.com")
        .with_audience("https://app-token.example.com/1234567890")
    }

    fn token_for(key: &Key, kid: &str, alg: Algorithm, claims: &Value) -> String {
        sign(&Header::new(alg).with_key_id(kid), claims, key).expect("signing should succeed")
    }

    fn verify_generic(
        token: &str,
        set: &KeySet,
        validation: &Validation,
        now: i64,
    ) -> Result<Token<Value>, JwtError> {
        verify::<Value>(token, set, validation, now)
    }

    #[test]
    fn test_sign_and_verify_every_key_type() {
        let cases = [
            (rsa_key(), "2011-04-29", Algorithm::RS256),
            (rsa_key(), "2011-04-29", Algorithm::PS256),
            (key(RFC_EC_PRIVATE), "1", Algorithm::ES256),
            (key(EC_WITH_CERT), "ec-cert", Algorithm::ES256),
            (key(ED25519_WITH_CERT), "ed-cert", Algorithm::EdDSA),
            (
                key(RFC_HMAC),
                "HMAC key used in JWS spec Appendix A.1 example",
                Algorithm::HS256,
            ),
        ];

        for (key, kid, alg) in cases {
            let token = token_for(&key, kid, alg, &claims());
            let set = KeySet::new(vec![key]);
            let verified = verify_generic(&token, &set, &validation(), NOW)
                .unwrap_or_else(|e| panic!("{} token should verify: {}", alg, e));
            assert_eq!(verified.header.alg, alg);
            assert_eq!(
                verified.claims.sub.as_deref(),
                Some("repo:octo/hello:ref:refs/heads/main")
            );
        }
    }

    #[test]
    fn test_tampering_fails() {
        let key = key(RFC_EC_PRIVATE);
        let token = token_for(&key, "1", Algorithm::ES256, &claims());
        let set = KeySet::new(vec![key]);
        let parts: Vec<&str> = token.split('.').collect();

        let mut forged_claims = claims();
        forged_claims["sub"] = json!("repo:evil/repo:ref:refs/heads/main");
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).expect("json"));
        let tampered_payload = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        let forged_header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","kid":"1","typ":"at+jwt"}"#);
        let tampered_header = format!("{}.{}.{}", forged_header, parts[1], parts[2]);

        let mut signature = URL_SAFE_NO_PAD.decode(parts[2]).expect("signature");
        signature[10] ^= 0x01;
        let tampered_signature = format!(
            "{}.{}.{}",
            parts[0],
            parts[1],
            URL_SAFE_NO_PAD.encode(signature)
        );

        for token in [tampered_payload, tampered_header, tampered_signature] {
            assert_eq!(
                verify_generic(&token, &set, &validation(), NOW).expect_err("tampered"),
                JwtError::InvalidSignature
            );
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let token = token_for(&key(RFC_EC_PRIVATE), "1", Algorithm::ES256, &claims());
        // same kid, different key
        let other = Key::new(key(EC_WITH_CERT).material().clone()).with_key_id("1");
        let set = KeySet::new(vec![other]);
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW).expect_err("wrong key"),
            JwtError::InvalidSignature
        );
    }

    #[test]
    fn test_algorithm_must_be_allowed() {
        let key = rsa_key();
        let token = token_for(&key, "2011-04-29", Algorithm::RS512, &claims());
        let set = KeySet::new(vec![key]);
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW).expect_err("RS512 not allowed"),
            JwtError::AlgorithmNotAllowed(Algorithm::RS512)
        );
    }

    #[test]
    fn test_key_algorithm_must_match_header() {
        // RFC key declares RS256
        let key = key(RFC_RSA_PRIVATE);
        let token = token_for(&key, "2011-04-29", Algorithm::PS256, &claims());
        let set = KeySet::new(vec![key]);
        assert!(matches!(
            verify_generic(&token, &set, &validation(), NOW),
            Err(JwtError::AlgorithmMismatch { .. })
        ));
    }

    #[test]
    fn test_hmac_with_public_key_is_rejected() {
        let public = match rsa_key().public_key() {
            Some(PublicKey::Rsa(k)) => k,
            other => panic!("unexpected public key: {:?}", other),
        };
        let set = KeySet::new(vec![
            Key::new(KeyMaterial::RsaPublic(public)).with_key_id("2011-04-29")
        ]);
        let hmac = Key::new(KeyMaterial::Symmetric(b"attacker-chosen".to_vec()));
        let token = token_for(&hmac, "2011-04-29", Algorithm::HS256, &claims());
        assert!(matches!(
            verify_generic(&token, &set, &validation(), NOW),
            Err(JwtError::IncompatibleKey(..))
        ));
    }

    #[test]
    fn test_missing_kid() {
        let key = key(RFC_EC_PRIVATE);
        let token = sign(&Header::new(Algorithm::ES256), &claims(), &key).expect("sign");
        let set = KeySet::new(vec![key]);
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW).expect_err("no kid"),
            JwtError::MissingKeyId
        );
    }

    #[test]
    fn test_unknown_kid() {
        let key = key(RFC_EC_PRIVATE);
        let token = token_for(&key, "2", Algorithm::ES256, &claims());
        let set = KeySet::new(vec![key]);
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW).expect_err("unknown kid"),
            JwtError::KeyNotFound("2".to_string())
        );
    }

    #[test]
    fn test_none_algorithm() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","kid":"1"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims()).expect("json"));
        let token = format!("{}.{}.", header, payload);
        let set = KeySet::new(vec![key(RFC_EC_PRIVATE)]);
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW).expect_err("alg none"),
            JwtError::UnsupportedAlgorithm("none".to_string())
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let set = KeySet::default();
        for token in ["", "a.b", "a.b.c.d", "!!!.e30.sig"] {
            assert!(matches!(
                verify_generic(token, &set, &validation(), NOW),
                Err(JwtError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_issuer_check() {
        let key = key(RFC_EC_PRIVATE);
        let mut claims = claims();
        claims["iss"] = json!("https://evil.example.com");
        let token = token_for(&key, "1", Algorithm::ES256, &claims);
        let set = KeySet::new(vec![key]);
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW).expect_err("wrong issuer"),
            JwtError::InvalidIssuer("https://evil.example.com".to_string())
        );
    }

    #[test]
    fn test_audience_check() {
        let key = key(RFC_EC_PRIVATE);
        let set = KeySet::new(vec![key.clone()]);

        for aud in [
            json!("https://app-token.example.com/1234567890"),
            json!(["other", "https://app-token.example.com/1234567890"]),
        ] {
            let mut claims = claims();
            claims["aud"] = aud;
            let token = token_for(&key, "1", Algorithm::ES256, &claims);
            assert!(verify_generic(&token, &set, &validation(), NOW).is_ok());
        }

        for aud in [
            json!("https://app-token.example.com/1234567891"),
            json!("https://app-token.example.com/12345678901"),
            json!("https://app-token.example.com/"),
            json!([]),
        ] {
            let mut claims = claims();
            claims["aud"] = aud;
            let token = token_for(&key, "1", Algorithm::ES256, &claims);
            assert_eq!(
                verify_generic(&token, &set, &validation(), NOW).expect_err("wrong audience"),
                JwtError::InvalidAudience
            );
        }
    }

    #[test]
    fn test_any_audience() {
        let key = key(RFC_EC_PRIVATE);
        let mut claims = claims();
        claims.as_object_mut().expect("object").remove("aud");
        let token = token_for(&key, "1", Algorithm::ES256, &claims);
        let set = KeySet::new(vec![key]);
        let validation = Validation::new(&[Algorithm::ES256]);
        let verified = verify_generic(&token, &set, &validation, NOW).expect("no audience check");
        assert_eq!(verified.claims.aud, None::<Audience>);
    }

    #[test]
    fn test_time_window() {
        let key = key(RFC_EC_PRIVATE);
        let set = KeySet::new(vec![key.clone()]);
        let token = token_for(&key, "1", Algorithm::ES256, &claims());

        assert!(verify_generic(&token, &set, &validation(), NOW + 299).is_ok());
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW + 300).expect_err("expired"),
            JwtError::Expired
        );
        // nbf is NOW - 10; one second of leeway
        assert!(verify_generic(&token, &set, &validation(), NOW - 11).is_ok());
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW - 12).expect_err("too early"),
            JwtError::NotYetValid
        );
    }

    #[test]
    fn test_fractional_expiry() {
        let key = key(RFC_EC_PRIVATE);
        let set = KeySet::new(vec![key.clone()]);
        let mut claims = claims();
        claims["exp"] = json!(NOW as f64 + 0.5);
        let token = token_for(&key, "1", Algorithm::ES256, &claims);
        assert!(verify_generic(&token, &set, &validation(), NOW).is_ok());
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW + 1).expect_err("expired"),
            JwtError::Expired
        );
    }

    #[test]
    fn test_exp_is_required() {
        let key = key(RFC_EC_PRIVATE);
        let mut claims = claims();
        claims.as_object_mut().expect("object").remove("exp");
        let token = token_for(&key, "1", Algorithm::ES256, &claims);
        let set = KeySet::new(vec![key]);
        assert_eq!(
            verify_generic(&token, &set, &validation(), NOW).expect_err("no exp"),
            JwtError::MissingClaim("exp")
        );
    }

    #[test]
    fn test_decode_header() {
        let token = token_for(&key(RFC_EC_PRIVATE), "1", Algorithm::ES256, &claims());
        let header = decode_header(&token).expect("header");
        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some("1"));
        assert_eq!(header.typ.as_deref(), Some("JWT"));
    }
}
