//! API base URL normalization

use ::url::Url;

use crate::error::{ApiError, Result};

/// Canonical form of an API base URL
///
/// The host is lowercased, a default port is dropped, trailing slashes are
/// trimmed and any query or fragment is discarded. A URL without a scheme is
/// taken as `http`.
pub fn canonical_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| ApiError::invalid_request(format!("invalid url {:?}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ApiError::invalid_request(format!(
                "unknown scheme: {}",
                other
            )))
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| ApiError::invalid_request(format!("url {:?} has no host", raw)))?
        .to_ascii_lowercase();

    let mut canonical = format!("{}://{}", url.scheme(), host);
    // `port()` is already `None` for the scheme's default port
    if let Some(port) = url.port() {
        canonical.push_str(&format!(":{}", port));
    }
    canonical.push_str(url.path().trim_end_matches('/'));

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_url() {
        let cases = [
            ("https://api.github.com", "https://api.github.com"),
            ("https://api.github.com/", "https://api.github.com"),
            ("https://API.GitHub.com", "https://api.github.com"),
            ("https://api.github.com:443", "https://api.github.com"),
            ("https://api.github.com:8443", "https://api.github.com:8443"),
            ("http://ghe.example.com:80/api/v3/", "http://ghe.example.com/api/v3"),
            ("http://ghe.example.com:443/api/v3", "http://ghe.example.com:443/api/v3"),
            ("https://ghe.example.com/api/v3?foo=bar#frag", "https://ghe.example.com/api/v3"),
            ("ghe.example.com/api/v3", "http://ghe.example.com/api/v3"),
            ("HTTPS://GHE.example.com:443/API/v3//", "https://ghe.example.com/API/v3"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                canonical_url(input).expect("url should canonicalize"),
                expected,
                "input: {}",
                input
            );
        }
    }

    #[test]
    fn test_unknown_scheme() {
        let err = canonical_url("ftp://api.github.com").expect_err("ftp is not allowed");
        assert_eq!(err.to_string(), "unknown scheme: ftp");
    }

    #[test]
    fn test_invalid_url() {
        assert!(canonical_url("https://").is_err());
        assert!(canonical_url("").is_err());
    }
}
