//! OpenID Connect support
//!
//! Discovery, key set retrieval, and validation of GitHub Actions ID tokens.

mod client;
mod discovery;
mod jwks;
mod validate;

pub use client::OidcClient;
pub use discovery::DiscoveryDocument;
pub use jwks::CertificatePinning;
pub use validate::{validate_token, ActionsClaims};

use crate::github::api::USER_AGENT;
