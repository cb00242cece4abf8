//! app-token-core: platform-agnostic core of the GitHub App token exchange
//!
//! A GitHub Actions workflow presents its OIDC ID token and receives an
//! installation access token of a GitHub App, scoped to its own repository
//! and to any repository whose trust file names it. This crate holds the
//! JOSE primitives, the cached OIDC client, the GitHub API client and the
//! exchange itself. It depends only on the traits in [`platform`] and never
//! imports transport code.

pub mod config;
pub mod error;
pub mod github;
pub mod jwk;
pub mod jwt;
pub mod memoize;
pub mod oidc;
pub mod platform;
pub mod sts;

#[cfg(test)]
pub mod test_support;
