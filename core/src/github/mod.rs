//! GitHub API module
//!
//! Handles GitHub App authentication, API calls, and installation token
//! lifetime.

pub mod api;
pub mod auth;
pub mod token;
pub mod url;

pub use api::GitHubClient;
pub use auth::AppJwtSigner;
pub use token::ScopedToken;
