//! Installation tokens that must not outlive their use

use std::sync::Arc;
use tracing::{debug, warn};

use super::api::GitHubClient;
use crate::error::Result;

/// An installation token revoked when it is no longer needed
///
/// Call [`ScopedToken::revoke`] on every normal exit path. If the guard is
/// dropped without that (an early `?`, or the owning future was cancelled),
/// the revocation is spawned onto the current runtime instead.
pub struct ScopedToken {
    github: Arc<GitHubClient>,
    token: Option<String>,
}

impl ScopedToken {
    pub fn new(github: Arc<GitHubClient>, token: String) -> Self {
        Self {
            github,
            token: Some(token),
        }
    }

    pub fn secret(&self) -> &str {
        self.token.as_deref().unwrap_or_default()
    }

    /// Revoke now and report the outcome
    ///
    /// The token stays in the guard until the request finishes, so a
    /// cancelled revoke still falls back to the background one in `Drop`.
    pub async fn revoke(mut self) -> Result<()> {
        let Some(token) = self.token.as_deref() else {
            return Ok(());
        };
        let result = self.github.revoke_access_token(token).await;
        self.token = None;
        result
    }
}

impl Drop for ScopedToken {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let github = self.github.clone();
                debug!("revoking dropped installation token in the background");
                handle.spawn(async move {
                    if let Err(e) = github.revoke_access_token(&token).await {
                        warn!(error = %e, "failed to revoke installation token");
                    }
                });
            }
            Err(_) => warn!("installation token dropped outside a runtime; it expires on its own"),
        }
    }
}
