//! Delegated trust between repositories
//!
//! A repository opts in to being reachable from another repository's
//! workflow by listing the caller's node ID in `.github/actions.yaml`:
//!
//! ```yaml
//! repositories:
//!   - R_kgDOF8HFZg
//! ```

use futures::future::try_join_all;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::github::api::AccessTokenRequest;
use crate::github::{GitHubClient, ScopedToken};

/// Candidate locations of the trust file, in lookup order
pub const TRUST_CONFIG_PATHS: [&str; 2] = [".github/actions.yaml", ".github/actions.yml"];

/// Contents of a repository's trust file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TrustConfig {
    #[serde(default)]
    pub repositories: Vec<String>,
}

impl TrustConfig {
    /// An empty document is an empty allow-list
    pub fn parse(data: &[u8]) -> std::result::Result<Self, serde_yaml::Error> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let config: Option<Self> = serde_yaml::from_slice(data)?;
        Ok(config.unwrap_or_default())
    }

    pub fn allows(&self, node_id: &str) -> bool {
        self.repositories.iter().any(|r| r == node_id)
    }
}

/// The workflow's own repository, as asserted by its ID token
#[derive(Debug, Clone)]
pub struct Caller {
    pub owner: String,
    pub repo: String,
    pub id: u64,
}

/// Permissions of the short-lived token used to read trust files
fn single_file_read() -> AccessTokenRequest {
    AccessTokenRequest {
        permissions: BTreeMap::from([("single_file".to_string(), "read".to_string())]),
        ..Default::default()
    }
}

/// Numeric IDs of every repository the caller may receive a token for
///
/// The caller's own repository always comes first. Every other requested
/// node ID is checked concurrently; the first rejection fails the whole
/// request.
pub async fn resolve_repository_ids(
    github: &Arc<GitHubClient>,
    installation_id: u64,
    caller: &Caller,
    requested: &[String],
) -> Result<Vec<u64>> {
    let mut ids = vec![caller.id];
    if requested.is_empty() {
        return Ok(ids);
    }

    let caller_node_id = caller_node_id(github, installation_id, caller).await?;

    let mut seen = HashSet::new();
    let targets: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|node_id| *node_id != caller_node_id && seen.insert(*node_id))
        .collect();
    debug!(
        caller = %caller_node_id,
        targets = targets.len(),
        "checking delegated trust"
    );

    let granted = try_join_all(
        targets
            .iter()
            .map(|target| check_target(github, installation_id, &caller_node_id, target)),
    )
    .await?;

    for id in granted {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

async fn caller_node_id(
    github: &Arc<GitHubClient>,
    installation_id: u64,
    caller: &Caller,
) -> Result<String> {
    let minted = github
        .create_access_token(installation_id, &single_file_read())
        .await?;
    let token = ScopedToken::new(github.clone(), minted.token);

    let result = github
        .get_repo(token.secret(), &caller.owner, &caller.repo)
        .await
        .map(|repo| repo.node_id);
    release(token).await;
    result
}

/// Verify that `target` lists `caller_node_id` and return its numeric ID
async fn check_target(
    github: &Arc<GitHubClient>,
    installation_id: u64,
    caller_node_id: &str,
    target: &str,
) -> Result<u64> {
    let minted = github
        .create_access_token(installation_id, &single_file_read())
        .await?;
    let token = ScopedToken::new(github.clone(), minted.token);

    let result = async {
        let info = github.get_repos_info(token.secret(), target).await?;
        let data = read_trust_config(github, token.secret(), &info.owner, &info.name).await?;
        let config = TrustConfig::parse(&data).map_err(|e| {
            ApiError::forbidden(format!(
                "failed to parse the trust config of {}/{}: {}",
                info.owner, info.name, e
            ))
        })?;
        if !config.allows(caller_node_id) {
            return Err(ApiError::forbidden(format!(
                "repository {} does not trust {}",
                target, caller_node_id
            )));
        }
        info!(
            target_repository = %format!("{}/{}", info.owner, info.name),
            target_id = info.id,
            "delegated trust granted"
        );
        Ok(info.id)
    }
    .await;

    release(token).await;
    result
}

/// Raw trust file of `owner/repo`, trying each of [`TRUST_CONFIG_PATHS`]
async fn read_trust_config(
    github: &GitHubClient,
    token: &str,
    owner: &str,
    repo: &str,
) -> Result<Vec<u8>> {
    for path in TRUST_CONFIG_PATHS {
        match github.get_repos_content(token, owner, repo, path).await {
            Ok(content) => return content.decode(),
            Err(e) if e.is_status(404) => debug!(owner, repo, path, "trust config not found"),
            Err(e) => return Err(e),
        }
    }
    Err(ApiError::forbidden(format!(
        "{}/{} has no {}",
        owner, repo, TRUST_CONFIG_PATHS[0]
    )))
}

async fn release(token: ScopedToken) {
    if let Err(e) = token.revoke().await {
        warn!(error = %e, "failed to revoke installation token");
    }
}
