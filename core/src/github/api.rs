//! GitHub API client
//!
//! A thin REST/GraphQL wrapper. App-level calls are authenticated with a
//! freshly signed App JWT; repository-level calls take an installation token.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use ::url::Url;

use super::url::canonical_url;
use crate::config::DEFAULT_GITHUB_API_URL;
use crate::error::{ApiError, Result};
use crate::platform::{Clock, HttpClient, HttpResponse, JwtSigner};

pub const USER_AGENT: &str = "actions-app-token/1.0";
const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// GitHub App metadata
#[derive(Debug, Clone, Deserialize)]
pub struct App {
    pub id: u64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    pub id: u64,
}

/// Body of an installation access token request
///
/// An empty repository list means every repository of the installation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccessTokenRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repository_ids: Vec<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub token: String,
    #[serde(default)]
    pub expires_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub node_id: String,
}

/// Repository identity resolved from a node ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub owner: String,
    pub name: String,
    pub id: u64,
}

/// Repository content entry
#[derive(Debug, Clone, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub content: String,
}

impl Content {
    /// Raw bytes of a file entry
    pub fn decode(&self) -> Result<Vec<u8>> {
        if self.kind != "file" {
            return Err(ApiError::upstream_error(format!(
                "unexpected content type: {:?}",
                self.kind
            )));
        }
        match self.encoding.as_str() {
            "base64" => {
                // GitHub wraps the encoded content at 60 columns
                let compact: String = self
                    .content
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                STANDARD
                    .decode(compact)
                    .map_err(|e| ApiError::upstream_error(format!("invalid file content: {}", e)))
            }
            "" => Ok(self.content.clone().into_bytes()),
            other => Err(ApiError::upstream_error(format!(
                "unknown content encoding: {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Error,
    Failure,
    Pending,
    Success,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRequest {
    pub state: CommitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub creator: Creator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Creator {
    pub login: String,
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// GitHub REST error body
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    documentation_url: String,
}

fn unexpected_status(response: &HttpResponse) -> ApiError {
    match response.json::<ErrorBody>() {
        Ok(body) => ApiError::UnexpectedStatusCode {
            status: response.status,
            message: body.message,
            documentation_url: body.documentation_url,
        },
        Err(e) => ApiError::UnexpectedStatusCode {
            status: response.status,
            message: e.to_string(),
            documentation_url: String::new(),
        },
    }
}

fn expect_status(response: HttpResponse, expected: u16) -> Result<HttpResponse> {
    if response.status == expected {
        Ok(response)
    } else {
        Err(unexpected_status(&response))
    }
}

fn parse<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    response
        .json()
        .map_err(|e| ApiError::upstream_error(format!("failed to parse response: {}", e)))
}

/// Normalized path segments; `.` and empty segments are dropped and `..`
/// climbs, never above the root
fn clean_path(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments
}

/// GitHub API client bound to one App and one API server
pub struct GitHubClient {
    base_url: String,
    http: Arc<dyn HttpClient>,
    signer: Arc<dyn JwtSigner>,
    clock: Arc<dyn Clock>,
}

impl GitHubClient {
    pub fn new(
        base_url: &str,
        http: Arc<dyn HttpClient>,
        signer: Arc<dyn JwtSigner>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            base_url: canonical_url(base_url)?,
            http,
            signer,
            clock,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reject an API URL that does not point at the configured server
    pub fn validate_api_url(&self, url: &str) -> Result<()> {
        let canonical = canonical_url(url)?;
        if canonical == self.base_url {
            return Ok(());
        }
        if self.base_url == DEFAULT_GITHUB_API_URL {
            return Err(ApiError::invalid_request(
                "it looks that you use GitHub Enterprise Server, \
                 but the credential provider doesn't support it. \
                 I recommend you to build your own credential provider",
            ));
        }
        Err(ApiError::invalid_request(
            "your api server is not verified by the credential provider",
        ))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ApiError::internal(format!("invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::internal("base url cannot have a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }

    async fn app_authorization(&self) -> Result<String> {
        let jwt = self
            .signer
            .sign_app_jwt(self.clock.now_secs() as i64)
            .await?;
        Ok(format!("Bearer {}", jwt))
    }

    async fn get(&self, url: &str, authorization: &str, global_id: bool) -> Result<HttpResponse> {
        let mut headers = vec![
            ("Authorization", authorization),
            ("Accept", ACCEPT),
            ("User-Agent", USER_AGENT),
            ("X-GitHub-Api-Version", API_VERSION),
        ];
        if global_id {
            headers.push(("X-Github-Next-Global-ID", "1"));
        }
        debug!(url, "GET");
        self.http.get(url, &headers).await
    }

    async fn post(
        &self,
        url: &str,
        authorization: &str,
        body: &impl Serialize,
        global_id: bool,
    ) -> Result<HttpResponse> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ApiError::internal(format!("failed to encode request: {}", e)))?;
        let mut headers = vec![
            ("Authorization", authorization),
            ("Accept", ACCEPT),
            ("Content-Type", "application/json"),
            ("User-Agent", USER_AGENT),
            ("X-GitHub-Api-Version", API_VERSION),
        ];
        if global_id {
            headers.push(("X-Github-Next-Global-ID", "1"));
        }
        debug!(url, "POST");
        self.http.post(url, &headers, &body).await
    }

    /// The authenticated App
    pub async fn get_app(&self) -> Result<App> {
        let url = self.endpoint(&["app"])?;
        let auth = self.app_authorization().await?;
        let response = expect_status(self.get(&url, &auth, false).await?, 200)?;
        parse(&response)
    }

    /// Installation of the App on `owner/repo`
    pub async fn get_repos_installation(&self, owner: &str, repo: &str) -> Result<Installation> {
        let url = self.endpoint(&["repos", owner, repo, "installation"])?;
        let auth = self.app_authorization().await?;
        let response = expect_status(self.get(&url, &auth, false).await?, 200)?;
        parse(&response)
    }

    /// Mint an installation access token
    pub async fn create_access_token(
        &self,
        installation_id: u64,
        request: &AccessTokenRequest,
    ) -> Result<AccessToken> {
        let id = installation_id.to_string();
        let url = self.endpoint(&["app", "installations", &id, "access_tokens"])?;
        let auth = self.app_authorization().await?;
        let response = expect_status(self.post(&url, &auth, request, false).await?, 201)?;
        parse(&response)
    }

    /// Revoke the installation access token used to authenticate the call
    pub async fn revoke_access_token(&self, token: &str) -> Result<()> {
        let url = self.endpoint(&["installation", "token"])?;
        let auth = format!("Bearer {}", token);
        let headers = [
            ("Authorization", auth.as_str()),
            ("Accept", ACCEPT),
            ("User-Agent", USER_AGENT),
            ("X-GitHub-Api-Version", API_VERSION),
        ];
        debug!(url, "DELETE");
        expect_status(self.http.delete(&url, &headers).await?, 204)?;
        Ok(())
    }

    /// Numeric and node ID of `owner/repo`
    pub async fn get_repo(&self, token: &str, owner: &str, repo: &str) -> Result<Repository> {
        let url = self.endpoint(&["repos", owner, repo])?;
        let auth = format!("Bearer {}", token);
        let response = expect_status(self.get(&url, &auth, true).await?, 200)?;
        parse(&response)
    }

    /// Owner, name and numeric ID of the repository with the given node ID
    pub async fn get_repos_info(&self, token: &str, node_id: &str) -> Result<RepositoryInfo> {
        const QUERY: &str = "query($id: ID!) {
  node(id: $id) {
    ... on Repository {
      owner { login }
      name
      databaseId
    }
  }
}";

        #[derive(Deserialize)]
        struct Response {
            data: Option<Data>,
            #[serde(default)]
            errors: Vec<GraphQlError>,
        }
        #[derive(Deserialize)]
        struct Data {
            node: Option<Node>,
        }
        /// Empty when the node exists but is not a repository
        #[derive(Deserialize)]
        struct Node {
            owner: Option<Owner>,
            name: Option<String>,
            #[serde(rename = "databaseId")]
            database_id: Option<u64>,
        }
        #[derive(Deserialize)]
        struct Owner {
            login: String,
        }
        #[derive(Deserialize)]
        struct GraphQlError {
            message: String,
        }

        let url = self.endpoint(&["graphql"])?;
        let auth = format!("Bearer {}", token);
        let body = serde_json::json!({
            "query": QUERY,
            "variables": { "id": node_id },
        });
        let response = expect_status(self.post(&url, &auth, &body, true).await?, 200)?;
        let response: Response = parse(&response)?;

        let info = response.data.and_then(|d| d.node).and_then(|node| {
            Some(RepositoryInfo {
                owner: node.owner?.login,
                name: node.name?,
                id: node.database_id?,
            })
        });
        match info {
            Some(info) => Ok(info),
            None => {
                let detail = response
                    .errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                debug!(node_id, detail = %detail, "repository node not resolved");
                Err(ApiError::forbidden(format!(
                    "repository {} is not found or not accessible",
                    node_id
                )))
            }
        }
    }

    /// Content entry at `path` on the default branch of `owner/repo`
    pub async fn get_repos_content(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Content> {
        let mut segments = vec!["repos", owner, repo, "contents"];
        segments.extend(clean_path(path));
        let url = self.endpoint(&segments)?;
        let auth = format!("Bearer {}", token);
        let response = expect_status(self.get(&url, &auth, true).await?, 200)?;
        parse(&response)
    }

    /// Create a commit status on `sha`
    pub async fn create_status(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &StatusRequest,
    ) -> Result<Status> {
        let url = self.endpoint(&["repos", owner, repo, "statuses", sha])?;
        let auth = format!("Bearer {}", token);
        let response = expect_status(self.post(&url, &auth, status, false).await?, 201)?;
        parse(&response)
    }
}
