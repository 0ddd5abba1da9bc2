//! GitHub REST adapter. Every request waits for a rate-limit token and then
//! goes through the client's circuit breaker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::{
    Contributor, IssueRef, IssueTracker, RepoRef, TrackerError, TrackerIssue, TrackerResult,
};
use crate::config::ApiConfig;
use crate::resilience::{CircuitState, GuardedClient};

const USER_AGENT: &str = "bug-triage-core";
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    guard: GuardedClient,
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    id: u64,
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    user: UserPayload,
    #[serde(default)]
    labels: Vec<LabelPayload>,
    html_url: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    pull_request: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct LabelPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ContributorPayload {
    id: u64,
    login: String,
    contributions: u32,
    #[serde(default)]
    html_url: String,
}

impl From<IssuePayload> for TrackerIssue {
    fn from(issue: IssuePayload) -> Self {
        Self {
            id: issue.id,
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            author: issue.user.login,
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            html_url: issue.html_url,
            created_at: issue.created_at,
        }
    }
}

impl GitHubClient {
    pub fn new(config: &ApiConfig) -> TrackerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TrackerError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.github_api_url.trim_end_matches('/').to_string(),
            token: config.github_token.clone(),
            guard: GuardedClient::new("github_api", config.rate_limit(), config.circuit_breaker()),
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.guard.circuit_state()
    }

    pub fn guard(&self) -> &GuardedClient {
        &self.guard
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> TrackerResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .guard
            .execute(|| async {
                debug!(method = %method, url = %url, "GitHub request");
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .header(reqwest::header::ACCEPT, "application/vnd.github+json");
                if !self.token.is_empty() {
                    request = request.bearer_auth(&self.token);
                }
                if let Some(body) = &body {
                    request = request.json(body);
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| TrackerError::Transport(e.to_string()))?;
                let status = response.status();
                let text = response
                    .text()
                    .await
                    .map_err(|e| TrackerError::Transport(e.to_string()))?;
                if status.is_success() {
                    Ok(text)
                } else {
                    Err(classify_status(status, path, &text))
                }
            })
            .await
            .map_err(TrackerError::from)?;

        let text = if response.trim().is_empty() {
            "null"
        } else {
            response.as_str()
        };
        serde_json::from_str(text).map_err(|e| TrackerError::Decode(format!("{path}: {e}")))
    }
}

/// Maps a non-success response to a typed error
fn classify_status(status: StatusCode, path: &str, body: &str) -> TrackerError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED => TrackerError::Unauthorized(message),
        StatusCode::NOT_FOUND => TrackerError::NotFound(path.to_string()),
        StatusCode::TOO_MANY_REQUESTS => TrackerError::RateLimited(message),
        StatusCode::FORBIDDEN if message.to_lowercase().contains("rate limit") => {
            TrackerError::RateLimited(message)
        }
        StatusCode::FORBIDDEN => TrackerError::Unauthorized(message),
        other => TrackerError::Http {
            status: other.as_u16(),
            message,
        },
    }
}

fn issue_path(issue: &IssueRef, suffix: &str) -> String {
    format!(
        "/repos/{}/{}/issues/{}/{}",
        issue.owner, issue.repo, issue.number, suffix
    )
}

#[async_trait]
impl IssueTracker for GitHubClient {
    fn name(&self) -> &str {
        "github"
    }

    async fn assign(&self, issue: &IssueRef, assignees: &[String]) -> TrackerResult<()> {
        let _: Value = self
            .request(
                Method::POST,
                &issue_path(issue, "assignees"),
                Some(json!({ "assignees": assignees })),
            )
            .await?;
        info!(issue = %issue, assignees = ?assignees, "Assigned issue");
        Ok(())
    }

    async fn add_comment(&self, issue: &IssueRef, body: &str) -> TrackerResult<()> {
        let _: Value = self
            .request(
                Method::POST,
                &issue_path(issue, "comments"),
                Some(json!({ "body": body })),
            )
            .await?;
        debug!(issue = %issue, "Added comment");
        Ok(())
    }

    async fn add_labels(&self, issue: &IssueRef, labels: &[String]) -> TrackerResult<()> {
        let _: Value = self
            .request(
                Method::POST,
                &issue_path(issue, "labels"),
                Some(json!({ "labels": labels })),
            )
            .await?;
        debug!(issue = %issue, labels = ?labels, "Added labels");
        Ok(())
    }

    async fn get_open_issues(
        &self,
        repo: &RepoRef,
        limit: usize,
    ) -> TrackerResult<Vec<TrackerIssue>> {
        let per_page = limit.clamp(1, MAX_PAGE_SIZE);
        let issues: Vec<IssuePayload> = self
            .request(
                Method::GET,
                &format!(
                    "/repos/{}/{}/issues?state=open&sort=created&direction=desc&per_page={per_page}",
                    repo.owner, repo.repo
                ),
                None,
            )
            .await?;

        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .take(limit)
            .map(TrackerIssue::from)
            .collect())
    }

    async fn list_contributors(&self, repo: &RepoRef) -> TrackerResult<Vec<Contributor>> {
        let contributors: Option<Vec<ContributorPayload>> = self
            .request(
                Method::GET,
                &format!(
                    "/repos/{}/{}/contributors?per_page={MAX_PAGE_SIZE}",
                    repo.owner, repo.repo
                ),
                None,
            )
            .await?;

        let contributors: Vec<Contributor> = contributors
            .unwrap_or_default()
            .into_iter()
            .map(|c| Contributor {
                id: c.id,
                login: c.login,
                contributions: c.contributions,
                html_url: c.html_url,
            })
            .collect();
        info!(repo = %repo, count = contributors.len(), "Retrieved contributors");
        Ok(contributors)
    }

    async fn repository_languages(&self, repo: &RepoRef) -> TrackerResult<Vec<String>> {
        let languages: BTreeMap<String, u64> = self
            .request(
                Method::GET,
                &format!("/repos/{}/{}/languages", repo.owner, repo.repo),
                None,
            )
            .await?;

        let mut ranked: Vec<(String, u64)> = languages.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked.into_iter().map(|(language, _)| language).collect())
    }

    async fn test_connection(&self) -> TrackerResult<()> {
        match self.request::<Value>(Method::GET, "/user", None).await {
            Ok(_) => {
                info!("GitHub connection verified");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "GitHub connection test failed");
                Err(e)
            }
        }
    }
}
