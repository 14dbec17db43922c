//! Issue tracker adapter (GitHub REST API).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, LINK};
use serde::Deserialize;

use super::{FetchOutcome, HttpClient, SourceAdapter};
use crate::config::GitHubConfig;
use crate::errors::AppError;
use crate::models::{issue_id, IssueKind, IssueRecord, IssueState, Source, SyncRecord};

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

/// Shared shape of `/issues` and `/pulls` list entries.
#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    html_url: String,
    #[serde(default)]
    user: Option<ApiUser>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    /// Present on pull requests only
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    /// Marker the issues listing sets on entries that are really pull requests
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl ApiIssue {
    fn into_record(self, repo: &str, kind: IssueKind) -> IssueRecord {
        IssueRecord {
            id: issue_id(repo, self.number),
            repo: repo.to_string(),
            number: self.number,
            kind,
            title: self.title,
            body: self.body.unwrap_or_default(),
            state: if self.state == "closed" {
                IssueState::Closed
            } else {
                IssueState::Open
            },
            merged: self.merged_at.is_some(),
            url: self.html_url,
            author: self.user.map(|u| u.login),
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
        }
    }
}

/// Lists issues and pull requests of every configured repository.
pub struct GitHubAdapter {
    http: HttpClient,
    token: String,
    repos: Vec<String>,
    api_url: String,
}

impl GitHubAdapter {
    pub fn new(config: &GitHubConfig, http: HttpClient) -> Self {
        Self {
            http,
            token: config.token.clone(),
            repos: config.repos.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch every issue and pull request of one repository.
    async fn fetch_repo(&self, repo: &str) -> Result<Vec<IssueRecord>, AppError> {
        let (owner, name) = parse_repo(repo)?;

        let issues_url = format!(
            "{}/repos/{}/{}/issues?state=all&per_page=100",
            self.api_url, owner, name
        );
        let pulls_url = format!(
            "{}/repos/{}/{}/pulls?state=all&per_page=100",
            self.api_url, owner, name
        );

        let mut records: Vec<IssueRecord> = self
            .list_all(issues_url)
            .await?
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| i.into_record(repo, IssueKind::Issue))
            .collect();

        records.extend(
            self.list_all(pulls_url)
                .await?
                .into_iter()
                .map(|p| p.into_record(repo, IssueKind::PullRequest)),
        );

        Ok(records)
    }

    /// Follow `Link: rel="next"` until the listing is exhausted.
    async fn list_all(&self, first_url: String) -> Result<Vec<ApiIssue>, AppError> {
        let mut items = Vec::new();
        let mut next = Some(first_url);

        while let Some(url) = next {
            let response = self
                .http
                .send(|c| {
                    c.get(&url)
                        .bearer_auth(&self.token)
                        .header("Accept", "application/vnd.github+json")
                        .header("X-GitHub-Api-Version", "2022-11-28")
                })
                .await?;

            next = next_link(response.headers());
            let page: Vec<ApiIssue> = response.json().await?;
            items.extend(page);
        }

        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for GitHubAdapter {
    fn source(&self) -> Source {
        Source::Github
    }

    fn scopes(&self) -> Vec<String> {
        self.repos.clone()
    }

    async fn fetch(&self, _since: Option<DateTime<Utc>>) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();

        for repo in &self.repos {
            match self.fetch_repo(repo).await {
                Ok(records) => {
                    tracing::debug!(repo = %repo, count = records.len(), "Fetched repository");
                    outcome
                        .records
                        .extend(records.into_iter().map(SyncRecord::Issue));
                }
                Err(e) => outcome.fail(repo.clone(), e),
            }
        }

        outcome
    }
}

/// Split `owner/repo`, rejecting anything else.
fn parse_repo(repo: &str) -> Result<(&str, &str), AppError> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(AppError::Validation(format!(
            "Invalid repository '{}', expected owner/repo",
            repo
        ))),
    }
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;

    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if is_next {
            target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .map(str::to_string)
        } else {
            None
        }
    })
}
