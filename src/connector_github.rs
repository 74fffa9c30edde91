//! GitHub issues via the REST API.
//!
//! Lists `GET /repos/{owner}/{repo}/issues` page by page (`per_page=100`)
//! until a short page comes back or `issues.limit` is reached. Pull
//! requests share the endpoint and are dropped. Incremental syncs pass the
//! checkpoint as `since`, so only issues updated after it are fetched.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{GitHubConnectorConfig, IssuesConfig};
use crate::models::{ChunkMetadata, MetadataValue, SourceItem};
use crate::traits::Connector;

const PER_PAGE: usize = 100;
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

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
    comments: u64,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiComment {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<ApiUser>,
    created_at: DateTime<Utc>,
}

pub struct IssuesConnector {
    config: GitHubConnectorConfig,
    client: reqwest::Client,
}

impl IssuesConnector {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: GitHubConnectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("docsift/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build GitHub HTTP client")?;
        Ok(Self { config, client })
    }

    fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo
        )
    }

    async fn get_page<T: DeserializeOwned>(&self, url: &str, query: &[(String, String)]) -> Result<Vec<T>> {
        let mut request = self
            .client
            .get(url)
            .header("Accept", GITHUB_ACCEPT)
            .query(query);
        if let Some(token) = self.config.token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GitHub request failed: {}", url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub API error {} for {}: {}", status, url, body);
        }
        response
            .json()
            .await
            .with_context(|| format!("Invalid GitHub response from {}", url))
    }

    async fn fetch_comments(&self, number: u64) -> Result<Vec<ApiComment>> {
        let url = format!("{}/issues/{}/comments", self.repo_url(), number);
        let mut comments = Vec::new();
        for page in 1.. {
            let query = vec![
                ("per_page".to_string(), PER_PAGE.to_string()),
                ("page".to_string(), page.to_string()),
            ];
            let batch: Vec<ApiComment> = self.get_page(&url, &query).await?;
            let short = batch.len() < PER_PAGE;
            comments.extend(batch);
            if short {
                break;
            }
        }
        Ok(comments)
    }
}

#[async_trait]
impl Connector for IssuesConnector {
    fn name(&self) -> &str {
        "issues"
    }

    fn description(&self) -> &str {
        "GitHub issues (pull requests excluded)"
    }

    fn connector_type(&self) -> &str {
        "github"
    }

    async fn scan(&self) -> Result<Vec<SourceItem>> {
        self.scan_since(None).await
    }

    async fn scan_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<SourceItem>> {
        let issues_cfg = &self.config.issues;
        let url = format!("{}/issues", self.repo_url());
        let repository = self.config.repository();
        let source = self.source_label();
        let limit = issues_cfg.limit.unwrap_or(usize::MAX);

        let mut items = Vec::new();
        let mut skipped_prs = 0usize;

        'pages: for page in 1.. {
            let query = page_query(issues_cfg, since, page);
            let batch: Vec<ApiIssue> = self.get_page(&url, &query).await?;
            debug!(page, returned = batch.len(), "fetched issues page");
            let short = batch.len() < PER_PAGE;

            for issue in batch {
                if items.len() >= limit {
                    break 'pages;
                }
                if issue.pull_request.is_some() {
                    skipped_prs += 1;
                    continue;
                }
                let comments = if issues_cfg.include_comments && issue.comments > 0 {
                    self.fetch_comments(issue.number).await?
                } else {
                    Vec::new()
                };
                items.push(issue_to_item(&source, &repository, issue, &comments));
            }

            if short || items.len() >= limit {
                break;
            }
        }

        info!(
            source = %source,
            issues = items.len(),
            skipped_prs,
            since = ?since,
            "scanned issues"
        );
        Ok(items)
    }
}

fn page_query(cfg: &IssuesConfig, since: Option<DateTime<Utc>>, page: usize) -> Vec<(String, String)> {
    let mut query = vec![
        ("state".to_string(), cfg.state.clone()),
        ("per_page".to_string(), PER_PAGE.to_string()),
        ("page".to_string(), page.to_string()),
        ("sort".to_string(), "updated".to_string()),
        ("direction".to_string(), "asc".to_string()),
    ];
    if !cfg.labels.is_empty() {
        query.push(("labels".to_string(), cfg.labels.join(",")));
    }
    if let Some(since) = since {
        query.push((
            "since".to_string(),
            since.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
    }
    query
}

fn issue_to_item(source: &str, repository: &str, issue: ApiIssue, comments: &[ApiComment]) -> SourceItem {
    let author = issue.user.as_ref().map(|u| u.login.clone());
    let labels: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();

    let mut metadata = ChunkMetadata::new();
    metadata.insert("repository".into(), repository.into());
    metadata.insert("number".into(), MetadataValue::Integer(issue.number as i64));
    metadata.insert("state".into(), issue.state.clone().into());
    metadata.insert("labels".into(), labels.join(", ").into());
    if let Some(author) = &author {
        metadata.insert("author".into(), author.clone().into());
    }

    SourceItem {
        source: source.to_string(),
        source_id: issue.number.to_string(),
        source_url: Some(issue.html_url.clone()),
        title: Some(issue.title.clone()),
        author,
        created_at: issue.created_at,
        updated_at: issue.updated_at,
        content_type: "github/issue".to_string(),
        body: render_issue(&issue, comments),
        metadata,
    }
}

/// Markdown rendering: `# {title}`, the body, then comments if any.
fn render_issue(issue: &ApiIssue, comments: &[ApiComment]) -> String {
    let mut out = format!("# {}", issue.title.trim());
    if let Some(body) = issue.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        out.push_str("\n\n");
        out.push_str(body);
    }

    let comments: Vec<_> = comments
        .iter()
        .filter_map(|c| {
            let body = c.body.as_deref().map(str::trim).filter(|b| !b.is_empty())?;
            Some((c, body))
        })
        .collect();
    if !comments.is_empty() {
        out.push_str("\n\n## Comments");
        for (comment, body) in comments {
            let who = comment
                .user
                .as_ref()
                .map(|u| u.login.as_str())
                .unwrap_or("ghost");
            out.push_str(&format!(
                "\n\n### {} ({})\n\n{}",
                who,
                comment.created_at.format("%Y-%m-%d"),
                body
            ));
        }
    }
    out
}
