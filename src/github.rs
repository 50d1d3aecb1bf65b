//! GitHub API client: merged-PR diff listing and related-issue search.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::Enricher;

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = "diff-digest";

/// A closed pull request (subset of fields we care about).
#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    pub merged_at: Option<String>,
    pub html_url: String,
}

/// One changed file in a pull request. Binary files have no patch.
#[derive(Debug, Deserialize)]
pub struct PullFile {
    pub patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueSearchResults {
    items: Vec<IssueHit>,
}

#[derive(Debug, Deserialize)]
struct IssueHit {
    title: String,
}

/// A merged PR with its concatenated file patches, ready for note generation.
#[derive(Debug, Clone, Serialize)]
pub struct DiffEntry {
    pub id: String,
    pub description: String,
    pub diff: String,
    pub url: String,
}

/// One page of merged-PR diffs.
#[derive(Debug, Serialize)]
pub struct DiffPage {
    pub diffs: Vec<DiffEntry>,
    pub next_page: Option<u32>,
    pub current_page: u32,
    pub per_page: u32,
}

/// Format issue titles into the enrichment summary appended to developer
/// notes. An empty search still produces text (matching the upstream
/// endpoint), so callers see a definitive answer either way.
pub fn format_issue_summary(titles: &[String]) -> String {
    if titles.is_empty() {
        return "No related issues found.".to_string();
    }
    let list: Vec<String> = titles.iter().map(|t| format!("- {}", t)).collect();
    format!("Related issues:\n{}", list.join("\n"))
}

/// Next page number when this page came back full. A page counter already
/// at the numeric limit reads as the last page.
fn next_page_number(merged_count: usize, page: u32, per_page: u32) -> Option<u32> {
    if merged_count < per_page as usize {
        None
    } else {
        page.checked_add(1)
    }
}

pub struct GitHubClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl GitHubClient {
    /// Token is optional: unauthenticated requests work against public
    /// repos at a lower rate limit.
    pub fn new(token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    /// List one page of merged PRs for a repo, each with the concatenation
    /// of its non-empty file patches as a single diff text.
    pub async fn list_merged_diffs(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<DiffPage> {
        let url = format!("{}/repos/{}/{}/pulls", GITHUB_API, owner, repo);
        let pulls: Vec<PullRequest> = self
            .get(&url)
            .query(&[
                ("state", "closed"),
                ("per_page", &per_page.to_string()),
                ("page", &page.to_string()),
            ])
            .send()
            .await
            .context("Failed to send pulls request to GitHub")?
            .error_for_status()
            .context("GitHub pulls API returned error status")?
            .json()
            .await
            .context("Failed to parse pulls response from GitHub")?;

        debug!(owner, repo, page, count = pulls.len(), "fetched closed PRs");

        let mut diffs = Vec::new();
        for pr in pulls.into_iter().filter(|pr| pr.merged_at.is_some()) {
            let files_url = format!(
                "{}/repos/{}/{}/pulls/{}/files",
                GITHUB_API, owner, repo, pr.number
            );
            let files: Vec<PullFile> = self
                .get(&files_url)
                .query(&[("per_page", "300")])
                .send()
                .await
                .context("Failed to send PR files request to GitHub")?
                .error_for_status()
                .context("GitHub PR files API returned error status")?
                .json()
                .await
                .context("Failed to parse PR files response from GitHub")?;

            let diff_text: Vec<String> = files.into_iter().filter_map(|f| f.patch).collect();
            diffs.push(DiffEntry {
                id: pr.number.to_string(),
                description: pr.title,
                diff: diff_text.join("\n"),
                url: pr.html_url,
            });
        }

        let next_page = next_page_number(diffs.len(), page, per_page);

        Ok(DiffPage {
            diffs,
            next_page,
            current_page: page,
            per_page,
        })
    }

    /// Search for issues that mention a PR number in their body and format
    /// the hits as an enrichment summary.
    pub async fn search_related_issues(
        &self,
        owner: &str,
        repo: &str,
        pr_number: &str,
    ) -> Result<String> {
        let url = format!("{}/search/issues", GITHUB_API);
        let query = format!("repo:{}/{} \"{}\" in:body is:issue", owner, repo, pr_number);
        let results: IssueSearchResults = self
            .get(&url)
            .query(&[("q", query.as_str())])
            .send()
            .await
            .context("Failed to send issue search request to GitHub")?
            .error_for_status()
            .context("GitHub issue search API returned error status")?
            .json()
            .await
            .context("Failed to parse issue search response from GitHub")?;

        let titles: Vec<String> = results.items.into_iter().map(|i| i.title).collect();
        debug!(owner, repo, pr_number, hits = titles.len(), "issue search done");
        Ok(format_issue_summary(&titles))
    }
}

/// Enrichment lookup backed by the issue search, keyed by PR number.
/// Failures are surfaced as `Err` and swallowed at the pipeline boundary.
pub struct IssueEnricher {
    client: std::sync::Arc<GitHubClient>,
    owner: String,
    repo: String,
}

impl IssueEnricher {
    pub fn new(client: std::sync::Arc<GitHubClient>, owner: String, repo: String) -> Self {
        Self {
            client,
            owner,
            repo,
        }
    }
}

#[async_trait]
impl Enricher for IssueEnricher {
    async fn lookup(&self, key: &str) -> Result<Option<String>> {
        let summary = self
            .client
            .search_related_issues(&self.owner, &self.repo, key)
            .await?;
        Ok(Some(summary))
    }
}
