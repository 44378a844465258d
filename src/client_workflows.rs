//! GitHub Actions workflow client.
//!
//! Scoped to one workflow file of one repository. Runs are listed with
//! `status=completed`, newest first, paging with `per_page`/`page` until
//! the requested count is reached or the listing runs out.
//!
//! A token (`Authorization: Bearer ...`) is optional for listing public
//! repositories but GitHub requires one to download artifact archives.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::ci::{http_error, ArtifactProvider};
use crate::models::{ArtifactInfo, RunInfo};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const MAX_PER_PAGE: usize = 100;

pub struct GitHubWorkflowsClient {
    client: reqwest::Client,
    base_url: String,
    owner: String,
    repo: String,
    workflow_file_name: String,
    token: Option<String>,
}

impl GitHubWorkflowsClient {
    pub fn new(
        owner: &str,
        repo: &str,
        workflow_file_name: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("complog-index/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            workflow_file_name: workflow_file_name.to_string(),
            token,
        })
    }

    /// Point the client at a different server (GitHub Enterprise, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self) -> String {
        format!("{}/repos/{}/{}", self.base_url, self.owner, self.repo)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ArtifactProvider for GitHubWorkflowsClient {
    async fn list_completed_runs(&self, max: usize) -> Result<Vec<RunInfo>> {
        let url = format!(
            "{}/actions/workflows/{}/runs",
            self.repo_url(),
            self.workflow_file_name
        );
        let per_page = max.clamp(1, MAX_PER_PAGE);
        let mut runs = Vec::new();
        let mut page = 1usize;

        while runs.len() < max {
            let resp = self
                .get(&url)
                .query(&[
                    ("status", "completed".to_string()),
                    ("per_page", per_page.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .with_context(|| {
                    format!(
                        "Failed to list runs of {}/{} workflow {}",
                        self.owner, self.repo, self.workflow_file_name
                    )
                })?;

            if !resp.status().is_success() {
                return Err(http_error("GitHub workflow run listing", resp).await);
            }

            let batch = parse_runs(&resp.text().await?)?;
            let short_page = batch.len() < per_page;
            runs.extend(batch);
            if short_page {
                break;
            }
            page += 1;
        }

        runs.truncate(max);
        Ok(runs)
    }

    async fn list_artifacts(&self, run: &RunInfo) -> Result<Vec<ArtifactInfo>> {
        let url = format!("{}/actions/runs/{}/artifacts", self.repo_url(), run.id);
        let resp = self
            .get(&url)
            .query(&[("per_page", MAX_PER_PAGE.to_string())])
            .send()
            .await
            .with_context(|| format!("Failed to list artifacts of run {}", run.id))?;

        if !resp.status().is_success() {
            return Err(http_error("GitHub artifact listing", resp).await);
        }

        parse_artifacts(&resp.text().await?)
    }

    async fn download_artifact(&self, run: &RunInfo, artifact: &ArtifactInfo) -> Result<Vec<u8>> {
        let id = artifact
            .id
            .ok_or_else(|| anyhow!("Artifact '{}' of run {} has no id", artifact.name, run.id))?;
        let url = format!("{}/actions/artifacts/{}/zip", self.repo_url(), id);

        let resp = self.get(&url).send().await.with_context(|| {
            format!(
                "Failed to download artifact '{}' of run {}",
                artifact.name, run.id
            )
        })?;

        if !resp.status().is_success() {
            return Err(http_error("GitHub artifact download", resp).await);
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

// ============ Wire types ============

#[derive(Deserialize)]
struct RunList {
    workflow_runs: Vec<RunJson>,
}

#[derive(Deserialize)]
struct RunJson {
    id: i64,
    event: String,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ArtifactList {
    artifacts: Vec<ArtifactJson>,
}

#[derive(Deserialize)]
struct ArtifactJson {
    id: i64,
    name: String,
    #[serde(default)]
    expired: bool,
}

fn parse_runs(body: &str) -> Result<Vec<RunInfo>> {
    let list: RunList = serde_json::from_str(body).context("Invalid workflow run list response")?;

    Ok(list
        .workflow_runs
        .into_iter()
        .map(|r| RunInfo {
            id: r.id,
            finished_at: r.updated_at,
            pull_request: r.event.starts_with("pull_request"),
        })
        .collect())
}

/// Expired artifacts can no longer be downloaded and are dropped.
fn parse_artifacts(body: &str) -> Result<Vec<ArtifactInfo>> {
    let list: ArtifactList = serde_json::from_str(body).context("Invalid artifact list response")?;

    Ok(list
        .artifacts
        .into_iter()
        .filter(|a| !a.expired)
        .map(|a| ArtifactInfo {
            id: Some(a.id),
            name: a.name,
        })
        .collect())
}
