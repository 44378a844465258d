//! Azure DevOps pipelines client.
//!
//! Talks to the Build REST API of one organization/project, scoped to a
//! single pipeline definition.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list runs | `GET {org}/{project}/_apis/build/builds?definitions=..&statusFilter=completed&queryOrder=finishTimeDescending` |
//! | list artifacts | `GET {org}/{project}/_apis/build/builds/{id}/artifacts` |
//! | download | `GET {org}/{project}/_apis/build/builds/{id}/artifacts?artifactName=..&$format=zip` |
//!
//! # Authentication
//!
//! An optional personal access token is sent as HTTP basic auth with an
//! empty user name. Public projects are readable without one.
//!
//! # Pagination
//!
//! Build listings are paged through the `x-ms-continuationtoken` response
//! header until the requested number of builds has been collected.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::ci::{http_error, ArtifactProvider};
use crate::models::{ArtifactInfo, RunInfo};

const DEFAULT_BASE_URL: &str = "https://dev.azure.com";
const API_VERSION: &str = "7.1";
const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";

pub struct AzurePipelinesClient {
    client: reqwest::Client,
    base_url: String,
    organization: String,
    project: String,
    definition: i64,
    token: Option<String>,
}

impl AzurePipelinesClient {
    pub fn new(
        organization: &str,
        project: &str,
        definition: i64,
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
            organization: organization.to_string(),
            project: project.to_string(),
            definition,
            token,
        })
    }

    /// Point the client at a different server (Azure DevOps Server, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn builds_url(&self) -> String {
        format!(
            "{}/{}/{}/_apis/build/builds",
            self.base_url, self.organization, self.project
        )
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.token {
            Some(token) => req.basic_auth("", Some(token)),
            None => req,
        }
    }
}

#[async_trait]
impl ArtifactProvider for AzurePipelinesClient {
    async fn list_completed_runs(&self, max: usize) -> Result<Vec<RunInfo>> {
        let mut runs = Vec::new();
        let mut continuation: Option<String> = None;

        while runs.len() < max {
            let top = (max - runs.len()).to_string();
            let definition = self.definition.to_string();
            let mut query = vec![
                ("definitions", definition.as_str()),
                ("statusFilter", "completed"),
                ("queryOrder", "finishTimeDescending"),
                ("$top", top.as_str()),
                ("api-version", API_VERSION),
            ];
            if let Some(ref token) = continuation {
                query.push(("continuationToken", token.as_str()));
            }

            let resp = self
                .get(&self.builds_url())
                .query(&query)
                .send()
                .await
                .with_context(|| {
                    format!(
                        "Failed to list builds for {}/{} definition {}",
                        self.organization, self.project, self.definition
                    )
                })?;

            if !resp.status().is_success() {
                return Err(http_error("Azure DevOps build listing", resp).await);
            }

            let next = resp
                .headers()
                .get(CONTINUATION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
                .filter(|s| !s.is_empty());

            let body = resp.text().await?;
            let page = parse_builds(&body)?;
            let empty = page.is_empty();
            runs.extend(page);

            match next {
                Some(token) if !empty => continuation = Some(token),
                _ => break,
            }
        }

        runs.truncate(max);
        Ok(runs)
    }

    async fn list_artifacts(&self, run: &RunInfo) -> Result<Vec<ArtifactInfo>> {
        let url = format!("{}/{}/artifacts", self.builds_url(), run.id);
        let resp = self
            .get(&url)
            .query(&[("api-version", API_VERSION)])
            .send()
            .await
            .with_context(|| format!("Failed to list artifacts of build {}", run.id))?;

        if !resp.status().is_success() {
            return Err(http_error("Azure DevOps artifact listing", resp).await);
        }

        parse_artifacts(&resp.text().await?)
    }

    async fn download_artifact(&self, run: &RunInfo, artifact: &ArtifactInfo) -> Result<Vec<u8>> {
        let url = format!("{}/{}/artifacts", self.builds_url(), run.id);
        let resp = self
            .get(&url)
            .query(&[
                ("artifactName", artifact.name.as_str()),
                ("$format", "zip"),
                ("api-version", API_VERSION),
            ])
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to download artifact '{}' of build {}",
                    artifact.name, run.id
                )
            })?;

        if !resp.status().is_success() {
            return Err(http_error("Azure DevOps artifact download", resp).await);
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

// ============ Wire types ============

#[derive(Deserialize)]
struct ValueList<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildJson {
    id: i64,
    #[serde(default)]
    finish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ArtifactJson {
    #[serde(default)]
    id: Option<i64>,
    name: String,
}

/// Builds without a finish time are still running and are dropped.
fn parse_builds(body: &str) -> Result<Vec<RunInfo>> {
    let list: ValueList<BuildJson> =
        serde_json::from_str(body).context("Invalid build list response")?;

    Ok(list
        .value
        .into_iter()
        .filter_map(|b| {
            b.finish_time.map(|finished_at| RunInfo {
                id: b.id,
                finished_at,
                pull_request: b.reason.as_deref() == Some("pullRequest"),
            })
        })
        .collect())
}

fn parse_artifacts(body: &str) -> Result<Vec<ArtifactInfo>> {
    let list: ValueList<ArtifactJson> =
        serde_json::from_str(body).context("Invalid artifact list response")?;

    Ok(list
        .value
        .into_iter()
        .map(|a| ArtifactInfo {
            id: a.id,
            name: a.name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completed_builds() {
        let body = r#"{
            "count": 3,
            "value": [
                {"id": 912, "buildNumber": "20240501.3", "finishTime": "2024-05-01T12:34:56.1234567Z", "reason": "individualCI"},
                {"id": 911, "finishTime": "2024-05-01T10:00:00Z", "reason": "pullRequest"},
                {"id": 910}
            ]
        }"#;
        let runs = parse_builds(body).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, 912);
        assert!(!runs[0].pull_request);
        assert!(runs[1].pull_request);
        assert_eq!(runs[1].finished_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn parses_artifacts() {
        let body = r#"{"count":2,"value":[
            {"id": 1, "name": "Logs", "resource": {"downloadUrl": "https://x"}},
            {"name": "Packages"}
        ]}"#;
        let artifacts = parse_artifacts(body).unwrap();
        assert_eq!(artifacts[0].name, "Logs");
        assert_eq!(artifacts[0].id, Some(1));
        assert_eq!(artifacts[1].id, None);
    }

    #[test]
    fn malformed_listing_is_error() {
        assert!(parse_builds("<html>").is_err());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = AzurePipelinesClient::new("org", "proj", 1, None, Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:9000/");
        assert_eq!(
            client.builds_url(),
            "http://localhost:9000/org/proj/_apis/build/builds"
        );
    }
}
