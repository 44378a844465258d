//! CI provider client contract.
//!
//! Both CI-backed sources talk to their provider through
//! [`ArtifactProvider`]. A client is scoped to one pipeline definition or
//! one workflow when it is built, so the methods only take the run and
//! artifact they operate on.
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────────┐
//! │ PipelineSource       │────▶│ AzurePipelinesClient     │
//! │ WorkflowSource       │────▶│ GitHubWorkflowsClient    │
//! └──────────────────────┘     └──────────────────────────┘
//!             ▲ tests substitute in-memory providers
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ArtifactInfo, RunInfo};

#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    /// Completed runs, newest first, at most `max` of them.
    async fn list_completed_runs(&self, max: usize) -> Result<Vec<RunInfo>>;

    /// Artifacts published by `run`.
    async fn list_artifacts(&self, run: &RunInfo) -> Result<Vec<ArtifactInfo>>;

    /// Download `artifact` of `run` as a zip archive.
    async fn download_artifact(&self, run: &RunInfo, artifact: &ArtifactInfo) -> Result<Vec<u8>>;
}

/// Build the standard provider error for a non-success HTTP response.
pub(crate) async fn http_error(what: &str, resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    anyhow::anyhow!(
        "{} failed (HTTP {}): {}",
        what,
        status,
        body.chars().take(500).collect::<String>()
    )
}
