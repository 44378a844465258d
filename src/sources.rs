//! Configured sources and their dispatch.
//!
//! A [`Source`] pairs a unique name with one of the three adapter kinds.
//! Every kind answers the same question through [`Source::try_ingest`]:
//! "is there something newer than this version key?"

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::client_pipelines::AzurePipelinesClient;
use crate::client_workflows::GitHubWorkflowsClient;
use crate::config::{Config, SourceKindConfig};
use crate::connector_fs::FilesystemSource;
use crate::connector_pipeline::PipelineSource;
use crate::connector_workflow::WorkflowSource;
use crate::coordinator::IngestionCoordinator;
use crate::models::IngestOutcome;

pub enum SourceKind {
    Filesystem(FilesystemSource),
    Pipeline(PipelineSource),
    Workflow(WorkflowSource),
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Filesystem(_) => "filesystem",
            SourceKind::Pipeline(_) => "pipeline",
            SourceKind::Workflow(_) => "workflow",
        }
    }
}

pub struct Source {
    name: String,
    kind: SourceKind,
}

impl Source {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub async fn try_ingest(&self, existing_key: Option<&str>) -> Result<IngestOutcome> {
        match &self.kind {
            SourceKind::Filesystem(s) => s.try_ingest(existing_key).await,
            SourceKind::Pipeline(s) => s.try_ingest(existing_key).await,
            SourceKind::Workflow(s) => s.try_ingest(existing_key).await,
        }
    }

    /// Tell the source that its last `Changed` outcome was stored.
    pub async fn confirm_ingested(&self) {
        match &self.kind {
            SourceKind::Filesystem(_) => {}
            SourceKind::Pipeline(s) => s.confirm_ingested().await,
            SourceKind::Workflow(s) => s.confirm_ingested().await,
        }
    }
}

/// Build the configured sources, in configuration order.
pub fn build_sources(config: &Config) -> Result<Vec<Source>> {
    let timeout = Duration::from_secs(config.poll.source_timeout_secs);
    let max_visited = config.poll.max_visited_builds;

    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let kind = match &source.kind {
            SourceKindConfig::Filesystem { path } => {
                SourceKind::Filesystem(FilesystemSource::new(path.clone()))
            }
            SourceKindConfig::Pipeline {
                organization,
                project,
                definition,
                artifact_name,
                file_name,
            } => {
                let client = AzurePipelinesClient::new(
                    organization,
                    project,
                    *definition,
                    config.credentials.azure_devops_token(),
                    timeout,
                )?;
                SourceKind::Pipeline(PipelineSource::new(
                    organization,
                    project,
                    artifact_name,
                    file_name,
                    Arc::new(client),
                    max_visited,
                ))
            }
            SourceKindConfig::Workflow {
                owner,
                repo,
                workflow_file_name,
                artifact_name,
                file_name,
            } => {
                let client = GitHubWorkflowsClient::new(
                    owner,
                    repo,
                    workflow_file_name,
                    config.credentials.github_token(),
                    timeout,
                )?;
                SourceKind::Workflow(WorkflowSource::new(
                    artifact_name,
                    file_name,
                    Arc::new(client),
                    max_visited,
                ))
            }
        };
        sources.push(Source::new(source.name.clone(), kind));
    }

    Ok(sources)
}

/// Status of a single source, as shown by `cindex sources` and `GET /sources`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub kind: String,
    pub version_key: Option<String>,
}

pub async fn get_source_statuses(
    sources: &[Source],
    coordinator: &IngestionCoordinator,
) -> Vec<SourceStatus> {
    let mut statuses = Vec::with_capacity(sources.len());
    for source in sources {
        statuses.push(SourceStatus {
            name: source.name().to_string(),
            kind: source.kind().label().to_string(),
            version_key: coordinator.version_key(source.name()).await,
        });
    }
    statuses
}

pub async fn list_sources(sources: &[Source], coordinator: &IngestionCoordinator) {
    println!("{:<20} {:<12} VERSION", "SOURCE", "KIND");
    for status in get_source_statuses(sources, coordinator).await {
        println!(
            "{:<20} {:<12} {}",
            status.name,
            status.kind,
            status.version_key.as_deref().unwrap_or("-")
        );
    }
}
