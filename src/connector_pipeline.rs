//! Pipeline-artifact source.
//!
//! Ingests a file out of a named artifact of the newest completed build of
//! an Azure DevOps pipeline definition.
//!
//! # Scan
//!
//! Builds are listed newest first, at most [`MAX_BUILD_SCAN`] per poll:
//!
//! 1. A build whose key `organization/project/build` equals the stored key
//!    is the high-water mark. Everything after it is older, so the scan
//!    stops there.
//! 2. A build already inspected (same id and finish time) is skipped
//!    without API calls.
//! 3. Otherwise the build's artifacts are listed, the configured one is
//!    downloaded and `<artifact>/<file>` is extracted. The first build that
//!    yields the file is offered to the caller and the scan stops.
//!
//! An offered build only becomes visited once the caller has stored it and
//! calls [`PipelineSource::confirm_ingested`]. Provider errors abort the
//! scan; nothing is marked for the failing build, so the next poll retries it.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::archive::extract_entry;
use crate::ci::ArtifactProvider;
use crate::models::{IngestOutcome, RunInfo};
use crate::visited::VisitedBuildSet;

/// Maximum number of builds inspected per poll.
pub const MAX_BUILD_SCAN: usize = 100;

pub struct PipelineSource {
    organization: String,
    project: String,
    artifact_name: String,
    file_name: String,
    provider: Arc<dyn ArtifactProvider>,
    visited: Mutex<VisitedBuildSet>,
    offered: Mutex<Option<RunInfo>>,
}

impl PipelineSource {
    pub fn new(
        organization: &str,
        project: &str,
        artifact_name: &str,
        file_name: &str,
        provider: Arc<dyn ArtifactProvider>,
        max_visited: usize,
    ) -> Self {
        Self {
            organization: organization.to_string(),
            project: project.to_string(),
            artifact_name: artifact_name.to_string(),
            file_name: file_name.to_string(),
            provider,
            visited: Mutex::new(VisitedBuildSet::new(max_visited)),
            offered: Mutex::new(None),
        }
    }

    pub fn version_key(&self, run: &RunInfo) -> String {
        format!("{}/{}/{}", self.organization, self.project, run.id)
    }

    pub async fn try_ingest(&self, existing_key: Option<&str>) -> Result<IngestOutcome> {
        *self.offered.lock().await = None;
        let runs = self.provider.list_completed_runs(MAX_BUILD_SCAN).await?;

        for run in &runs {
            let key = self.version_key(run);
            if existing_key == Some(key.as_str()) {
                tracing::debug!(build = run.id, "reached last ingested build");
                break;
            }

            if self.visited.lock().await.contains(run.id, run.finished_at) {
                continue;
            }

            match self.fetch_file(run).await? {
                Some(bytes) => {
                    tracing::info!(build = run.id, version_key = %key, "found new compiler log");
                    *self.offered.lock().await = Some(run.clone());
                    return Ok(IngestOutcome::Changed {
                        version_key: key,
                        bytes,
                    });
                }
                None => {
                    self.visited.lock().await.insert(run.id, run.finished_at);
                }
            }
        }

        Ok(IngestOutcome::Unchanged)
    }

    /// Mark the build last returned as `Changed` as visited, so it is never
    /// ingested again even after it drops out of the build listing.
    pub async fn confirm_ingested(&self) {
        if let Some(run) = self.offered.lock().await.take() {
            self.visited.lock().await.insert(run.id, run.finished_at);
        }
    }

    async fn fetch_file(&self, run: &RunInfo) -> Result<Option<Vec<u8>>> {
        let artifacts = self.provider.list_artifacts(run).await?;
        let artifact = match artifacts.iter().find(|a| a.name == self.artifact_name) {
            Some(a) => a,
            None => {
                tracing::debug!(build = run.id, artifact = %self.artifact_name, "artifact not published");
                return Ok(None);
            }
        };

        let archive = self.provider.download_artifact(run, artifact).await?;
        let entry = format!("{}/{}", self.artifact_name, self.file_name);
        let bytes = tokio::task::spawn_blocking(move || extract_entry(&archive, &entry)).await??;
        if bytes.is_none() {
            tracing::debug!(build = run.id, file = %self.file_name, "file missing from artifact");
        }
        Ok(bytes)
    }
}
