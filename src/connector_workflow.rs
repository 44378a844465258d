//! Workflow-artifact source.
//!
//! Ingests a file out of the artifact of the newest completed,
//! non-pull-request run of a GitHub Actions workflow. The version key is the
//! run id. At most [`MAX_RUN_SCAN`] runs are looked at per poll.
//!
//! A run must publish exactly one artifact with the configured name; runs
//! with none or several are skipped. The scan stops at the run whose id
//! equals the stored key, or after the first run the file was extracted from.
//! That run is remembered as visited once the caller confirms it was stored.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::archive::extract_entry;
use crate::ci::ArtifactProvider;
use crate::models::{IngestOutcome, RunInfo};
use crate::visited::VisitedBuildSet;

/// Maximum number of workflow runs inspected per poll.
pub const MAX_RUN_SCAN: usize = 50;

pub struct WorkflowSource {
    artifact_name: String,
    file_name: String,
    provider: Arc<dyn ArtifactProvider>,
    visited: Mutex<VisitedBuildSet>,
    offered: Mutex<Option<RunInfo>>,
}

impl WorkflowSource {
    pub fn new(
        artifact_name: &str,
        file_name: &str,
        provider: Arc<dyn ArtifactProvider>,
        max_visited: usize,
    ) -> Self {
        Self {
            artifact_name: artifact_name.to_string(),
            file_name: file_name.to_string(),
            provider,
            visited: Mutex::new(VisitedBuildSet::new(max_visited)),
            offered: Mutex::new(None),
        }
    }

    pub async fn try_ingest(&self, existing_key: Option<&str>) -> Result<IngestOutcome> {
        *self.offered.lock().await = None;
        let runs = self.provider.list_completed_runs(MAX_RUN_SCAN).await?;

        for run in runs.iter().filter(|r| !r.pull_request) {
            if self.visited.lock().await.contains(run.id, run.finished_at) {
                continue;
            }

            let artifacts = self.provider.list_artifacts(run).await?;
            let matching: Vec<_> = artifacts
                .iter()
                .filter(|a| a.name == self.artifact_name)
                .collect();
            if matching.len() != 1 {
                tracing::debug!(
                    run = run.id,
                    matches = matching.len(),
                    "skipping run without a unique artifact"
                );
                self.mark_visited(run).await;
                continue;
            }

            let key = run.id.to_string();
            if existing_key == Some(key.as_str()) {
                tracing::debug!(run = run.id, "reached last ingested run");
                break;
            }

            let archive = self.provider.download_artifact(run, matching[0]).await?;
            let entry = self.file_name.clone();
            match tokio::task::spawn_blocking(move || extract_entry(&archive, &entry)).await?? {
                Some(bytes) => {
                    tracing::info!(run = run.id, "found new compiler log");
                    *self.offered.lock().await = Some(run.clone());
                    return Ok(IngestOutcome::Changed {
                        version_key: key,
                        bytes,
                    });
                }
                None => {
                    tracing::debug!(run = run.id, file = %self.file_name, "file missing from artifact");
                    self.mark_visited(run).await;
                }
            }
        }

        Ok(IngestOutcome::Unchanged)
    }

    /// Mark the run last returned as `Changed` as visited.
    pub async fn confirm_ingested(&self) {
        if let Some(run) = self.offered.lock().await.take() {
            self.mark_visited(&run).await;
        }
    }

    async fn mark_visited(&self, run: &RunInfo) {
        self.visited.lock().await.insert(run.id, run.finished_at);
    }
}
