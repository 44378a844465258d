//! Core data types shared by the ingestion and publication engine.
//!
//! These types describe what a source produced ([`IngestOutcome`]), what
//! the CI providers report ([`RunInfo`], [`ArtifactInfo`]), and which
//! generated tree is currently servable ([`RepositoryIndex`]).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Result of asking a source whether it has something newer than its
/// high-water mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Nothing newer than the existing version key.
    Unchanged,
    /// New content, identified by `version_key`.
    Changed { version_key: String, bytes: Vec<u8> },
}

impl IngestOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, IngestOutcome::Changed { .. })
    }
}

/// A completed CI run (an Azure DevOps build or a GitHub workflow run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    /// Provider-assigned numeric id.
    pub id: i64,
    /// When this attempt of the run finished. Retried runs keep their id
    /// but report a new finish time.
    pub finished_at: DateTime<Utc>,
    /// Whether the run was triggered by a pull request.
    pub pull_request: bool,
}

/// A named artifact attached to a CI run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    /// Provider-assigned id, when the provider has one.
    pub id: Option<i64>,
    pub name: String,
}

/// One stored artifact as seen by the coordinator.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredArtifact {
    pub source: String,
    pub version_key: String,
    pub path: PathBuf,
}

/// A generated, browsable index tree.
///
/// The empty sentinel has no directory and serves no content; it is
/// current until the first successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryIndex {
    name: Option<String>,
    path: Option<PathBuf>,
}

impl RepositoryIndex {
    pub fn empty() -> Self {
        Self {
            name: None,
            path: None,
        }
    }

    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: Some(name.into()),
            path: Some(path.into()),
        }
    }

    /// Directory name under `<root>/index`, or `None` for the sentinel.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
    }
}
