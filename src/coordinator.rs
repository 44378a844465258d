//! Ingestion coordinator.
//!
//! Owns the mapping from source name to the last ingested version key and
//! stored artifact path. One lock guards both the map and the artifact
//! writes, so a snapshot taken under it only ever lists complete files.
//!
//! The lock is never held across a source's network calls: the key is read,
//! the lock released, the source polled, and the lock taken again to record
//! the result.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::models::{IngestOutcome, StoredArtifact};
use crate::sources::Source;
use crate::store::ContentStore;

/// Artifact paths handed to the generator, with the keys they were
/// ingested under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSnapshot {
    pub paths: Vec<PathBuf>,
    pub version_keys: BTreeMap<String, String>,
}

pub struct IngestionCoordinator {
    store: ContentStore,
    entries: Mutex<BTreeMap<String, StoredArtifact>>,
}

impl IngestionCoordinator {
    /// Build the coordinator from what the store already holds for the
    /// configured `sources`. Stored artifacts of sources no longer
    /// configured are ignored.
    pub async fn load(store: ContentStore, sources: &[String]) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for stored in store.list_stored().await? {
            if sources.iter().any(|s| *s == stored.source) {
                tracing::debug!(
                    source = %stored.source,
                    version_key = %stored.version_key,
                    "restored stored artifact"
                );
                entries.insert(stored.source.clone(), stored);
            }
        }

        Ok(Self {
            store,
            entries: Mutex::new(entries),
        })
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Last ingested version key for `source`, or `None` if never ingested.
    pub async fn version_key(&self, source: &str) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(source)
            .map(|e| e.version_key.clone())
    }

    /// Store `bytes` as the artifact for `source` and record `version_key`.
    pub async fn record_ingested(
        &self,
        source: &str,
        version_key: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let mut entries = self.entries.lock().await;
        let path = self.store.write_artifact(source, version_key, bytes).await?;
        entries.insert(
            source.to_string(),
            StoredArtifact {
                source: source.to_string(),
                version_key: version_key.to_string(),
                path: path.clone(),
            },
        );
        Ok(path)
    }

    /// Poll `source` against its stored key and record anything new.
    /// Returns whether the source changed.
    pub async fn ingest_if_changed(&self, source: &Source) -> Result<bool> {
        let existing = self.version_key(source.name()).await;
        match source.try_ingest(existing.as_deref()).await? {
            IngestOutcome::Unchanged => Ok(false),
            IngestOutcome::Changed { version_key, bytes } => {
                self.record_ingested(source.name(), &version_key, &bytes)
                    .await?;
                source.confirm_ingested().await;
                tracing::info!(
                    source = %source.name(),
                    version_key = %version_key,
                    bytes = bytes.len(),
                    "ingested artifact"
                );
                Ok(true)
            }
        }
    }

    /// Point-in-time view of every stored artifact, ordered by source name.
    pub async fn snapshot(&self) -> ArtifactSnapshot {
        let entries = self.entries.lock().await;
        ArtifactSnapshot {
            paths: entries.values().map(|e| e.path.clone()).collect(),
            version_keys: entries
                .values()
                .map(|e| (e.source.clone(), e.version_key.clone()))
                .collect(),
        }
    }

    /// Version key of every stored artifact, by source name.
    pub async fn version_keys(&self) -> BTreeMap<String, String> {
        self.snapshot().await.version_keys
    }
}
