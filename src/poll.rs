//! Poll loop.
//!
//! One round walks every source in configuration order, records whatever
//! changed, and regenerates and publishes the index when needed:
//!
//! ```text
//! Idle ──▶ Polling ──▶ no change ───────────────────────────▶ Idle
//!                  └─▶ change ──▶ Regenerating ──▶ Publish ──▶ Idle
//! ```
//!
//! Errors stay inside the round. A failing or slow source is logged and
//! skipped; a failing generation leaves the published index in place.
//! [`PollLoop::run_round`] is the loop body and can be driven directly;
//! [`PollLoop::run`] repeats it on the configured interval until cancelled.
//!
//! # Regeneration
//!
//! A round regenerates when any source changed. With
//! `retry_failed_generation` it also regenerates when an earlier
//! generation or publish failed and has not succeeded since.
//!
//! Every published index carries a manifest of the version keys it was
//! built from. The first round after start compares it with the stored
//! keys and regenerates on any difference, so a shutdown between ingestion
//! and publication is caught up regardless of the retry setting.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::coordinator::IngestionCoordinator;
use crate::generator::IndexGenerator;
use crate::publish::PublicationManager;
use crate::sources::Source;
use crate::store::remove_index_dir;

/// What one round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Sources that ingested something new, in configuration order.
    pub changed: Vec<String>,
    /// Sources whose poll failed or timed out.
    pub failed: Vec<String>,
    /// Directory name of the index published by this round.
    pub published: Option<String>,
    pub generation_failed: bool,
    /// The round stopped early because of cancellation.
    pub cancelled: bool,
}

impl RoundOutcome {
    pub fn regenerated(&self) -> bool {
        self.published.is_some() || self.generation_failed
    }
}

pub struct PollLoop {
    sources: Arc<Vec<Source>>,
    coordinator: Arc<IngestionCoordinator>,
    generator: Arc<dyn IndexGenerator>,
    publisher: Arc<PublicationManager>,
    interval: Duration,
    source_timeout: Duration,
    retry_failed_generation: bool,
    pending_regeneration: bool,
    first_round: bool,
}

impl PollLoop {
    pub fn new(
        sources: Arc<Vec<Source>>,
        coordinator: Arc<IngestionCoordinator>,
        generator: Arc<dyn IndexGenerator>,
        publisher: Arc<PublicationManager>,
        config: &PollConfig,
    ) -> Self {
        Self {
            sources,
            coordinator,
            generator,
            publisher,
            interval: Duration::from_secs(config.interval_secs),
            source_timeout: Duration::from_secs(config.source_timeout_secs),
            retry_failed_generation: config.retry_failed_generation,
            pending_regeneration: false,
            first_round: true,
        }
    }

    /// Whether a failed regeneration is waiting to be retried.
    pub fn pending_regeneration(&self) -> bool {
        self.pending_regeneration
    }

    pub async fn run_round(&mut self, cancel: &CancellationToken) -> RoundOutcome {
        let mut outcome = RoundOutcome::default();

        let recover_unpublished =
            std::mem::take(&mut self.first_round) && self.index_is_behind_store().await;

        for source in self.sources.iter() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                r = tokio::time::timeout(
                    self.source_timeout,
                    self.coordinator.ingest_if_changed(source),
                ) => r,
            };

            match polled {
                Ok(Ok(true)) => outcome.changed.push(source.name().to_string()),
                Ok(Ok(false)) => {
                    tracing::debug!(source = %source.name(), "source unchanged");
                }
                Ok(Err(e)) => {
                    tracing::warn!(source = %source.name(), error = %format!("{:#}", e), "source poll failed");
                    outcome.failed.push(source.name().to_string());
                }
                Err(_) => {
                    tracing::warn!(
                        source = %source.name(),
                        timeout_secs = self.source_timeout.as_secs(),
                        "source poll timed out"
                    );
                    outcome.failed.push(source.name().to_string());
                }
            }
        }

        if !outcome.changed.is_empty() {
            self.pending_regeneration = true;
        }
        if outcome.cancelled {
            return outcome;
        }

        let retry = self.retry_failed_generation && self.pending_regeneration;
        if outcome.changed.is_empty() && !retry && !recover_unpublished {
            return outcome;
        }

        match self.regenerate(cancel).await {
            Ok(name) => {
                self.pending_regeneration = false;
                outcome.published = Some(name);
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "index regeneration failed");
                outcome.generation_failed = true;
                outcome.cancelled = cancel.is_cancelled();
            }
        }

        outcome
    }

    /// Whether the stored artifacts differ from what the current index was
    /// built from. An index without a readable manifest counts as behind.
    async fn index_is_behind_store(&self) -> bool {
        let stored = self.coordinator.version_keys().await;
        if stored.is_empty() {
            return false;
        }
        let indexed: Option<BTreeMap<String, String>> = match self.publisher.current().name() {
            Some(name) => match self.coordinator.store().read_index_manifest(name).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(error = %format!("{:#}", e), "unreadable index manifest");
                    None
                }
            },
            None => None,
        };

        let behind = indexed.as_ref() != Some(&stored);
        if behind {
            tracing::info!("stored artifacts are newer than the published index");
        }
        behind
    }

    /// Generate a fresh index from a snapshot of the stored artifacts and
    /// publish it. The snapshot is taken after every source of the round
    /// has finished.
    async fn regenerate(&self, cancel: &CancellationToken) -> Result<String> {
        let snapshot = self.coordinator.snapshot().await;
        let store = self.coordinator.store();
        let name = store.new_index_name();
        let out_dir = store.index_dir(&name);

        let generated = tokio::select! {
            _ = cancel.cancelled() => Err(anyhow!("index generation cancelled")),
            r = self.generator.generate(&snapshot.paths, &out_dir) => r,
        };

        let published = match generated {
            Ok(()) => match store.write_index_manifest(&name, &snapshot.version_keys).await {
                Ok(()) => self.publisher.publish(&name).await.map(|_| ()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = published {
            if tokio::fs::try_exists(&out_dir).await.unwrap_or(false) {
                if let Err(cleanup) = remove_index_dir(&out_dir).await {
                    tracing::warn!(error = %cleanup, "failed to remove unpublished index");
                }
            }
            return Err(e);
        }

        Ok(name)
    }

    /// Run rounds every `interval` until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) {
        tracing::info!(
            sources = self.sources.len(),
            interval_secs = self.interval.as_secs(),
            "poll loop started"
        );

        while !cancel.is_cancelled() {
            let outcome = self.run_round(&cancel).await;
            if outcome.cancelled {
                break;
            }
            tracing::debug!(
                changed = outcome.changed.len(),
                failed = outcome.failed.len(),
                published = outcome.published.as_deref().unwrap_or("-"),
                "poll round finished"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector_fs::FilesystemSource;
    use crate::sources::SourceKind;
    use crate::store::ContentStore;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct DirGenerator;

    #[async_trait]
    impl IndexGenerator for DirGenerator {
        async fn generate(&self, _artifacts: &[PathBuf], out_dir: &Path) -> Result<()> {
            tokio::fs::create_dir_all(out_dir).await?;
            Ok(())
        }
    }

    async fn poll_loop(tmp: &TempDir, interval_secs: u64) -> PollLoop {
        let log = tmp.path().join("a.complog");
        std::fs::write(&log, b"abc").unwrap();
        let sources = vec![Source::new(
            "a",
            SourceKind::Filesystem(FilesystemSource::new(&log)),
        )];

        let store = ContentStore::open(&tmp.path().join("store")).await.unwrap();
        let coordinator =
            IngestionCoordinator::load(store.clone(), &["a".to_string()]).await.unwrap();
        let publisher = PublicationManager::open(store).await.unwrap();
        let config = PollConfig {
            interval_secs,
            ..PollConfig::default()
        };

        PollLoop::new(
            Arc::new(sources),
            Arc::new(coordinator),
            Arc::new(DirGenerator),
            Arc::new(publisher),
            &config,
        )
    }

    #[tokio::test]
    async fn cancelled_round_does_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut poll = poll_loop(&tmp, 60).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = poll.run_round(&cancel).await;
        assert!(outcome.cancelled);
        assert!(outcome.changed.is_empty());
        assert!(poll.publisher.current().is_empty());
    }

    #[tokio::test]
    async fn run_stops_promptly_when_cancelled() {
        let tmp = TempDir::new().unwrap();
        let mut poll = poll_loop(&tmp, 3600).await;
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                poll.run(cancel).await;
                poll
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let poll = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();
        assert!(!poll.publisher.current().is_empty());
    }

    #[tokio::test]
    async fn stored_but_unpublished_artifacts_are_indexed_on_first_round() {
        let tmp = TempDir::new().unwrap();
        let mut poll = poll_loop(&tmp, 60).await;
        poll.coordinator
            .record_ingested("a", &crate::connector_fs::content_hash(b"abc"), b"abc")
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let outcome = poll.run_round(&cancel).await;
        assert!(outcome.changed.is_empty());
        assert!(outcome.published.is_some());

        let outcome = poll.run_round(&cancel).await;
        assert!(!outcome.regenerated());
    }

    #[tokio::test]
    async fn first_round_catches_up_with_keys_stored_after_last_publish() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let key = crate::connector_fs::content_hash(b"abc");
        let first = {
            let poll = poll_loop(&tmp, 60).await;
            poll.coordinator.record_ingested("a", "older", b"ab").await.unwrap();
            let first = poll.regenerate(&cancel).await.unwrap();
            // Ingested, then stopped before the next regeneration.
            poll.coordinator.record_ingested("a", &key, b"abc").await.unwrap();
            first
        };

        let mut poll = poll_loop(&tmp, 60).await;
        poll.retry_failed_generation = false;
        assert_eq!(poll.publisher.current().name(), Some(first.as_str()));

        let outcome = poll.run_round(&cancel).await;
        assert!(outcome.changed.is_empty());
        let published = outcome.published.expect("index regenerated");
        assert_ne!(published, first);
        let manifest = poll
            .coordinator
            .store()
            .read_index_manifest(&published)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manifest["a"], key);

        assert!(!poll.run_round(&cancel).await.regenerated());
    }
}
