//! Publication manager.
//!
//! Holds the currently servable [`RepositoryIndex`] behind an [`ArcSwap`].
//! Readers load a snapshot without taking a lock; a publish replaces the
//! pointer in one exchange, so a reader holds either the old or the new
//! index in full. The superseded directory is deleted on a background task
//! once it is no longer current. Readers that loaded it earlier keep their
//! `Arc`, but its files may disappear under them.
//!
//! The name of the current directory is recorded in `<root>/index/current`,
//! so a restart serves the last published index immediately.

use anyhow::{bail, Result};
use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::RepositoryIndex;
use crate::store::{remove_index_dir, ContentStore};

pub struct PublicationManager {
    store: ContentStore,
    current: ArcSwap<RepositoryIndex>,
}

impl PublicationManager {
    /// Restore the last published index, if any, and start removing every
    /// other directory under `<root>/index` in the background.
    pub async fn open(store: ContentStore) -> Result<Self> {
        let current = match store.read_current_marker().await? {
            Some(name) => {
                let dir = store.index_dir(&name);
                tracing::info!(index = %name, "restored published index");
                RepositoryIndex::new(name, dir)
            }
            None => RepositoryIndex::empty(),
        };

        let orphans = store.orphan_index_dirs(current.name()).await?;
        if !orphans.is_empty() {
            tracing::info!(count = orphans.len(), "removing stale index directories");
            tokio::spawn(async move {
                for dir in orphans {
                    remove_quietly(dir).await;
                }
            });
        }

        Ok(Self {
            store,
            current: ArcSwap::from_pointee(current),
        })
    }

    /// The index to serve right now.
    pub fn current(&self) -> Arc<RepositoryIndex> {
        self.current.load_full()
    }

    /// Make the fully generated directory `name` current.
    ///
    /// The directory must carry its key manifest, which is only written
    /// after generation completed. The previous index's directory is
    /// scheduled for deletion; that deletion never fails the publish.
    pub async fn publish(&self, name: &str) -> Result<Arc<RepositoryIndex>> {
        let dir = self.store.index_dir(name);
        let is_dir = tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            bail!("Generated index directory does not exist: {}", dir.display());
        }
        if self.store.read_index_manifest(name).await?.is_none() {
            bail!("Generated index is incomplete (no manifest): {}", dir.display());
        }

        self.store.write_current_marker(name).await?;
        let next = Arc::new(RepositoryIndex::new(name, dir));
        let previous = self.current.swap(next.clone());
        tracing::info!(index = %name, "published index");

        if previous.name() != next.name() {
            if let Some(old) = previous.path() {
                tokio::spawn(remove_quietly(old.to_path_buf()));
            }
        }

        Ok(next)
    }

    /// Map an inbound request path onto the current index.
    pub fn resolve_request_path(&self, path: &str) -> Option<String> {
        resolve_request_path(&self.current(), path)
    }
}

async fn remove_quietly(dir: PathBuf) {
    match remove_index_dir(&dir).await {
        Ok(()) => tracing::debug!(dir = %dir.display(), "removed index directory"),
        Err(e) => tracing::warn!(error = %e, "failed to remove superseded index"),
    }
}

const STANDARD_FILES: &[&str] = &[
    "/index.html",
    "/documentoutline.html",
    "/favicon.ico",
    "/header.html",
    "/overview.html",
    "/styles.css",
    "/scripts.js",
];

const STANDARD_FOLDERS: &[&str] = &["content", "lib", "api"];

/// Rewrite a request path the way the serving layer looks content up.
///
/// `/` becomes `/index.html`. Shared site assets keep their path; any other
/// path is moved under `/<index dir>`. Returns `None` when the path needs
/// an index and none has been published yet.
pub fn resolve_request_path(index: &RepositoryIndex, path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return Some(path.to_string());
    }
    if path == "/" {
        return Some("/index.html".to_string());
    }

    let is_standard = match path[1..].find('/') {
        Some(end) if end > 0 => STANDARD_FOLDERS.contains(&&path[1..end + 1]),
        _ => STANDARD_FILES.contains(&path),
    };
    if is_standard {
        return Some(path.to_string());
    }

    index.name().map(|name| format!("/{}{}", name, path))
}
