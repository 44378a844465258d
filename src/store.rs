//! On-disk content store.
//!
//! Owns the directory layout under the configured storage root:
//!
//! ```text
//! <root>/source/<name>/build.complog   latest raw artifact per source
//! <root>/source/<name>/version         version key of that artifact
//! <root>/index/<dir>/...               one directory per generated index
//! <root>/index/<dir>/.complog-index.json  version keys the index was built from
//! <root>/index/current                 name of the published index dir
//! ```
//!
//! The manifest is written last, once generation succeeded, and marks the
//! directory as complete.
//!
//! Every file the store writes goes through a temporary sibling and a
//! rename, so a reader sees either the previous or the new file and never
//! a partial one.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::StoredArtifact;

pub const ARTIFACT_FILE_NAME: &str = "build.complog";
const VERSION_FILE_NAME: &str = "version";
const CURRENT_MARKER_FILE_NAME: &str = "current";
pub const INDEX_MANIFEST_FILE_NAME: &str = ".complog-index.json";

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    source_root: PathBuf,
    index_root: PathBuf,
}

impl ContentStore {
    /// Open (and create if needed) the store rooted at `root`.
    pub async fn open(root: &Path) -> Result<Self> {
        let source_root = root.join("source");
        let index_root = root.join("index");
        for dir in [&source_root, &index_root] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        Ok(Self {
            root: root.to_path_buf(),
            source_root,
            index_root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.source_root.join(source)
    }

    pub fn artifact_path(&self, source: &str) -> PathBuf {
        self.source_dir(source).join(ARTIFACT_FILE_NAME)
    }

    pub fn index_dir(&self, name: &str) -> PathBuf {
        self.index_root.join(name)
    }

    /// Persist `bytes` as the artifact for `source` and record its key.
    ///
    /// The artifact is renamed into place before the key, so a crash in
    /// between leaves a stale key and the source is re-ingested on the next
    /// start rather than skipped.
    pub async fn write_artifact(
        &self,
        source: &str,
        version_key: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.source_dir(source);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create source directory: {}", dir.display()))?;

        let artifact = dir.join(ARTIFACT_FILE_NAME);
        write_replace(&artifact, bytes).await?;
        write_replace(&dir.join(VERSION_FILE_NAME), version_key.as_bytes()).await?;

        Ok(artifact)
    }

    /// Version key recorded for `source`, if it was ever ingested.
    pub async fn read_version_key(&self, source: &str) -> Result<Option<String>> {
        let path = self.source_dir(source).join(VERSION_FILE_NAME);
        read_trimmed(&path).await
    }

    /// All sources that have both an artifact and a recorded key, sorted by name.
    pub async fn list_stored(&self) -> Result<Vec<StoredArtifact>> {
        let mut stored = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.source_root)
            .await
            .with_context(|| format!("Failed to read {}", self.source_root.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let artifact = self.artifact_path(&name);
            if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
                continue;
            }
            if let Some(version_key) = self.read_version_key(&name).await? {
                stored.push(StoredArtifact {
                    source: name,
                    version_key,
                    path: artifact,
                });
            }
        }

        stored.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(stored)
    }

    /// A fresh, unused directory name for a generated index.
    pub fn new_index_name(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn write_current_marker(&self, index_name: &str) -> Result<()> {
        write_replace(
            &self.index_root.join(CURRENT_MARKER_FILE_NAME),
            index_name.as_bytes(),
        )
        .await
    }

    /// Name of the last published index, if its directory still exists.
    pub async fn read_current_marker(&self) -> Result<Option<String>> {
        let name = match read_trimmed(&self.index_root.join(CURRENT_MARKER_FILE_NAME)).await? {
            Some(name) => name,
            None => return Ok(None),
        };
        if tokio::fs::metadata(self.index_dir(&name))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            Ok(Some(name))
        } else {
            Ok(None)
        }
    }

    /// Record the source version keys a generated index was built from.
    pub async fn write_index_manifest(
        &self,
        index_name: &str,
        keys: &BTreeMap<String, String>,
    ) -> Result<()> {
        let json = serde_json::to_vec_pretty(keys)?;
        write_replace(&self.index_dir(index_name).join(INDEX_MANIFEST_FILE_NAME), &json).await
    }

    /// Version keys recorded for `index_name`, or `None` if the directory
    /// has no manifest.
    pub async fn read_index_manifest(
        &self,
        index_name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let path = self.index_dir(index_name).join(INDEX_MANIFEST_FILE_NAME);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let keys = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid index manifest: {}", path.display()))?;
        Ok(Some(keys))
    }

    /// Index directories other than `keep`.
    pub async fn orphan_index_dirs(&self, keep: Option<&str>) -> Result<Vec<PathBuf>> {
        let mut orphans = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.index_root)
            .await
            .with_context(|| format!("Failed to read {}", self.index_root.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if Some(name.to_string_lossy().as_ref()) == keep {
                continue;
            }
            orphans.push(entry.path());
        }

        orphans.sort();
        Ok(orphans)
    }
}

/// Recursively delete a generated index directory.
pub async fn remove_index_dir(path: &Path) -> Result<()> {
    tokio::fs::remove_dir_all(path)
        .await
        .with_context(|| format!("Failed to remove index directory: {}", path.display()))
}

async fn write_replace(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

async fn read_trimmed(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => {
            let s = s.trim();
            Ok(if s.is_empty() { None } else { Some(s.to_string()) })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        assert!(tmp.path().join("source").is_dir());
        assert!(tmp.path().join("index").is_dir());
        assert_eq!(
            store.artifact_path("console"),
            tmp.path().join("source/console/build.complog")
        );
    }

    #[tokio::test]
    async fn write_artifact_overwrites_and_records_key() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();

        store.write_artifact("a", "k1", b"first").await.unwrap();
        let path = store.write_artifact("a", "k2", b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(store.read_version_key("a").await.unwrap().as_deref(), Some("k2"));
        assert!(!path.with_extension("complog.tmp").exists());
    }

    #[tokio::test]
    async fn list_stored_skips_incomplete_sources() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();

        store.write_artifact("b", "kb", b"b").await.unwrap();
        store.write_artifact("a", "ka", b"a").await.unwrap();
        std::fs::create_dir_all(tmp.path().join("source/empty")).unwrap();

        let stored = store.list_stored().await.unwrap();
        let names: Vec<_> = stored.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(stored[0].version_key, "ka");
    }

    #[tokio::test]
    async fn current_marker_requires_existing_dir() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();

        assert_eq!(store.read_current_marker().await.unwrap(), None);
        store.write_current_marker("gone").await.unwrap();
        assert_eq!(store.read_current_marker().await.unwrap(), None);

        std::fs::create_dir_all(store.index_dir("live")).unwrap();
        store.write_current_marker("live").await.unwrap();
        assert_eq!(
            store.read_current_marker().await.unwrap().as_deref(),
            Some("live")
        );
    }

    #[tokio::test]
    async fn orphans_exclude_kept_dir_and_marker() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        for name in ["x", "y", "z"] {
            std::fs::create_dir_all(store.index_dir(name)).unwrap();
        }
        store.write_current_marker("y").await.unwrap();

        let orphans = store.orphan_index_dirs(Some("y")).await.unwrap();
        assert_eq!(orphans, vec![store.index_dir("x"), store.index_dir("z")]);
    }

    #[tokio::test]
    async fn index_manifest_marks_complete_dirs() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).await.unwrap();
        std::fs::create_dir_all(store.index_dir("gen")).unwrap();
        assert_eq!(store.read_index_manifest("gen").await.unwrap(), None);

        let keys = BTreeMap::from([
            ("a".to_string(), "k1".to_string()),
            ("b".to_string(), "org/proj/7".to_string()),
        ]);
        store.write_index_manifest("gen", &keys).await.unwrap();
        assert_eq!(store.read_index_manifest("gen").await.unwrap(), Some(keys));

        std::fs::write(store.index_dir("gen").join(INDEX_MANIFEST_FILE_NAME), b"{").unwrap();
        assert!(store.read_index_manifest("gen").await.is_err());
    }

    #[test]
    fn index_names_are_unique() {
        let store = ContentStore {
            root: PathBuf::from("/r"),
            source_root: PathBuf::from("/r/source"),
            index_root: PathBuf::from("/r/index"),
        };
        assert_ne!(store.new_index_name(), store.new_index_name());
    }
}
