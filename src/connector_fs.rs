use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::models::IngestOutcome;

/// A compiler log read from a local path. Its version key is the
/// hex-encoded SHA-256 of the file contents, so touching the file without
/// changing it is not a change.
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    path: PathBuf,
}

impl FilesystemSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is reported as unchanged, not as an error.
    pub async fn try_ingest(&self, existing_key: Option<&str>) -> Result<IngestOutcome> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "compiler log not present");
                return Ok(IngestOutcome::Unchanged);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let key = content_hash(&bytes);
        if existing_key == Some(key.as_str()) {
            return Ok(IngestOutcome::Unchanged);
        }

        Ok(IngestOutcome::Changed {
            version_key: key,
            bytes,
        })
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[tokio::test]
    async fn new_file_is_changed_with_content_hash() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("build.complog");
        std::fs::write(&path, b"abc").unwrap();

        let outcome = FilesystemSource::new(&path).try_ingest(None).await.unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Changed {
                version_key: ABC_SHA256.to_string(),
                bytes: b"abc".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn same_content_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("build.complog");
        std::fs::write(&path, b"abc").unwrap();

        let source = FilesystemSource::new(&path);
        assert_eq!(
            source.try_ingest(Some(ABC_SHA256)).await.unwrap(),
            IngestOutcome::Unchanged
        );
        // Rewriting identical bytes bumps the mtime but not the hash.
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            source.try_ingest(Some(ABC_SHA256)).await.unwrap(),
            IngestOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn missing_file_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        let source = FilesystemSource::new(tmp.path().join("nope.complog"));
        assert_eq!(source.try_ingest(None).await.unwrap(), IngestOutcome::Unchanged);
    }

    #[tokio::test]
    async fn directory_path_is_error() {
        let tmp = TempDir::new().unwrap();
        let source = FilesystemSource::new(tmp.path());
        assert!(source.try_ingest(None).await.is_err());
    }

    #[test]
    fn hash_is_lowercase_hex() {
        assert_eq!(content_hash(b"abc"), ABC_SHA256);
    }
}
