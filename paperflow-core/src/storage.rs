//! Dual-backed artifact storage.
//!
//! Bytes are persisted to a local upload directory and to a database blob
//! column on the artifact row. Reads try the disk first and fail over to
//! the blob, so a wiped ephemeral disk never loses content. Disk writes go
//! through write-then-rename, so concurrent writers of the same content
//! hash converge on one file and readers never observe partial writes.

use std::path::{Path, PathBuf};

use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::identity;
use crate::model::Artifact;

/// Outcome of a disk write: the content-addressed location plus digest.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub hash: String,
    pub size: u64,
}

/// Content-addressed file store under a single upload directory.
///
/// Layout: `{upload_dir}/{hh}/{hash}.{ext}` where `hh` is the first two
/// hex characters of the SHA-256 content hash.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an object with this hash and extension would live at.
    pub fn object_path(&self, hash: &str, extension: &str) -> PathBuf {
        let shard = &hash[..2.min(hash.len())];
        self.root
            .join(shard)
            .join(format!("{hash}.{}", extension.trim_start_matches('.')))
    }

    /// Write bytes to their content-addressed location. The bytes land in
    /// a temporary sibling first and are renamed into place, so a crashed
    /// writer leaves no partial object behind.
    pub async fn write(&self, content: &[u8], extension: &str) -> Result<StoredFile> {
        let hash = identity::content_hash(content);
        let path = self.object_path(&hash, extension);
        let dir = path
            .parent()
            .ok_or_else(|| CoreError::Internal("object path has no parent".to_string()))?;
        tokio::fs::create_dir_all(dir).await?;

        let tmp = dir.join(format!(".{hash}.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), size = content.len(), "stored file on disk");
        Ok(StoredFile {
            path,
            hash,
            size: content.len() as u64,
        })
    }

    /// Read an object back. Zero-length reads are treated as corruption
    /// and reported as errors so the caller can fail over to the blob.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let content = tokio::fs::read(path).await?;
        if content.is_empty() {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("zero-length object at {}", path.display()),
            )));
        }
        Ok(content)
    }

    pub async fn remove(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }
}

/// Storage facade combining the file store with the artifact blob column.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    files: FileStore,
    pool: PgPool,
}

impl ArtifactStore {
    pub fn new(files: FileStore, pool: PgPool) -> Self {
        Self { files, pool }
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Persist bytes to disk, best-effort. The blob half of the dual write
    /// happens when the artifact row is inserted; a disk failure here is
    /// non-fatal as long as that insert succeeds.
    pub async fn put(&self, content: &[u8], extension: &str) -> Option<StoredFile> {
        match self.files.write(content, extension).await {
            Ok(stored) => Some(stored),
            Err(err) => {
                warn!(error = %err, "disk write failed, relying on database blob");
                None
            }
        }
    }

    /// Load an artifact's bytes: disk first, blob on any disk failure.
    /// `StorageUnavailable` only when both backends come up empty.
    pub async fn get(&self, artifact: &Artifact) -> Result<Vec<u8>> {
        if let Some(path) = &artifact.disk_path {
            match self.files.read(Path::new(path)).await {
                Ok(content) => return Ok(content),
                Err(err) => {
                    warn!(
                        artifact_id = %artifact.id,
                        path = %path,
                        error = %err,
                        "disk read failed, falling back to blob"
                    );
                }
            }
        }

        let row = sqlx::query("SELECT file_content FROM artifacts WHERE id = $1")
            .bind(artifact.id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("artifact {}", artifact.id)))?;

        let blob: Option<Vec<u8>> = row
            .try_get("file_content")
            .map_err(|e| CoreError::Internal(format!("failed to read blob column: {e}")))?;

        match blob {
            Some(content) if !content.is_empty() => Ok(content),
            _ => Err(CoreError::StorageUnavailable(format!(
                "artifact {} has neither a readable disk file nor a blob",
                artifact.id
            ))),
        }
    }

    /// Remove the disk copy. The blob lives and dies with the row.
    pub async fn delete(&self, artifact: &Artifact) -> Result<()> {
        if let Some(path) = &artifact.disk_path {
            self.files.remove(Path::new(path)).await?;
        }
        Ok(())
    }

    pub async fn exists(&self, artifact: &Artifact) -> bool {
        if let Some(path) = &artifact.disk_path {
            if self.files.exists(Path::new(path)).await {
                return true;
            }
        }
        sqlx::query_scalar::<_, bool>(
            "SELECT file_content IS NOT NULL FROM artifacts WHERE id = $1",
        )
        .bind(artifact.id)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()
        .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONTENT: &[u8] = b"%PDF-1.4 storage layer test content";

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let stored = store.write(CONTENT, "pdf").await.unwrap();
        assert_eq!(stored.hash, identity::content_hash(CONTENT));
        assert_eq!(stored.size, CONTENT.len() as u64);

        let read_back = store.read(&stored.path).await.unwrap();
        assert_eq!(read_back, CONTENT);
    }

    #[tokio::test]
    async fn objects_are_sharded_by_hash_prefix() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let stored = store.write(CONTENT, "pdf").await.unwrap();
        let shard = stored
            .path
            .parent()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert_eq!(shard, stored.hash[..2]);
        assert!(stored
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with(".pdf"));
    }

    #[tokio::test]
    async fn identical_content_converges_on_one_object() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let first = store.write(CONTENT, "pdf").await.unwrap();
        let second = store.write(CONTENT, "pdf").await.unwrap();
        assert_eq!(first.path, second.path);

        // no temp files left behind
        let mut entries = tokio::fs::read_dir(first.path.parent().unwrap())
            .await
            .unwrap();
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(!entry.file_name().to_string_lossy().ends_with(".tmp"));
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn zero_length_objects_read_as_errors() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let path = dir.path().join("empty.pdf");
        tokio::fs::write(&path, b"").await.unwrap();

        assert!(store.read(&path).await.is_err());
        assert!(!store.exists(&path).await);
    }

    #[tokio::test]
    async fn remove_reports_missing_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let stored = store.write(CONTENT, "pdf").await.unwrap();
        assert!(store.remove(&stored.path).await.unwrap());
        assert!(!store.remove(&stored.path).await.unwrap());
    }
}
