//! Local filesystem backend.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::paths::PathResolver;

/// Configuration for local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStorageConfig {
    /// Directory holding uploaded originals
    pub upload_dir: String,
    /// Directory holding processed artifacts
    pub processed_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: "./uploads".to_string(),
            processed_dir: "./processed".to_string(),
        }
    }
}

/// Stores files under two local directories.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    resolver: PathResolver,
}

impl LocalStorage {
    pub fn new(config: LocalStorageConfig) -> Self {
        Self {
            resolver: PathResolver::new(config.upload_dir, config.processed_dir),
        }
    }

    /// Create the storage directories if they are missing.
    pub async fn ensure_dirs(&self) -> StorageResult<()> {
        fs::create_dir_all(self.resolver.upload_root()).await?;
        fs::create_dir_all(self.resolver.processed_root()).await?;
        Ok(())
    }

    /// Physical location of a logical path. Absolute paths pass through.
    pub fn physical_path(&self, logical: &str) -> PathBuf {
        if Path::new(logical).is_absolute() {
            PathBuf::from(logical)
        } else {
            PathBuf::from(self.resolver.resolve(logical))
        }
    }

    /// Write `reader` to a sibling temp file, then rename it into place so
    /// readers never see a partial file.
    async fn write_atomically(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        dest: &Path,
    ) -> StorageResult<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = temp_sibling(dest);
        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            let written = tokio::io::copy(&mut *reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, dest).await?;
            Ok::<_, std::io::Error>(written)
        }
        .await;

        match result {
            Ok(written) => Ok(written),
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&tmp).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %tmp.display(), "Failed to remove temp file: {}", cleanup);
                    }
                }
                Err(StorageError::Io(e))
            }
        }
    }
}

fn temp_sibling(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn save_file(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        dest: &str,
    ) -> StorageResult<()> {
        let path = self.physical_path(dest);
        let written = self.write_atomically(reader, &path).await?;
        debug!("Saved {} bytes to {}", written, path.display());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> StorageResult<()> {
        let physical = self.physical_path(path);
        match fs::remove_file(&physical).await {
            Ok(()) => {
                debug!("Deleted {}", physical.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(format!(
                "{}: {}",
                physical.display(),
                e
            ))),
        }
    }

    async fn download_to_local(&self, src: &str, local_dest: &Path) -> StorageResult<()> {
        let physical = self.physical_path(src);
        if !fs::try_exists(&physical).await? {
            return Err(StorageError::not_found(physical.display().to_string()));
        }

        if let Some(parent) = local_dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::copy(&physical, local_dest).await.map_err(|e| {
            StorageError::download_failed(format!("{}: {}", physical.display(), e))
        })?;

        info!("Copied {} to {}", physical.display(), local_dest.display());
        Ok(())
    }

    async fn upload_from_local(&self, local_src: &Path, dest: &str) -> StorageResult<()> {
        let physical = self.physical_path(dest);
        let mut file = fs::File::open(local_src).await.map_err(|e| {
            StorageError::upload_failed(format!("{}: {}", local_src.display(), e))
        })?;
        self.write_atomically(&mut file, &physical).await?;
        info!("Stored {} at {}", local_src.display(), physical.display());
        Ok(())
    }

    async fn public_url(&self, path: &str) -> StorageResult<String> {
        // Served as-is by the static file server.
        Ok(path.to_string())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(fs::try_exists(self.physical_path(path)).await?)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.ensure_dirs().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> LocalStorage {
        LocalStorage::new(LocalStorageConfig {
            upload_dir: dir.path().join("uploads").to_string_lossy().to_string(),
            processed_dir: dir.path().join("processed").to_string_lossy().to_string(),
        })
    }

    #[tokio::test]
    async fn test_save_and_download() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let mut reader: &[u8] = b"original video";
        storage.save_file(&mut reader, "uploads/v1.mp4").await.unwrap();
        assert!(dir.path().join("uploads/v1.mp4").exists());
        assert!(storage.exists("uploads/v1.mp4").await.unwrap());

        let dest = dir.path().join("scratch/nested/input.mp4");
        storage.download_to_local("uploads/v1.mp4", &dest).await.unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), b"original video");
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let err = storage
            .download_to_local("uploads/ghost.mp4", &dir.path().join("x.mp4"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_upload_routes_to_processed_dir() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let src = dir.path().join("final.mp4");
        fs::write(&src, b"processed").await.unwrap();
        storage
            .upload_from_local(&src, "processed/v1_processed.mp4")
            .await
            .unwrap();

        let stored = dir.path().join("processed/v1_processed.mp4");
        assert_eq!(fs::read(&stored).await.unwrap(), b"processed");
        // Source is left in place.
        assert!(src.exists());

        // No temp files left behind.
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("processed"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let src = dir.path().join("final.mp4");

        fs::write(&src, b"first").await.unwrap();
        storage.upload_from_local(&src, "processed/v.mp4").await.unwrap();
        fs::write(&src, b"second").await.unwrap();
        storage.upload_from_local(&src, "processed/v.mp4").await.unwrap();

        let stored = dir.path().join("processed/v.mp4");
        assert_eq!(fs::read(&stored).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let mut reader: &[u8] = b"x";
        storage.save_file(&mut reader, "v.mp4").await.unwrap();
        storage.delete_file("v.mp4").await.unwrap();
        assert!(!storage.exists("v.mp4").await.unwrap());
        storage.delete_file("v.mp4").await.unwrap();
    }

    #[tokio::test]
    async fn test_public_url_unchanged() {
        let dir = TempDir::new().unwrap();
        let url = storage(&dir)
            .public_url("processed/v1_processed.mp4")
            .await
            .unwrap();
        assert_eq!(url, "processed/v1_processed.mp4");
    }

    #[tokio::test]
    async fn test_absolute_paths_pass_through() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let abs = dir.path().join("elsewhere/file.mp4");
        assert_eq!(storage.physical_path(&abs.to_string_lossy()), abs);
    }

    #[tokio::test]
    async fn test_check_connectivity_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.check_connectivity().await.unwrap();
        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join("processed").is_dir());
    }
}
