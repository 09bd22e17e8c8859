//! Storage backend abstraction.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncRead;

use crate::error::StorageResult;

/// Lifetime of presigned URLs handed out by object stores.
pub const PUBLIC_URL_TTL_SECS: u64 = 3600;

/// Where uploaded originals and processed artifacts are kept.
///
/// All paths are logical (`uploads/...`, `processed/...`, or a bare file
/// name); each backend maps them to its own layout.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name for logs.
    fn backend_name(&self) -> &'static str;

    /// Persist a byte stream at a logical path.
    async fn save_file(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        dest: &str,
    ) -> StorageResult<()>;

    /// Remove a stored file. Removing a missing file succeeds.
    async fn delete_file(&self, path: &str) -> StorageResult<()>;

    /// Copy a stored file to an absolute local path, creating its parent
    /// directory. Fails with `NotFound` if the source does not exist.
    async fn download_to_local(&self, src: &str, local_dest: &Path) -> StorageResult<()>;

    /// Store a local file at a logical path.
    async fn upload_from_local(&self, local_src: &Path, dest: &str) -> StorageResult<()>;

    /// A URL clients can fetch the processed video from.
    ///
    /// Object stores presign a fresh URL on every call.
    async fn public_url(&self, path: &str) -> StorageResult<String>;

    /// Whether a file exists at the logical path.
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Verify the backend is reachable.
    async fn check_connectivity(&self) -> StorageResult<()>;
}

/// Content type for a stored video, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("uploads/a.mp4"), "video/mp4");
        assert_eq!(content_type_for("a.AVI"), "video/x-msvideo");
        assert_eq!(content_type_for("a.mov"), "video/quicktime");
        assert_eq!(content_type_for("a.mkv"), "video/x-matroska");
        assert_eq!(content_type_for("a.webm"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
