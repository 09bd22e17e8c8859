//! Per-attempt scratch directories.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::MediaResult;

/// A temporary directory holding every intermediate file of one run.
///
/// The directory and its contents are removed when the value is dropped,
/// whether the run succeeded, failed or panicked.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    /// Create a scratch directory under `parent`, named after `label`.
    pub fn new_in(parent: impl AsRef<Path>, label: &str) -> MediaResult<Self> {
        let parent = parent.as_ref();
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize(label)))
            .tempdir_in(parent)?;
        debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a named artifact inside the scratch directory.
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove the directory now and report failures instead of swallowing them.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), "Failed to remove scratch directory: {}", e);
        }
    }
}

/// Keep labels safe for use as a directory name.
fn sanitize(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "run".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_on_drop() {
        let parent = TempDir::new().unwrap();
        let path = {
            let scratch = ScratchSpace::new_in(parent.path(), "video-1").unwrap();
            std::fs::write(scratch.artifact("input.mp4"), b"data").unwrap();
            assert!(scratch.artifact("input.mp4").exists());
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_removed_on_panic() {
        let parent = TempDir::new().unwrap();
        let parent_path = parent.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            let scratch = ScratchSpace::new_in(&parent_path, "boom").unwrap();
            std::fs::write(scratch.artifact("partial.mp4"), b"x").unwrap();
            panic!("pipeline blew up");
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_label_is_sanitized() {
        let parent = TempDir::new().unwrap();
        let scratch = ScratchSpace::new_in(parent.path(), "../../etc").unwrap();
        assert_eq!(scratch.path().parent().unwrap(), parent.path());
        assert!(scratch
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("______etc-"));
        scratch.close();
    }

    #[test]
    fn test_creates_missing_parent() {
        let parent = TempDir::new().unwrap();
        let nested = parent.path().join("work").join("videos");
        let scratch = ScratchSpace::new_in(&nested, "v").unwrap();
        assert!(scratch.path().starts_with(&nested));
    }
}
