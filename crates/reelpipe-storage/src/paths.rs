//! Logical path resolution.
//!
//! Callers address files by logical paths such as `uploads/abc.mp4` or
//! `processed/abc_processed.mp4`. Each backend has an upload root and a
//! processed root (directories for local storage, key prefixes for S3);
//! [`PathResolver`] maps logical paths onto them.

/// Generic logical prefix for uploaded originals.
pub const UPLOADS_PREFIX: &str = "uploads";
/// Generic logical prefix for processed artifacts.
pub const PROCESSED_PREFIX: &str = "processed";

/// Maps logical paths onto a backend's upload and processed roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    upload_root: String,
    processed_root: String,
}

impl PathResolver {
    pub fn new(upload_root: impl Into<String>, processed_root: impl Into<String>) -> Self {
        Self {
            upload_root: normalize_root(upload_root.into()),
            processed_root: normalize_root(processed_root.into()),
        }
    }

    pub fn upload_root(&self) -> &str {
        &self.upload_root
    }

    pub fn processed_root(&self) -> &str {
        &self.processed_root
    }

    /// Resolve a logical path to its physical location.
    ///
    /// Rules, first match wins:
    /// 1. already under the upload or processed root: unchanged
    /// 2. `processed/...`: processed root + file name
    /// 3. `uploads/...`: upload root + file name
    /// 4. anything else with an extension: upload root + file name
    /// 5. otherwise unchanged
    pub fn resolve(&self, logical: &str) -> String {
        if is_under(logical, &self.upload_root) || is_under(logical, &self.processed_root) {
            return logical.to_string();
        }

        if has_prefix(logical, PROCESSED_PREFIX) {
            return join(&self.processed_root, file_name(logical));
        }

        if has_prefix(logical, UPLOADS_PREFIX) {
            return join(&self.upload_root, file_name(logical));
        }

        let name = file_name(logical);
        if has_extension(name) {
            return join(&self.upload_root, name);
        }

        logical.to_string()
    }

    /// Location of a processed artifact, whatever directory the stored
    /// path points at. Only the file name is kept.
    pub fn resolve_processed(&self, logical: &str) -> String {
        join(&self.processed_root, file_name(logical))
    }
}

fn normalize_root(root: String) -> String {
    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() && root.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Component-aware prefix check: `uploads/a.mp4` is under `uploads`,
/// `uploadsX.mp4` is not.
fn is_under(path: &str, root: &str) -> bool {
    if root.is_empty() {
        return false;
    }
    if root == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(root) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn has_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('\\'))
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn has_extension(name: &str) -> bool {
    std::path::Path::new(name).extension().is_some()
}

fn join(root: &str, name: &str) -> String {
    if root.is_empty() {
        name.to_string()
    } else if root.ends_with('/') {
        format!("{root}{name}")
    } else {
        format!("{root}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3() -> PathResolver {
        PathResolver::new("videos/uploads", "videos/processed")
    }

    #[test]
    fn test_configured_roots_pass_through() {
        let r = s3();
        assert_eq!(r.resolve("videos/uploads/a.mp4"), "videos/uploads/a.mp4");
        assert_eq!(
            r.resolve("videos/processed/sub/a.mp4"),
            "videos/processed/sub/a.mp4"
        );
    }

    #[test]
    fn test_generic_prefixes_are_rerouted() {
        let r = s3();
        assert_eq!(
            r.resolve("processed/v1_processed.mp4"),
            "videos/processed/v1_processed.mp4"
        );
        assert_eq!(r.resolve("uploads/v1.mp4"), "videos/uploads/v1.mp4");
        // Only the file name survives.
        assert_eq!(r.resolve("uploads/2024/01/v1.mp4"), "videos/uploads/v1.mp4");
    }

    #[test]
    fn test_bare_file_goes_to_uploads() {
        let r = s3();
        assert_eq!(r.resolve("v1.mp4"), "videos/uploads/v1.mp4");
        assert_eq!(r.resolve("some/dir/v1.mov"), "videos/uploads/v1.mov");
    }

    #[test]
    fn test_no_extension_unchanged() {
        let r = s3();
        assert_eq!(r.resolve("some/dir/README"), "some/dir/README");
    }

    #[test]
    fn test_default_prefixes() {
        let r = PathResolver::new("uploads", "processed");
        assert_eq!(r.resolve("uploads/a.mp4"), "uploads/a.mp4");
        assert_eq!(r.resolve("processed/a.mp4"), "processed/a.mp4");
        assert_eq!(r.resolve("a.mp4"), "uploads/a.mp4");
        // Not a path component match.
        assert_eq!(r.resolve("uploadsX.mp4"), "uploads/uploadsX.mp4");
    }

    #[test]
    fn test_local_roots() {
        let r = PathResolver::new("/data/uploads/", "/data/processed");
        assert_eq!(r.upload_root(), "/data/uploads");
        assert_eq!(r.resolve("processed/v_processed.mp4"), "/data/processed/v_processed.mp4");
        assert_eq!(r.resolve("/data/uploads/v.mp4"), "/data/uploads/v.mp4");
    }

    #[test]
    fn test_resolve_processed_keeps_file_name() {
        let r = s3();
        assert_eq!(
            r.resolve_processed("/videos/v1_processed.mp4"),
            "videos/processed/v1_processed.mp4"
        );
    }
}
