//! Watermark asset and overlay filters.
//!
//! The watermark is a PNG stamped into the top-right corner of every
//! processed video. A missing asset is not fatal: the pipeline falls back
//! to publishing the scaled video unmodified.

use std::path::{Path, PathBuf};
use tracing::debug;

use reelpipe_models::{OutputFormat, WATERMARK_PADDING};

/// Default watermark asset path in the production container.
pub const DEFAULT_WATERMARK_PATH: &str = "/app/assets/watermark.png";

/// Development fallback paths to check.
const DEV_WATERMARK_PATHS: &[&str] = &["./assets/watermark.png", "../assets/watermark.png"];

/// Where the watermark image lives and how far it sits from the corner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkConfig {
    /// Path to watermark image (PNG with transparency)
    pub image_path: PathBuf,
    /// Distance from the top and right edges (pixels)
    pub padding: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self::resolve(None)
    }
}

impl WatermarkConfig {
    /// Use exactly this image.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: path.into(),
            padding: WATERMARK_PADDING,
        }
    }

    /// Pick the configured path, or the production path, or the first dev
    /// fallback that exists. Falls back to the production path even if
    /// missing; availability is checked per run.
    pub fn resolve(configured: Option<&str>) -> Self {
        if let Some(path) = configured.filter(|p| !p.trim().is_empty()) {
            return Self::from_path(path);
        }

        if Path::new(DEFAULT_WATERMARK_PATH).exists() {
            return Self::from_path(DEFAULT_WATERMARK_PATH);
        }

        for path in DEV_WATERMARK_PATHS {
            if Path::new(path).exists() {
                debug!(path = path, "Found watermark at dev fallback path");
                return Self::from_path(*path);
            }
        }

        Self::from_path(DEFAULT_WATERMARK_PATH)
    }

    /// Check if the watermark image exists.
    pub fn is_available(&self) -> bool {
        self.image_path.is_file()
    }

    /// Overlay coordinates for the top-right corner.
    pub fn position(&self) -> String {
        format!("main_w-overlay_w-{pad}:{pad}", pad = self.padding)
    }

    /// Filter graph for overlaying input 1 onto input 0.
    pub fn overlay_filter(&self) -> String {
        format!("[0:v][1:v]overlay={}[out]", self.position())
    }

    /// Filter graph that scales/pads input 0 to `format` and overlays input 1
    /// in a single pass.
    pub fn scale_and_overlay_filter(&self, format: &OutputFormat) -> String {
        format!(
            "[0:v]{}[scaled];[scaled][1:v]overlay={}[out]",
            format.scale_pad_filter(),
            self.position()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_path_wins() {
        let config = WatermarkConfig::resolve(Some("/custom/logo.png"));
        assert_eq!(config.image_path, PathBuf::from("/custom/logo.png"));
        assert_eq!(config.padding, WATERMARK_PADDING);
        assert!(!config.is_available());
    }

    #[test]
    fn test_blank_path_is_ignored() {
        let config = WatermarkConfig::resolve(Some("  "));
        assert_ne!(config.image_path, PathBuf::from("  "));
    }

    #[test]
    fn test_is_available() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wm.png");
        std::fs::write(&path, b"png").unwrap();
        assert!(WatermarkConfig::from_path(&path).is_available());
        // A directory is not an image.
        assert!(!WatermarkConfig::from_path(dir.path()).is_available());
    }

    #[test]
    fn test_position_matches_output_format() {
        let config = WatermarkConfig::from_path("wm.png");
        assert_eq!(config.position(), OutputFormat::default().watermark_position());
    }

    #[test]
    fn test_combined_filter() {
        let filter =
            WatermarkConfig::from_path("wm.png").scale_and_overlay_filter(&OutputFormat::default());
        assert!(filter.starts_with("[0:v]scale='min(1280,iw)'"));
        assert!(filter.contains("[scaled];[scaled][1:v]overlay=main_w-overlay_w-10:10[out]"));

        let overlay = WatermarkConfig::from_path("wm.png").overlay_filter();
        assert_eq!(overlay, "[0:v][1:v]overlay=main_w-overlay_w-10:10[out]");
    }
}
