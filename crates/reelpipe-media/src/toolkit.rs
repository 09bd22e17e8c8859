//! Individual media steps.
//!
//! Each step reads one file and writes one file. The pipeline only talks to
//! the [`MediaToolkit`] trait, so tests can swap in a fake.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use reelpipe_models::OutputFormat;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};
use crate::watermark::WatermarkConfig;

/// Media steps used by the transcoding pipeline.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Inspect a source file.
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo>;

    /// Keep the first `max_secs` seconds without re-encoding.
    async fn trim(&self, input: &Path, output: &Path, max_secs: f64) -> MediaResult<()>;

    /// Drop audio streams without re-encoding.
    async fn strip_audio(&self, input: &Path, output: &Path) -> MediaResult<()>;

    /// Scale, pad and encode in one pass, overlaying the watermark when given.
    async fn transcode(
        &self,
        input: &Path,
        watermark: Option<&WatermarkConfig>,
        output: &Path,
        format: &OutputFormat,
    ) -> MediaResult<()>;

    /// Scale and pad to the output frame, no watermark.
    async fn scale_pad(&self, input: &Path, output: &Path, format: &OutputFormat)
        -> MediaResult<()>;

    /// Overlay the watermark on an already scaled video.
    async fn overlay_watermark(
        &self,
        input: &Path,
        watermark: &WatermarkConfig,
        output: &Path,
        format: &OutputFormat,
    ) -> MediaResult<()>;

    /// Publish `input` unchanged as `output`.
    async fn copy(&self, input: &Path, output: &Path) -> MediaResult<()>;
}

/// [`MediaToolkit`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegToolkit {
    runner: FfmpegRunner,
}

impl FfmpegToolkit {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &FfmpegRunner {
        &self.runner
    }
}

fn ensure_input(input: &Path) -> MediaResult<()> {
    if input.is_file() {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(input.to_path_buf()))
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo> {
        probe_video(input).await
    }

    async fn trim(&self, input: &Path, output: &Path, max_secs: f64) -> MediaResult<()> {
        ensure_input(input)?;
        debug!(max_secs, "Trimming video");
        let cmd = FfmpegCommand::new(input, output)
            .trim(0.0, max_secs)
            .stream_copy();
        self.runner.run(&cmd).await
    }

    async fn strip_audio(&self, input: &Path, output: &Path) -> MediaResult<()> {
        ensure_input(input)?;
        let cmd = FfmpegCommand::new(input, output).stream_copy().no_audio();
        self.runner.run(&cmd).await
    }

    async fn transcode(
        &self,
        input: &Path,
        watermark: Option<&WatermarkConfig>,
        output: &Path,
        format: &OutputFormat,
    ) -> MediaResult<()> {
        ensure_input(input)?;
        let cmd = match watermark {
            Some(wm) => {
                if !wm.is_available() {
                    return Err(MediaError::WatermarkUnavailable(wm.image_path.clone()));
                }
                FfmpegCommand::new(input, output)
                    .add_input(&wm.image_path)
                    .filter_complex(wm.scale_and_overlay_filter(format))
                    .map("[out]")
                    .encoding(&format.encoding)
            }
            None => FfmpegCommand::new(input, output)
                .video_filter(format.scale_pad_filter())
                .encoding(&format.encoding),
        };
        self.runner.run(&cmd).await
    }

    async fn scale_pad(
        &self,
        input: &Path,
        output: &Path,
        format: &OutputFormat,
    ) -> MediaResult<()> {
        self.transcode(input, None, output, format).await
    }

    async fn overlay_watermark(
        &self,
        input: &Path,
        watermark: &WatermarkConfig,
        output: &Path,
        format: &OutputFormat,
    ) -> MediaResult<()> {
        ensure_input(input)?;
        if !watermark.is_available() {
            return Err(MediaError::WatermarkUnavailable(
                watermark.image_path.clone(),
            ));
        }
        let cmd = FfmpegCommand::new(input, output)
            .add_input(&watermark.image_path)
            .filter_complex(watermark.overlay_filter())
            .map("[out]")
            .encoding(&format.encoding);
        self.runner.run(&cmd).await
    }

    async fn copy(&self, input: &Path, output: &Path) -> MediaResult<()> {
        ensure_input(input)?;
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_publishes_unchanged() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("converted.mp4");
        let output = dir.path().join("final.mp4");
        tokio::fs::write(&input, b"frames").await.unwrap();

        FfmpegToolkit::default().copy(&input, &output).await.unwrap();
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_missing_input_is_reported() {
        let dir = TempDir::new().unwrap();
        let toolkit = FfmpegToolkit::default();
        let missing = dir.path().join("nope.mp4");
        let out = dir.path().join("out.mp4");

        let err = toolkit.strip_audio(&missing, &out).await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
        let err = toolkit.copy(&missing, &out).await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_watermark_fails_before_ffmpeg() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp4");
        tokio::fs::write(&input, b"frames").await.unwrap();
        let wm = WatermarkConfig::from_path(dir.path().join("missing.png"));

        let err = FfmpegToolkit::default()
            .overlay_watermark(&input, &wm, &dir.path().join("out.mp4"), &OutputFormat::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::WatermarkUnavailable(_)));
    }
}
