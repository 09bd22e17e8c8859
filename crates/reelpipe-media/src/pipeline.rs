//! Transcoding pipeline with an explicit fallback chain.
//!
//! A run goes probe → (trim) → strip audio → transcode. Transcoding tries
//! each [`TranscodeStrategy`] in [`TRANSCODE_FALLBACK_CHAIN`] order. The
//! stepwise strategy scales first, then walks [`FINISH_CHAIN`] to decide how
//! the final file is produced.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use reelpipe_models::{OutputFormat, ProcessingStage};

use crate::command::FfmpegRunner;
use crate::error::{MediaError, MediaResult};
use crate::scratch::ScratchSpace;
use crate::toolkit::{FfmpegToolkit, MediaToolkit};
use crate::watermark::WatermarkConfig;

/// Default maximum duration of a processed video (seconds).
pub const DEFAULT_MAX_DURATION_SECS: f64 = 30.0;

/// Default limit on a single ffmpeg invocation (seconds).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 1800;

/// How the scaled, watermarked output is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStrategy {
    /// Scale, pad, overlay and encode in a single ffmpeg invocation.
    CombinedPass,
    /// Scale and pad first, then finish with [`FINISH_CHAIN`].
    Stepwise,
}

impl TranscodeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeStrategy::CombinedPass => "combined_pass",
            TranscodeStrategy::Stepwise => "stepwise",
        }
    }
}

impl fmt::Display for TranscodeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last step of the stepwise strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStep {
    /// Overlay the watermark in a separate pass.
    Watermark,
    /// Publish the scaled video as is.
    CopyUnmodified,
}

/// Strategies tried in order until one succeeds.
pub const TRANSCODE_FALLBACK_CHAIN: &[TranscodeStrategy] =
    &[TranscodeStrategy::CombinedPass, TranscodeStrategy::Stepwise];

/// Finishing steps of the stepwise strategy, tried in order.
pub const FINISH_CHAIN: &[FinishStep] = &[FinishStep::Watermark, FinishStep::CopyUnmodified];

/// Pipeline parameters.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sources longer than this are cut to this length
    pub max_duration_secs: f64,
    /// Target frame and encoder settings
    pub format: OutputFormat,
    /// Watermark asset
    pub watermark: WatermarkConfig,
    /// Longest a single ffmpeg invocation may run
    pub step_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            format: OutputFormat::default(),
            watermark: WatermarkConfig::default(),
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    /// Duration of the downloaded source
    pub source_duration: f64,
    /// Whether the source was cut to the maximum duration
    pub trimmed: bool,
    /// Strategy that produced the output
    pub strategy: TranscodeStrategy,
    /// Whether the watermark made it into the output
    pub watermarked: bool,
    /// Final artifact inside the scratch directory
    pub output: PathBuf,
}

/// Runs the media steps for one video.
#[derive(Debug, Clone)]
pub struct TranscodePipeline<T = FfmpegToolkit> {
    toolkit: T,
    config: PipelineConfig,
}

impl TranscodePipeline<FfmpegToolkit> {
    /// Pipeline backed by the ffmpeg binaries. A hung step is killed after
    /// `config.step_timeout_secs`.
    pub fn ffmpeg(config: PipelineConfig) -> Self {
        let runner = FfmpegRunner::new().with_timeout(config.step_timeout_secs);
        Self::new(FfmpegToolkit::new(runner), config)
    }
}

impl<T: MediaToolkit> TranscodePipeline<T> {
    pub fn new(toolkit: T, config: PipelineConfig) -> Self {
        Self { toolkit, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process `input` into a final artifact inside `scratch`.
    ///
    /// `on_stage` is called as the run enters each stage.
    pub async fn run<F>(
        &self,
        input: &Path,
        scratch: &ScratchSpace,
        mut on_stage: F,
    ) -> MediaResult<PipelineReport>
    where
        F: FnMut(ProcessingStage) + Send,
    {
        on_stage(ProcessingStage::Probing);
        let info = self.toolkit.probe(input).await?;

        let max = self.config.max_duration_secs;
        let trimmed = info.exceeds(max);
        let source = if trimmed {
            on_stage(ProcessingStage::Trimming);
            info!(duration = info.duration, max_duration = max, "Trimming video");
            let trimmed_path = scratch.artifact("trimmed.mp4");
            self.toolkit.trim(input, &trimmed_path, max).await?;
            trimmed_path
        } else {
            input.to_path_buf()
        };

        on_stage(ProcessingStage::StrippingAudio);
        let silent = scratch.artifact("no_audio.mp4");
        self.toolkit.strip_audio(&source, &silent).await?;

        on_stage(ProcessingStage::Transcoding);
        let output = scratch.artifact("final.mp4");
        let mut failures = Vec::new();

        for &strategy in TRANSCODE_FALLBACK_CHAIN {
            let attempt = match strategy {
                TranscodeStrategy::CombinedPass => self.combined_pass(&silent, &output).await,
                TranscodeStrategy::Stepwise => self.stepwise(&silent, scratch, &output).await,
            };

            match attempt {
                Ok(watermarked) => {
                    info!(
                        strategy = %strategy,
                        watermarked,
                        "Transcode complete"
                    );
                    return Ok(PipelineReport {
                        source_duration: info.duration,
                        trimmed,
                        strategy,
                        watermarked,
                        output,
                    });
                }
                Err(e) if aborts_fallback(&e) => return Err(e),
                Err(e) => {
                    warn!(
                        strategy = %strategy,
                        stderr = e.diagnostics().unwrap_or(""),
                        "Transcode strategy failed: {}",
                        e
                    );
                    failures.push(format!("{}: {}", strategy, e));
                }
            }
        }

        Err(MediaError::FallbackExhausted(failures.join("; ")))
    }

    /// Returns whether the watermark was applied.
    async fn combined_pass(&self, input: &Path, output: &Path) -> MediaResult<bool> {
        let watermark = Some(&self.config.watermark).filter(|wm| wm.is_available());
        if watermark.is_none() {
            debug!(
                path = %self.config.watermark.image_path.display(),
                "Watermark missing, converting without it"
            );
        }
        self.toolkit
            .transcode(input, watermark, output, &self.config.format)
            .await?;
        Ok(watermark.is_some())
    }

    /// Returns whether the watermark was applied.
    async fn stepwise(
        &self,
        input: &Path,
        scratch: &ScratchSpace,
        output: &Path,
    ) -> MediaResult<bool> {
        let converted = scratch.artifact("converted.mp4");
        self.toolkit
            .scale_pad(input, &converted, &self.config.format)
            .await?;

        let mut last_error = None;
        for step in FINISH_CHAIN {
            let result = match step {
                FinishStep::Watermark => {
                    if !self.config.watermark.is_available() {
                        debug!("Watermark missing, skipping overlay pass");
                        continue;
                    }
                    self.toolkit
                        .overlay_watermark(
                            &converted,
                            &self.config.watermark,
                            output,
                            &self.config.format,
                        )
                        .await
                        .map(|()| true)
                }
                FinishStep::CopyUnmodified => {
                    self.toolkit.copy(&converted, output).await.map(|()| false)
                }
            };

            match result {
                Ok(watermarked) => return Ok(watermarked),
                Err(e) if aborts_fallback(&e) => return Err(e),
                Err(e) => {
                    warn!(step = ?step, "Finishing step failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MediaError::FallbackExhausted("no finishing step".into())))
    }
}

/// Errors that no other strategy could recover from.
fn aborts_fallback(e: &MediaError) -> bool {
    matches!(
        e,
        MediaError::Timeout(_) | MediaError::FfmpegNotFound | MediaError::FfprobeNotFound
    )
}
