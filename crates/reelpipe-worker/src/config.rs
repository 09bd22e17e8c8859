//! Worker configuration.

use std::path::PathBuf;

use reelpipe_media::pipeline::{DEFAULT_MAX_DURATION_SECS, DEFAULT_STEP_TIMEOUT_SECS};
use reelpipe_media::{PipelineConfig, WatermarkConfig};
use reelpipe_models::encoding::{DEFAULT_OUTPUT_ASPECT_RATIO, DEFAULT_OUTPUT_RESOLUTION};
use reelpipe_models::OutputFormat;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sources longer than this many seconds are trimmed
    pub max_video_duration: f64,
    /// Target frame geometry
    pub output_format: OutputFormat,
    /// Explicit watermark image; unset means the default locations
    pub watermark_path: Option<String>,
    /// A single ffmpeg invocation running longer than this is killed
    pub ffmpeg_timeout_secs: u64,
    /// Parent of the per-attempt scratch directories
    pub work_dir: PathBuf,
    /// Postgres URL of the video record store
    pub database_url: Option<String>,
    /// Port for the Prometheus endpoint; unset disables it
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_video_duration: DEFAULT_MAX_DURATION_SECS,
            output_format: OutputFormat::default(),
            watermark_path: None,
            ffmpeg_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            work_dir: std::env::temp_dir().join("reelpipe"),
            database_url: None,
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = WorkerConfig::default();

        let max_video_duration = match var("MAX_VIDEO_DURATION") {
            Some(v) => v
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d > 0.0)
                .ok_or_else(|| {
                    WorkerError::config_error(format!(
                        "MAX_VIDEO_DURATION must be a positive number of seconds, got '{}'",
                        v
                    ))
                })?,
            None => defaults.max_video_duration,
        };

        let resolution =
            var("OUTPUT_RESOLUTION").unwrap_or_else(|| DEFAULT_OUTPUT_RESOLUTION.to_string());
        let aspect_ratio =
            var("OUTPUT_ASPECT_RATIO").unwrap_or_else(|| DEFAULT_OUTPUT_ASPECT_RATIO.to_string());
        let output_format = OutputFormat::parse(&resolution, &aspect_ratio)
            .map_err(|e| WorkerError::config_error(e.to_string()))?;

        let ffmpeg_timeout_secs = match var("FFMPEG_STEP_TIMEOUT_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| {
                    WorkerError::config_error(format!(
                        "FFMPEG_STEP_TIMEOUT_SECS must be a positive number of seconds, got '{}'",
                        v
                    ))
                })?,
            None => defaults.ffmpeg_timeout_secs,
        };

        let metrics_port = match var("METRICS_PORT") {
            Some(v) => Some(v.trim().parse::<u16>().map_err(|_| {
                WorkerError::config_error(format!("METRICS_PORT must be a port number, got '{}'", v))
            })?),
            None => None,
        };

        Ok(Self {
            max_video_duration,
            output_format,
            watermark_path: var("WATERMARK_PATH"),
            ffmpeg_timeout_secs,
            work_dir: var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            database_url: var("DATABASE_URL"),
            metrics_port,
        })
    }

    /// Media pipeline parameters.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_duration_secs: self.max_video_duration,
            format: self.output_format.clone(),
            watermark: WatermarkConfig::resolve(self.watermark_path.as_deref()),
            step_timeout_secs: self.ffmpeg_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_video_duration, 30.0);
        assert_eq!(config.output_format, OutputFormat::default());
        assert!(config.database_url.is_none());
        assert!(config.metrics_port.is_none());
        assert_eq!(config.ffmpeg_timeout_secs, 1800);
    }

    #[test]
    fn test_overrides() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("MAX_VIDEO_DURATION", "45"),
            ("OUTPUT_RESOLUTION", "1920x1080"),
            ("WATERMARK_PATH", "/srv/brand.png"),
            ("WORKER_WORK_DIR", "/data/scratch"),
            ("DATABASE_URL", "postgres://localhost/videos"),
            ("METRICS_PORT", "9100"),
            ("FFMPEG_STEP_TIMEOUT_SECS", "600"),
        ]))
        .unwrap();
        assert_eq!(config.max_video_duration, 45.0);
        assert_eq!(config.output_format.width, 1920);
        assert_eq!(config.output_format.height, 1080);
        assert_eq!(config.work_dir, PathBuf::from("/data/scratch"));
        assert_eq!(config.metrics_port, Some(9100));

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.max_duration_secs, 45.0);
        assert_eq!(pipeline.watermark.image_path, PathBuf::from("/srv/brand.png"));
        assert_eq!(pipeline.step_timeout_secs, 600);
    }

    #[test]
    fn test_invalid_values() {
        for vars in [
            [("MAX_VIDEO_DURATION", "-3")],
            [("MAX_VIDEO_DURATION", "soon")],
            [("OUTPUT_RESOLUTION", "hd")],
            [("METRICS_PORT", "70000")],
            [("FFMPEG_STEP_TIMEOUT_SECS", "0")],
            [("FFMPEG_STEP_TIMEOUT_SECS", "forever")],
        ] {
            let err = WorkerConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, WorkerError::ConfigError(_)), "{vars:?}");
        }
    }
}
