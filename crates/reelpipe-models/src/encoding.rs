//! Output format and encoding profile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default output resolution.
pub const DEFAULT_OUTPUT_RESOLUTION: &str = "1280x720";
/// Default output aspect ratio.
pub const DEFAULT_OUTPUT_ASPECT_RATIO: &str = "16:9";

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Throughput-first preset
pub const DEFAULT_PRESET: &str = "ultrafast";
/// Default CRF, traded down for speed
pub const DEFAULT_CRF: u8 = 28;
/// Decoder-friendly tuning
pub const DEFAULT_TUNE: &str = "fastdecode";

/// Watermark padding from the top-right corner (pixels).
pub const WATERMARK_PADDING: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutputFormatError {
    #[error("Invalid resolution '{0}', expected WIDTHxHEIGHT")]
    InvalidResolution(String),

    #[error("Invalid aspect ratio '{0}', expected W:H")]
    InvalidAspectRatio(String),
}

/// Encoder settings shared by every encoding pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingProfile {
    /// Video codec
    pub codec: String,
    /// Encoding preset
    pub preset: String,
    /// Constant Rate Factor (0-51, lower is better)
    pub crf: u8,
    /// Encoder tuning
    pub tune: Option<String>,
    /// Encoder threads (0 = all cores)
    pub threads: u32,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            tune: Some(DEFAULT_TUNE.to_string()),
            threads: 0,
        }
    }
}

impl EncodingProfile {
    /// FFmpeg output arguments for this profile.
    ///
    /// Output never carries audio and is laid out for progressive playback.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-threads".to_string(),
            self.threads.to_string(),
        ];
        if let Some(tune) = &self.tune {
            args.push("-tune".to_string());
            args.push(tune.clone());
        }
        args.extend([
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-an".to_string(),
        ]);
        args
    }
}

/// Target frame geometry of processed videos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Display aspect ratio stamped on the output, e.g. "16:9"
    pub aspect_ratio: String,
    /// Encoder settings
    #[serde(default)]
    pub encoding: EncodingProfile,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            aspect_ratio: DEFAULT_OUTPUT_ASPECT_RATIO.to_string(),
            encoding: EncodingProfile::default(),
        }
    }
}

impl OutputFormat {
    /// Build from "WIDTHxHEIGHT" and "W:H" strings.
    pub fn parse(resolution: &str, aspect_ratio: &str) -> Result<Self, OutputFormatError> {
        let (width, height) = parse_resolution(resolution)?;
        validate_aspect_ratio(aspect_ratio)?;
        Ok(Self {
            width,
            height,
            aspect_ratio: aspect_ratio.to_string(),
            encoding: EncodingProfile::default(),
        })
    }

    /// Filter that fits the source inside the frame without upscaling,
    /// preserving aspect ratio, letterboxes to the exact frame size and
    /// sets the display aspect ratio.
    pub fn scale_pad_filter(&self) -> String {
        format!(
            "scale='min({w},iw)':'min({h},ih)':force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setdar={dar}",
            w = self.width,
            h = self.height,
            dar = self.display_aspect_ratio()
        )
    }

    /// Aspect ratio as a filter expression ("16:9" becomes "16/9"); `:`
    /// would split filter options.
    pub fn display_aspect_ratio(&self) -> String {
        self.aspect_ratio.trim().replace(':', "/")
    }

    /// Overlay expression placing the watermark near the top-right corner.
    pub fn watermark_position(&self) -> String {
        format!(
            "main_w-overlay_w-{pad}:{pad}",
            pad = WATERMARK_PADDING
        )
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} ({})", self.width, self.height, self.aspect_ratio)
    }
}

impl FromStr for OutputFormat {
    type Err = OutputFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, DEFAULT_OUTPUT_ASPECT_RATIO)
    }
}

fn parse_resolution(s: &str) -> Result<(u32, u32), OutputFormatError> {
    let invalid = || OutputFormatError::InvalidResolution(s.to_string());
    let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = w.trim().parse().map_err(|_| invalid())?;
    let height: u32 = h.trim().parse().map_err(|_| invalid())?;
    // libx264 needs even dimensions.
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

fn validate_aspect_ratio(s: &str) -> Result<(), OutputFormatError> {
    let invalid = || OutputFormatError::InvalidAspectRatio(s.to_string());
    let (w, h) = s.split_once(':').ok_or_else(invalid)?;
    let w: u32 = w.trim().parse().map_err(|_| invalid())?;
    let h: u32 = h.trim().parse().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_resolution() {
        let format = OutputFormat::parse("1280x720", "16:9").unwrap();
        assert_eq!(format, OutputFormat::default());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(OutputFormat::parse("720p", "16:9").is_err());
        assert!(OutputFormat::parse("1281x720", "16:9").is_err());
        assert!(OutputFormat::parse("1280x720", "wide").is_err());
        assert!(OutputFormat::parse("1280x720", "16:0").is_err());
    }

    #[test]
    fn test_scale_pad_filter() {
        let filter = OutputFormat::default().scale_pad_filter();
        assert!(filter.starts_with("scale='min(1280,iw)':'min(720,ih)'"));
        assert!(filter.contains("force_original_aspect_ratio=decrease"));
        assert!(filter.contains(",pad=1280:720:(ow-iw)/2:(oh-ih)/2,"));
        assert!(filter.ends_with("setdar=16/9"));
    }

    #[test]
    fn test_aspect_ratio_reaches_filter() {
        let format = OutputFormat::parse("1080x1920", "9:16").unwrap();
        assert_eq!(format.display_aspect_ratio(), "9/16");
        assert!(format.scale_pad_filter().ends_with("pad=1080:1920:(ow-iw)/2:(oh-ih)/2,setdar=9/16"));
    }

    #[test]
    fn test_watermark_position_top_right() {
        assert_eq!(
            OutputFormat::default().watermark_position(),
            "main_w-overlay_w-10:10"
        );
    }

    #[test]
    fn test_encoding_args_strip_audio() {
        let args = EncodingProfile::default().to_ffmpeg_args();
        assert!(args.contains(&"ultrafast".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-an"));
        let tune = args.iter().position(|a| a == "-tune").unwrap();
        assert_eq!(args[tune + 1], "fastdecode");
    }
}
