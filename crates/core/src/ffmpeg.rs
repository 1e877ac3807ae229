//! FFprobe invocation and output parsing.
//!
//! The decoder and encoder themselves live in `vidsight-pipeline`; this
//! module only answers "what is in this file" before a stream is opened.

use std::path::Path;

use serde::Deserialize;

use crate::types::{Resolution, VideoInfo};

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("no video stream in {0}")]
    NoVideoStream(String),

    #[error("video file not found: {0}")]
    VideoNotFound(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a video file and return the parsed JSON output.
pub async fn probe_video(ffprobe_bin: &str, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::VideoNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Probe `path` and reduce the result to the properties the pipeline needs.
pub async fn probe_video_info(ffprobe_bin: &str, path: &Path) -> Result<VideoInfo, FfmpegError> {
    let probe = probe_video(ffprobe_bin, path).await?;
    video_info(&probe).ok_or_else(|| FfmpegError::NoVideoStream(path.display().to_string()))
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Collect fps, resolution and frame count. `None` when the file has no
/// video stream or the stream has no usable dimensions.
pub fn video_info(probe: &FfprobeOutput) -> Option<VideoInfo> {
    let (width, height) = parse_resolution(probe);
    if width == 0 || height == 0 {
        return None;
    }
    Some(VideoInfo {
        fps: parse_framerate(probe),
        resolution: Resolution::new(width, height),
        total_frames: parse_total_frames(probe),
    })
}

/// Parse the video duration in seconds from ffprobe output.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    // Try format-level duration first.
    if let Some(secs) = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
    {
        return secs;
    }
    first_video_stream(probe)
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Parse the video framerate from ffprobe output.
///
/// The `r_frame_rate` field is a fraction like `"30/1"` or `"24000/1001"`.
pub fn parse_framerate(probe: &FfprobeOutput) -> f64 {
    first_video_stream(probe)
        .and_then(|s| s.r_frame_rate.as_deref())
        .map(parse_fraction)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        let num = num.parse::<f64>().unwrap_or(0.0);
        let den = den.parse::<f64>().unwrap_or(1.0);
        return if den > 0.0 { num / den } else { 0.0 };
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Count total frames, estimating from duration and framerate when the
/// container does not report `nb_frames`.
pub fn parse_total_frames(probe: &FfprobeOutput) -> u64 {
    if let Some(n) = first_video_stream(probe)
        .and_then(|s| s.nb_frames.as_deref())
        .and_then(|nb| nb.parse::<u64>().ok())
    {
        return n;
    }
    let duration = parse_duration(probe);
    let fps = parse_framerate(probe);
    if duration > 0.0 && fps > 0.0 {
        return (duration * fps).round() as u64;
    }
    0
}

/// Find the first video stream's resolution.
pub fn parse_resolution(probe: &FfprobeOutput) -> (u32, u32) {
    first_video_stream(probe)
        .map(|s| (s.width.unwrap_or(0), s.height.unwrap_or(0)))
        .unwrap_or((0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream() -> FfprobeStream {
        FfprobeStream {
            codec_type: Some("video".into()),
            width: Some(1920),
            height: Some(1080),
            r_frame_rate: Some("30/1".into()),
            ..Default::default()
        }
    }

    fn probe_with(stream: FfprobeStream, format_duration: Option<&str>) -> FfprobeOutput {
        FfprobeOutput {
            streams: vec![stream],
            format: FfprobeFormat {
                duration: format_duration.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_parse_fraction_standard() {
        assert!((parse_fraction("30/1") - 30.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_fraction_ntsc() {
        let fps = parse_fraction("24000/1001");
        assert!((fps - 23.976).abs() < 0.01);
    }

    #[test]
    fn test_parse_fraction_plain_number() {
        assert!((parse_fraction("25") - 25.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_fraction_zero_denominator() {
        assert_eq!(parse_fraction("30/0"), 0.0);
    }

    #[test]
    fn test_parse_duration_falls_back_to_stream() {
        let stream = FfprobeStream {
            duration: Some("60.0".into()),
            ..video_stream()
        };
        assert!((parse_duration(&probe_with(stream, None)) - 60.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_total_frames_from_nb_frames() {
        let stream = FfprobeStream {
            nb_frames: Some("300".into()),
            ..video_stream()
        };
        assert_eq!(parse_total_frames(&probe_with(stream, Some("12.0"))), 300);
    }

    #[test]
    fn test_parse_total_frames_estimated() {
        assert_eq!(parse_total_frames(&probe_with(video_stream(), Some("10.0"))), 300);
    }

    #[test]
    fn test_parse_total_frames_unknown() {
        assert_eq!(parse_total_frames(&probe_with(video_stream(), None)), 0);
    }

    #[test]
    fn video_info_collects_stream_properties() {
        let stream = FfprobeStream {
            r_frame_rate: Some("25/1".into()),
            nb_frames: Some("10".into()),
            ..video_stream()
        };
        let info = video_info(&probe_with(stream, None)).unwrap();
        assert_eq!(info.resolution, Resolution::new(1920, 1080));
        assert_eq!(info.total_frames, 10);
        assert!((info.fps - 25.0).abs() < 0.001);
    }

    #[test]
    fn video_info_requires_a_video_stream() {
        let audio = FfprobeStream {
            codec_type: Some("audio".into()),
            ..Default::default()
        };
        assert!(video_info(&probe_with(audio, Some("3.0"))).is_none());
    }

    #[test]
    fn ffprobe_json_is_parsed() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "width": 640, "height": 360,
                 "r_frame_rate": "30000/1001", "nb_frames": "42", "codec_name": "h264"}
            ],
            "format": {"duration": "1.4", "format_name": "mov,mp4"}
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let info = video_info(&probe).unwrap();
        assert_eq!(info.resolution.to_string(), "640x360");
        assert_eq!(info.total_frames, 42);
    }

    #[tokio::test]
    async fn probe_missing_file_is_reported() {
        let err = probe_video("ffprobe", Path::new("/definitely/not/here.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, FfmpegError::VideoNotFound(_)));
    }
}
