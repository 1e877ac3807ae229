//! Frame-level video decoding and encoding.
//!
//! [`FfmpegBackend`] runs `ffmpeg` as a child process in both directions and
//! exchanges packed RGB24 frames over pipes, so only one frame is held in
//! memory at a time. Children are spawned with `kill_on_drop`, which
//! releases them on every exit path including errors.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use vidsight_core::ffmpeg::{self, FfmpegError};
use vidsight_core::types::{Resolution, VideoInfo};

/// Frame rate used for the output when the input does not report one.
const FALLBACK_FPS: f64 = 25.0;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error(transparent)]
    Probe(#[from] FfmpegError),

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("truncated frame: expected {expected} bytes, got {got}")]
    TruncatedFrame { expected: usize, got: usize },

    #[error("frame is {got}, stream is {expected}")]
    FrameSize {
        expected: Resolution,
        got: Resolution,
    },

    #[error("{tool} exited with code {exit_code:?}: {stderr}")]
    Exited {
        tool: &'static str,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("media I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded video, read one frame at a time.
#[async_trait]
pub trait FrameSource: Send {
    fn info(&self) -> VideoInfo;

    /// The next frame, or `None` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<RgbImage>, MediaError>;
}

/// An encoder accepting frames of one fixed resolution.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), MediaError>;

    /// Flush and close the output. Dropping a sink without calling this
    /// aborts the encode.
    async fn finish(self: Box<Self>) -> Result<(), MediaError>;
}

/// Opens decoders and encoders for the pipeline.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, MediaError>;

    async fn open_sink(
        &self,
        path: &Path,
        info: &VideoInfo,
    ) -> Result<Box<dyn FrameSink>, MediaError>;
}

// ---------------------------------------------------------------------------
// FFmpeg implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, MediaError> {
        let info = ffmpeg::probe_video_info(&self.ffprobe_bin, path).await?;

        // Frames must keep the stored dimensions ffprobe reported, so
        // rotation metadata is not applied.
        let mut child = Command::new(&self.ffmpeg_bin)
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::Spawn {
                tool: "ffmpeg decoder",
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| MediaError::Spawn {
            tool: "ffmpeg decoder",
            source: std::io::Error::other("stdout not captured"),
        })?;
        let stderr = child.stderr.take().map(collect_stderr);

        tracing::debug!(
            path = %path.display(),
            fps = info.fps,
            resolution = %info.resolution,
            total_frames = info.total_frames,
            "Decoder opened"
        );

        Ok(Box::new(FfmpegDecoder {
            info,
            child,
            stdout,
            stderr,
            finished: false,
        }))
    }

    async fn open_sink(
        &self,
        path: &Path,
        info: &VideoInfo,
    ) -> Result<Box<dyn FrameSink>, MediaError> {
        let fps = if info.fps > 0.0 { info.fps } else { FALLBACK_FPS };

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
            .arg(info.resolution.to_string())
            .arg("-r")
            .arg(format!("{fps}"))
            .args([
                "-i",
                "-",
                "-an",
                "-c:v",
                "libx264",
                // yuv420p needs even dimensions.
                "-vf",
                "pad=ceil(iw/2)*2:ceil(ih/2)*2",
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::Spawn {
                tool: "ffmpeg encoder",
                source,
            })?;

        let stdin = child.stdin.take();
        tracing::debug!(path = %path.display(), fps, resolution = %info.resolution, "Encoder opened");

        Ok(Box::new(FfmpegEncoder {
            resolution: info.resolution,
            child,
            stdin,
        }))
    }
}

/// Drain a child's stderr on a separate task so the child never blocks on
/// a full pipe.
fn collect_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "Failed to read decoder stderr");
        }
        String::from_utf8_lossy(&buf).trim().to_string()
    })
}

struct FfmpegDecoder {
    info: VideoInfo,
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

#[async_trait]
impl FrameSource for FfmpegDecoder {
    fn info(&self) -> VideoInfo {
        self.info
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, MediaError> {
        if self.finished {
            return Ok(None);
        }

        let expected = self.info.resolution.rgb_frame_len();
        let mut buf = vec![0u8; expected];
        let mut filled = 0;
        while filled < expected {
            let n = self.stdout.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            self.finished = true;
            let status = self.child.wait().await?;
            if !status.success() {
                let stderr = match self.stderr.take() {
                    Some(reader) => reader.await.unwrap_or_default(),
                    None => String::new(),
                };
                return Err(MediaError::Exited {
                    tool: "ffmpeg decoder",
                    exit_code: status.code(),
                    stderr,
                });
            }
            return Ok(None);
        }
        if filled < expected {
            return Err(MediaError::TruncatedFrame {
                expected,
                got: filled,
            });
        }

        let Resolution { width, height } = self.info.resolution;
        RgbImage::from_raw(width, height, buf)
            .map(Some)
            .ok_or(MediaError::TruncatedFrame {
                expected,
                got: filled,
            })
    }
}

struct FfmpegEncoder {
    resolution: Resolution,
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl FrameSink for FfmpegEncoder {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), MediaError> {
        let got = Resolution::new(frame.width(), frame.height());
        if got != self.resolution {
            return Err(MediaError::FrameSize {
                expected: self.resolution,
                got,
            });
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        stdin.write_all(frame.as_raw()).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), MediaError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        let output = self.child.wait_with_output().await?;
        if !output.status.success() {
            return Err(MediaError::Exited {
                tool: "ffmpeg encoder",
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
