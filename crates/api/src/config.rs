use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vidsight_core::error::CoreError;
use vidsight_core::naming::DEFAULT_ALLOWED_EXTENSIONS;
use vidsight_core::palette::ColorPalette;
use vidsight_pipeline::annotate::{default_font, load_font, FrameAnnotator};

/// Where uploads and processed artifacts live, and how long artifacts are
/// kept.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Transient input directory (default: `uploads`).
    pub upload_dir: PathBuf,
    /// Artifact store directory (default: `processed`).
    pub processed_dir: PathBuf,
    /// Largest accepted upload in bytes (default: 100 MiB).
    pub max_upload_bytes: u64,
    /// Accepted extensions, lower-case with leading dot.
    pub allowed_extensions: Vec<String>,
    /// Artifact time-to-live (default: 1 hour).
    pub artifact_ttl: Duration,
    /// Pause between sweep cycles (default: 5 minutes).
    pub sweep_interval: Duration,
    /// Pause after a failed sweep cycle (default: 1 minute).
    pub sweep_backoff: Duration,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let allowed_extensions = match std::env::var("ALLOWED_EXTENSIONS") {
            Ok(list) => list
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .map(|s| if s.starts_with('.') { s } else { format!(".{s}") })
                .collect(),
            Err(_) => DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Self {
            upload_dir: env_or("UPLOAD_DIR", "uploads"),
            processed_dir: env_or("PROCESSED_DIR", "processed"),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", "104857600"),
            allowed_extensions,
            artifact_ttl: Duration::from_secs(env_or("ARTIFACT_TTL_SECS", "3600")),
            sweep_interval: Duration::from_secs(env_or("SWEEP_INTERVAL_SECS", "300")),
            sweep_backoff: Duration::from_secs(env_or("SWEEP_BACKOFF_SECS", "60")),
        }
    }
}

/// Palette and font used to draw detections.
#[derive(Debug, Clone, Default)]
pub struct AnnotationConfig {
    /// JSON palette file; the built-in palette is used when unset.
    pub palette_path: Option<PathBuf>,
    /// TrueType/OpenType font for caption text; the bundled font is used
    /// when unset.
    pub label_font_path: Option<PathBuf>,
}

impl AnnotationConfig {
    pub fn from_env() -> Self {
        Self {
            palette_path: std::env::var("PALETTE_PATH").ok().map(PathBuf::from),
            label_font_path: std::env::var("LABEL_FONT_PATH").ok().map(PathBuf::from),
        }
    }

    pub fn build_annotator(&self) -> Result<FrameAnnotator, CoreError> {
        let palette = match &self.palette_path {
            Some(path) => ColorPalette::from_file(path)?,
            None => ColorPalette::default(),
        };
        let font = match &self.label_font_path {
            Some(path) => load_font(path)?,
            None => default_font()?,
        };
        tracing::info!(
            labels = palette.len(),
            custom_font = self.label_font_path.is_some(),
            "Annotation palette loaded"
        );
        Ok(FrameAnnotator::new(palette, font))
    }
}

/// Server configuration loaded from environment variables.
///
/// Everything except `DETECTOR_URL` has a default suitable for local runs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins from comma-separated `CORS_ORIGINS`; `*` allows any.
    pub cors_origins: Vec<String>,
    /// Inference endpoint frames are posted to.
    pub detector_url: String,
    /// Per-request detector timeout. `None` waits indefinitely.
    pub detector_timeout: Option<Duration>,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// How long to wait for background tasks after the server stops.
    pub shutdown_timeout: Duration,
    pub storage: StorageConfig,
    pub annotation: AnnotationConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `8000`                  |
    /// | `CORS_ORIGINS`          | `*`                     |
    /// | `DETECTOR_URL`          | required                |
    /// | `DETECTOR_TIMEOUT_SECS` | unset                   |
    /// | `FFMPEG_BIN`            | `ffmpeg`                |
    /// | `FFPROBE_BIN`           | `ffprobe`               |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `5`                     |
    ///
    /// Storage and annotation variables are read by [`StorageConfig`] and
    /// [`AnnotationConfig`].
    pub fn from_env() -> Self {
        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let detector_url = std::env::var("DETECTOR_URL").expect("DETECTOR_URL must be set");

        let detector_timeout = std::env::var("DETECTOR_TIMEOUT_SECS").ok().map(|v| {
            Duration::from_secs(
                v.parse()
                    .expect("DETECTOR_TIMEOUT_SECS must be a valid u64"),
            )
        });

        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_or("PORT", "8000"),
            cors_origins,
            detector_url,
            detector_timeout,
            ffmpeg_bin: env_or("FFMPEG_BIN", "ffmpeg"),
            ffprobe_bin: env_or("FFPROBE_BIN", "ffprobe"),
            shutdown_timeout: Duration::from_secs(env_or("SHUTDOWN_TIMEOUT_SECS", "5")),
            storage: StorageConfig::from_env(),
            annotation: AnnotationConfig::from_env(),
        }
    }
}

/// Read and parse `key`, falling back to `default`. Panics on a value that
/// does not parse; configuration errors abort startup.
fn env_or<T>(key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}"))
}
