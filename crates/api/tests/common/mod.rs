#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::RgbImage;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;

use vidsight_api::config::{AnnotationConfig, ServerConfig, StorageConfig};
use vidsight_api::router::build_app_router;
use vidsight_api::state::AppState;
use vidsight_core::naming::DEFAULT_ALLOWED_EXTENSIONS;
use vidsight_core::store::ArtifactStore;
use vidsight_core::types::{BoundingBox, Detection, Resolution, VideoInfo};
use vidsight_pipeline::detector::{Detector, DetectorError};
use vidsight_pipeline::media::{FrameSink, FrameSource, MediaBackend, MediaError};
use vidsight_pipeline::VideoPipeline;

pub const BOUNDARY: &str = "vidsight-test-boundary";

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

/// Media backend producing `frames` blank 32x24 frames for any input and
/// writing raw frames to the output path.
pub struct StubMedia {
    pub frames: u64,
}

struct StubSource {
    info: VideoInfo,
    remaining: u64,
}

#[async_trait]
impl FrameSource for StubSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, MediaError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let Resolution { width, height } = self.info.resolution;
        Ok(Some(RgbImage::new(width, height)))
    }
}

struct StubSink {
    file: tokio::fs::File,
}

#[async_trait]
impl FrameSink for StubSink {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), MediaError> {
        self.file.write_all(frame.as_raw()).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), MediaError> {
        self.file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl MediaBackend for StubMedia {
    async fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, MediaError> {
        if !path.exists() {
            return Err(MediaError::Io(std::io::ErrorKind::NotFound.into()));
        }
        Ok(Box::new(StubSource {
            info: VideoInfo {
                fps: 24.0,
                resolution: Resolution::new(32, 24),
                total_frames: self.frames,
            },
            remaining: self.frames,
        }))
    }

    async fn open_sink(
        &self,
        path: &Path,
        _info: &VideoInfo,
    ) -> Result<Box<dyn FrameSink>, MediaError> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(StubSink { file }))
    }
}

/// Detector returning one box per frame, failing on call `fail_on_call`.
#[derive(Default)]
pub struct StubDetector {
    pub fail_on_call: Option<usize>,
    pub calls: AtomicUsize,
}

impl StubDetector {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for StubDetector {
    async fn infer(&self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            return Err(DetectorError::Failed("inference backend unavailable".into()));
        }
        Ok(vec![Detection::new(
            BoundingBox::new(4, 14, 20, 22).map_err(|e| DetectorError::Failed(e.to_string()))?,
            "cric_crac_tomato_ketchup",
            0.75,
        )])
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// A router wired to stubs, with its directories in a temp dir.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<ArtifactStore>,
    pub detector: Arc<StubDetector>,
    pub upload_dir: PathBuf,
    pub processed_dir: PathBuf,
    _dir: TempDir,
}

/// Build a test `ServerConfig` rooted at `root`.
pub fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        detector_url: "http://127.0.0.1:9/infer".to_string(),
        detector_timeout: None,
        ffmpeg_bin: "ffmpeg".to_string(),
        ffprobe_bin: "ffprobe".to_string(),
        shutdown_timeout: Duration::from_secs(1),
        storage: StorageConfig {
            upload_dir: root.join("uploads"),
            processed_dir: root.join("processed"),
            max_upload_bytes: 1024,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            artifact_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            sweep_backoff: Duration::from_secs(60),
        },
        annotation: AnnotationConfig::default(),
    }
}

/// Build the full application router with all middleware layers, backed by
/// stub media and `detector`.
pub async fn build_test_app_with(frames: u64, detector: StubDetector) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.storage.upload_dir).unwrap();

    let store = Arc::new(
        ArtifactStore::open(&config.storage.processed_dir, config.storage.artifact_ttl)
            .await
            .unwrap(),
    );
    let annotator = config.annotation.build_annotator().unwrap();
    let pipeline = Arc::new(VideoPipeline::new(
        Arc::new(StubMedia { frames }),
        Arc::new(annotator),
        Arc::clone(&store),
    ));
    let detector = Arc::new(detector);

    let state = AppState {
        config: Arc::new(config.clone()),
        store: Arc::clone(&store),
        pipeline,
        detector: detector.clone(),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        detector,
        upload_dir: config.storage.upload_dir.clone(),
        processed_dir: config.storage.processed_dir.clone(),
        _dir: dir,
    }
}

pub async fn build_test_app() -> TestApp {
    build_test_app_with(3, StubDetector::default()).await
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

/// Multipart body with a single file part.
pub fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn post_multipart(app: Router, uri: &str, body: Vec<u8>) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn upload(app: Router, filename: &str, content: &[u8]) -> Response<Body> {
    post_multipart(
        app,
        "/api/v1/videos/detect",
        multipart_body("video", filename, content),
    )
    .await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Number of entries in `dir`.
pub fn dir_len(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
