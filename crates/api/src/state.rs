use std::sync::Arc;

use vidsight_core::store::ArtifactStore;
use vidsight_pipeline::detector::Detector;
use vidsight_pipeline::VideoPipeline;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (upload limits, allowed extensions).
    pub config: Arc<ServerConfig>,
    /// Processed-video artifacts with their TTL bookkeeping.
    pub store: Arc<ArtifactStore>,
    /// Decode/annotate/encode pipeline writing into `store`.
    pub pipeline: Arc<VideoPipeline>,
    /// Inference capability every upload is run through.
    pub detector: Arc<dyn Detector>,
}
