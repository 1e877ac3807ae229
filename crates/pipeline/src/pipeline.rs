//! Decode, infer, annotate, encode.
//!
//! [`VideoPipeline::process`] streams one uploaded video through the
//! detector frame by frame and registers the annotated result in the
//! artifact store. Whatever happens, the input file is removed afterwards;
//! on failure the partially written output is removed as well. Runs are
//! not cancellable: each one executes on its own task, and a guard cleans
//! up after a run that panics or is torn down with the runtime.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::Instant;
use vidsight_core::error::CoreError;
use vidsight_core::metrics::{MetricsAggregator, ProcessingMetrics};
use vidsight_core::store::{Artifact, ArtifactStore, StoreError};

use crate::annotate::FrameAnnotator;
use crate::detector::{Detector, DetectorError};
use crate::media::{MediaBackend, MediaError};

/// Number of progress observations per video.
const PROGRESS_MILESTONES: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("input could not be decoded: {0}")]
    Decode(#[source] MediaError),

    #[error("output could not be encoded: {0}")]
    Encode(#[source] MediaError),

    #[error("detector failed on frame {frame_index}: {source}")]
    Detector {
        frame_index: u64,
        #[source]
        source: DetectorError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("processing task aborted: {0}")]
    Aborted(String),
}

impl From<PipelineError> for CoreError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Decode(e) => CoreError::Decode(e.to_string()),
            PipelineError::Encode(e) => CoreError::Encode(e.to_string()),
            e @ PipelineError::Detector { .. } => CoreError::Processing(e.to_string()),
            e @ PipelineError::Aborted(_) => CoreError::Internal(e.to_string()),
            PipelineError::Store(e) => e.into(),
        }
    }
}

/// Lifecycle of one processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Opening,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Opening => "opening",
            Self::Streaming => "streaming",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks the current state of a run and logs each transition.
struct RunState<'a> {
    output_name: &'a str,
    state: PipelineState,
}

impl<'a> RunState<'a> {
    fn new(output_name: &'a str) -> Self {
        tracing::debug!(output = output_name, state = %PipelineState::Opening, "Pipeline state");
        Self {
            output_name,
            state: PipelineState::Opening,
        }
    }

    fn enter(&mut self, next: PipelineState) {
        debug_assert!(!self.state.is_terminal(), "no transition out of {}", self.state);
        tracing::debug!(
            output = self.output_name,
            from = %self.state,
            to = %next,
            "Pipeline state"
        );
        self.state = next;
    }
}

/// Frames between progress observations, or `None` when the frame count
/// is unknown.
pub fn milestone_step(total_frames: u64) -> Option<u64> {
    if total_frames == 0 {
        return None;
    }
    Some((total_frames / PROGRESS_MILESTONES).max(1))
}

struct Progress {
    total_frames: u64,
    step: Option<u64>,
}

impl Progress {
    fn new(total_frames: u64) -> Self {
        Self {
            total_frames,
            step: milestone_step(total_frames),
        }
    }

    /// Percent complete when `processed` lands on a milestone.
    fn milestone(&self, processed: u64) -> Option<u64> {
        let step = self.step?;
        if processed % step != 0 {
            return None;
        }
        Some((processed * 100 / self.total_frames).min(100))
    }
}

/// Removes the input and any unregistered output if a run is dropped or
/// panics before its own cleanup has happened.
struct CleanupGuard {
    input: PathBuf,
    output: Option<PathBuf>,
    armed: bool,
}

impl CleanupGuard {
    fn new(input: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            output: None,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(input = %self.input.display(), "Processing interrupted, removing its files");
        for path in std::iter::once(&self.input).chain(self.output.as_ref()) {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to remove file"),
            }
        }
    }
}

#[derive(Clone)]
pub struct VideoPipeline {
    media: Arc<dyn MediaBackend>,
    annotator: Arc<FrameAnnotator>,
    store: Arc<ArtifactStore>,
}

impl VideoPipeline {
    pub fn new(
        media: Arc<dyn MediaBackend>,
        annotator: Arc<FrameAnnotator>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            media,
            annotator,
            store,
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Annotate the video at `input` into the store artifact `output_name`.
    ///
    /// The run happens on its own task and always completes, even if the
    /// returned future is dropped. `input` is deleted on every path. On
    /// error no artifact named `output_name` is left behind.
    pub async fn process(
        &self,
        input: &Path,
        output_name: &str,
        detector: Arc<dyn Detector>,
    ) -> Result<(Artifact, ProcessingMetrics), PipelineError> {
        let pipeline = self.clone();
        let input = input.to_path_buf();
        let output_name = output_name.to_string();
        let task = tokio::spawn(async move {
            pipeline
                .process_in_place(&input, &output_name, detector.as_ref())
                .await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Video processing task aborted");
                Err(PipelineError::Aborted(e.to_string()))
            }
        }
    }

    /// [`Self::process`] on the current task.
    async fn process_in_place(
        &self,
        input: &Path,
        output_name: &str,
        detector: &dyn Detector,
    ) -> Result<(Artifact, ProcessingMetrics), PipelineError> {
        let mut guard = CleanupGuard::new(input);
        let mut run = RunState::new(output_name);
        let result = match self.store.path_for(output_name) {
            Ok(output_path) => {
                guard.output = Some(output_path.clone());
                self.run(&mut run, input, &output_path, output_name, detector)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if result.is_ok() {
            // Registered: no longer ours to delete.
            guard.output = None;
        }

        match tokio::fs::remove_file(input).await {
            Ok(()) => tracing::debug!(input = %input.display(), "Input removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(input = %input.display(), error = %e, "Failed to remove input")
            }
        }

        let outcome = match result {
            Ok(done) => {
                run.enter(PipelineState::Done);
                Ok(done)
            }
            Err(err) => {
                tracing::error!(
                    output = output_name,
                    state = %run.state,
                    error = %err,
                    "Video processing failed"
                );
                run.enter(PipelineState::Failed);
                if let Err(e) = self.store.remove(output_name).await {
                    tracing::error!(output = output_name, error = %e, "Failed to remove partial output");
                }
                Err(err)
            }
        };
        guard.disarm();
        outcome
    }

    async fn run(
        &self,
        run: &mut RunState<'_>,
        input: &Path,
        output_path: &Path,
        output_name: &str,
        detector: &dyn Detector,
    ) -> Result<(Artifact, ProcessingMetrics), PipelineError> {
        let mut source = self
            .media
            .open_source(input)
            .await
            .map_err(PipelineError::Decode)?;
        let info = source.info();
        let mut sink = self
            .media
            .open_sink(output_path, &info)
            .await
            .map_err(PipelineError::Encode)?;

        tracing::info!(
            output = output_name,
            fps = info.fps,
            resolution = %info.resolution,
            total_frames = info.total_frames,
            "Processing video"
        );
        run.enter(PipelineState::Streaming);

        let progress = Progress::new(info.total_frames);
        let mut metrics = MetricsAggregator::new();
        let mut frame_index: u64 = 0;

        while let Some(mut frame) = source.next_frame().await.map_err(PipelineError::Decode)? {
            let started = Instant::now();
            let detections = detector
                .infer(&frame)
                .await
                .map_err(|source| PipelineError::Detector {
                    frame_index,
                    source,
                })?;
            metrics.record(started.elapsed());

            self.annotator.annotate(&mut frame, &detections);
            sink.write_frame(&frame)
                .await
                .map_err(PipelineError::Encode)?;

            frame_index += 1;
            if let Some(percent) = progress.milestone(frame_index) {
                tracing::info!(
                    output = output_name,
                    frames = frame_index,
                    total = info.total_frames,
                    percent,
                    "Processing progress"
                );
            }
        }

        run.enter(PipelineState::Finalizing);
        drop(source);
        sink.finish().await.map_err(PipelineError::Encode)?;

        let summary = metrics.summarize(info.fps, info.resolution);
        let artifact = self.store.register(output_name).await?;

        tracing::info!(
            output = output_name,
            frames = summary.frame_count,
            average_latency = summary.average_latency,
            processing_fps = summary.processing_fps,
            "Video processed"
        );
        Ok((artifact, summary))
    }
}
