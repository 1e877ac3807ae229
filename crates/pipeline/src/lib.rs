//! Frame-by-frame video annotation.
//!
//! A [`pipeline::VideoPipeline`] pulls frames from a [`media::FrameSource`],
//! asks a [`detector::Detector`] what is in each one, draws the results with
//! an [`annotate::FrameAnnotator`] and pushes the frame into a
//! [`media::FrameSink`]. The finished video becomes an artifact in the
//! store from `vidsight-core`.

pub mod annotate;
pub mod detector;
pub mod media;
pub mod pipeline;

pub use pipeline::{PipelineError, PipelineState, VideoPipeline};
