//! Domain types and storage for the vidsight annotation service.
//!
//! Holds everything that does not depend on a model or a codec: detections,
//! the color palette, latency metrics, upload naming rules, ffprobe helpers
//! and the TTL artifact store.

pub mod error;
pub mod ffmpeg;
pub mod metrics;
pub mod naming;
pub mod palette;
pub mod store;
pub mod types;
