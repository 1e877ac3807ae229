//! Shared value types: detections and frame geometry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Axis-aligned box in pixel coordinates. Always satisfies `x1 < x2` and
/// `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self, CoreError> {
        if x1 >= x2 || y1 >= y2 {
            return Err(CoreError::Validation(format!(
                "Degenerate bounding box ({x1}, {y1}) -> ({x2}, {y2})"
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2.abs_diff(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.abs_diff(self.y1)
    }
}

/// One model-produced object on a single frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    /// Build a detection, clamping the confidence into `[0, 1]`.
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }

    /// Text drawn above the box: upper-cased label and two-decimal confidence.
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.label.to_uppercase(), self.confidence)
    }
}

/// Frame dimensions of a video. Constant for the whole stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size in bytes of one packed RGB24 frame.
    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Stream properties read when a video is opened.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoInfo {
    pub fps: f64,
    pub resolution: Resolution,
    /// Frame count reported by the container; `0` when unknown.
    pub total_frames: u64,
}
