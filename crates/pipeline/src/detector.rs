//! Object detector capability.
//!
//! The pipeline only depends on [`Detector`]; [`HttpDetector`] is the
//! production implementation, which sends each frame to an external
//! inference service over HTTP.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use vidsight_core::types::{BoundingBox, Detection};

/// Label used when the inference service omits one.
pub const FALLBACK_LABEL: &str = "chip";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The inference service returned a non-2xx status code.
    #[error("Detector returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Failed to encode frame for inference: {0}")]
    FrameEncoding(#[from] image::ImageError),

    #[error("Detector failed: {0}")]
    Failed(String),
}

/// Produces the detections for one frame.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn infer(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    detections: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    label: Option<String>,
    confidence: f32,
}

/// Posts JPEG-encoded frames to an inference endpoint.
///
/// The endpoint receives `Content-Type: image/jpeg` and must answer with
/// `{"detections": [{"x1", "y1", "x2", "y2", "label", "confidence"}]}`.
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpDetector {
    /// Build a detector for `url`. With `timeout == None` a request may
    /// wait indefinitely.
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, DetectorError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn infer(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let mut jpeg = Vec::new();
        frame.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DetectorError::HttpStatus(response.status().as_u16()));
        }

        let body: InferenceResponse = response.json().await?;
        Ok(into_detections(body.detections))
    }
}

/// Truncate a wire coordinate to a whole pixel. `None` for NaN, infinities
/// and values outside the `i32` range.
fn pixel(v: f32) -> Option<i32> {
    (v.is_finite() && (i32::MIN as f32..i32::MAX as f32).contains(&v)).then(|| v as i32)
}

/// Convert wire detections, truncating coordinates to whole pixels and
/// dropping degenerate or unrepresentable boxes.
fn into_detections(raw: Vec<RawDetection>) -> Vec<Detection> {
    raw.into_iter()
        .filter_map(|d| {
            let (Some(x1), Some(y1), Some(x2), Some(y2)) =
                (pixel(d.x1), pixel(d.y1), pixel(d.x2), pixel(d.y2))
            else {
                tracing::warn!(
                    x1 = d.x1,
                    y1 = d.y1,
                    x2 = d.x2,
                    y2 = d.y2,
                    "Dropping detection with out-of-range coordinates"
                );
                return None;
            };
            match BoundingBox::new(x1, y1, x2, y2) {
                Ok(bbox) => Some(Detection::new(
                    bbox,
                    d.label.unwrap_or_else(|| FALLBACK_LABEL.to_string()),
                    d.confidence,
                )),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping detection with degenerate box");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<Detection> {
        let body: InferenceResponse = serde_json::from_str(json).unwrap();
        into_detections(body.detections)
    }

    #[test]
    fn response_is_converted_to_detections() {
        let detections = parse(
            r#"{"detections": [
                {"x1": 10.7, "y1": 20.2, "x2": 50.9, "y2": 80.0, "label": "marami_hot_chili", "confidence": 0.91}
            ]}"#,
        );
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!((d.bbox.x1(), d.bbox.y1(), d.bbox.x2(), d.bbox.y2()), (10, 20, 50, 80));
        assert_eq!(d.label, "marami_hot_chili");
        assert!((d.confidence - 0.91).abs() < 1e-6);
    }

    #[test]
    fn missing_label_uses_fallback() {
        let detections = parse(
            r#"{"detections": [{"x1": 0, "y1": 0, "x2": 5, "y2": 5, "confidence": 0.5}]}"#,
        );
        assert_eq!(detections[0].label, "chip");
    }

    #[test]
    fn degenerate_boxes_are_dropped() {
        let detections = parse(
            r#"{"detections": [
                {"x1": 5, "y1": 5, "x2": 5, "y2": 9, "label": "a", "confidence": 0.5},
                {"x1": 1, "y1": 1, "x2": 2, "y2": 2, "label": "b", "confidence": 0.5}
            ]}"#,
        );
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "b");
    }

    #[test]
    fn out_of_range_coordinates_are_dropped() {
        let detections = parse(
            r#"{"detections": [
                {"x1": 0, "y1": 0, "x2": 1e12, "y2": 5, "label": "huge", "confidence": 0.5},
                {"x1": -3e10, "y1": 0, "x2": 5, "y2": 5, "label": "negative", "confidence": 0.5},
                {"x1": 0, "y1": 0, "x2": 2147483648.0, "y2": 5, "label": "edge", "confidence": 0.5},
                {"x1": -4, "y1": 0, "x2": 5, "y2": 5, "label": "ok", "confidence": 0.5}
            ]}"#,
        );
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "ok");
        assert_eq!(detections[0].bbox.x1(), -4);
    }

    #[test]
    fn non_finite_coordinates_are_dropped() {
        let raw = vec![RawDetection {
            x1: f32::NAN,
            y1: 0.0,
            x2: f32::INFINITY,
            y2: 5.0,
            label: None,
            confidence: 0.5,
        }];
        assert!(into_detections(raw).is_empty());
    }

    #[test]
    fn empty_body_means_no_detections() {
        assert!(parse("{}").is_empty());
    }

    #[test]
    fn detector_error_display_http_status() {
        assert_eq!(DetectorError::HttpStatus(503).to_string(), "Detector returned HTTP 503");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_request_error() {
        let detector = HttpDetector::new("http://127.0.0.1:9/infer", Some(Duration::from_secs(2)))
            .unwrap();
        let frame = RgbImage::new(4, 4);
        let err = detector.infer(&frame).await.unwrap_err();
        assert!(matches!(err, DetectorError::Request(_)));
    }
}
