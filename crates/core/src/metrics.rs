//! Per-frame inference latency accounting.

use std::time::Duration;

use serde::Serialize;

use crate::types::Resolution;

/// Summary of one processing run, serialized as the `metrics` object of the
/// detection response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingMetrics {
    #[serde(rename = "total_frames")]
    pub frame_count: u64,
    /// Detector latency of every frame in seconds, in frame order.
    #[serde(skip)]
    pub latencies: Vec<f64>,
    #[serde(rename = "average_processing_time_per_frame")]
    pub average_latency: f64,
    pub processing_fps: f64,
    pub original_fps: f64,
    #[serde(serialize_with = "serialize_resolution")]
    pub resolution: Resolution,
}

fn serialize_resolution<S: serde::Serializer>(
    resolution: &Resolution,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(resolution)
}

#[derive(Debug, Default)]
pub struct MetricsAggregator {
    latencies: Vec<f64>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the latency of one detector call.
    pub fn record(&mut self, latency: Duration) {
        self.latencies.push(latency.as_secs_f64());
    }

    pub fn sample_count(&self) -> usize {
        self.latencies.len()
    }

    /// Mean latency in seconds; `0.0` with no samples.
    pub fn average(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
    }

    /// Effective throughput; `0.0` when the average is not positive.
    pub fn effective_fps(&self) -> f64 {
        let average = self.average();
        if average > 0.0 {
            1.0 / average
        } else {
            0.0
        }
    }

    pub fn summarize(&self, original_fps: f64, resolution: Resolution) -> ProcessingMetrics {
        ProcessingMetrics {
            frame_count: self.latencies.len() as u64,
            latencies: self.latencies.clone(),
            average_latency: self.average(),
            processing_fps: self.effective_fps(),
            original_fps,
            resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(samples_ms: &[u64]) -> MetricsAggregator {
        let mut agg = MetricsAggregator::new();
        for ms in samples_ms {
            agg.record(Duration::from_millis(*ms));
        }
        agg
    }

    #[test]
    fn empty_aggregator_summarizes_to_zero() {
        let metrics = MetricsAggregator::new().summarize(25.0, Resolution::new(640, 480));
        assert_eq!(metrics.frame_count, 0);
        assert_eq!(metrics.average_latency, 0.0);
        assert_eq!(metrics.processing_fps, 0.0);
        assert_eq!(metrics.original_fps, 25.0);
    }

    #[test]
    fn average_is_mean_of_samples() {
        let agg = aggregator(&[100, 200, 300, 400]);
        assert!((agg.average() - 0.25).abs() < 1e-9);
        assert!((agg.effective_fps() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn zero_latency_samples_give_zero_fps() {
        let agg = aggregator(&[0, 0, 0]);
        assert_eq!(agg.sample_count(), 3);
        assert_eq!(agg.average(), 0.0);
        assert_eq!(agg.effective_fps(), 0.0);
    }

    #[test]
    fn summary_keeps_latencies_in_order() {
        let metrics = aggregator(&[30, 10, 20]).summarize(30.0, Resolution::new(2, 2));
        assert_eq!(metrics.frame_count, 3);
        assert_eq!(metrics.latencies, vec![0.03, 0.01, 0.02]);
    }

    #[test]
    fn metrics_serialize_with_response_field_names() {
        let metrics = aggregator(&[500]).summarize(24.0, Resolution::new(1280, 720));
        let json = serde_json::to_value(&metrics).unwrap();

        assert_eq!(json["total_frames"], 1);
        assert_eq!(json["average_processing_time_per_frame"], 0.5);
        assert_eq!(json["processing_fps"], 2.0);
        assert_eq!(json["original_fps"], 24.0);
        assert_eq!(json["resolution"], "1280x720");
        assert!(json.get("latencies").is_none());
    }
}
