//! Probe outcome and API payload definitions.

use serde::{Deserialize, Serialize};

use crate::error::ProbeFailure;

/// Stream properties observed by a successful probe.
///
/// Every field is optional: inspectors routinely omit dimensions or frame
/// rate for live sources that have not delivered a keyframe yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeMetrics {
    /// Video codec name (e.g. "h264", "hevc").
    pub codec: Option<String>,
    /// Frame width in pixels.
    pub width: Option<u32>,
    /// Frame height in pixels.
    pub height: Option<u32>,
    /// Frames per second.
    pub fps: Option<f64>,
}

impl ProbeMetrics {
    /// Metrics with every field known.
    pub fn video(codec: &str, width: u32, height: u32, fps: f64) -> Self {
        Self {
            codec: Some(codec.to_string()),
            width: Some(width),
            height: Some(height),
            fps: Some(fps),
        }
    }
}

/// Outcome of one probe run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeResult {
    /// The feed delivered a decodable video stream.
    Success {
        metrics: ProbeMetrics,
        /// Raw inspector payload, kept for the check history.
        raw: String,
    },
    /// The feed could not be inspected.
    Failure {
        reason: ProbeFailure,
        /// Whatever the inspector printed, possibly empty.
        raw: String,
    },
}

impl ProbeResult {
    pub fn success(metrics: ProbeMetrics, raw: impl Into<String>) -> Self {
        ProbeResult::Success {
            metrics,
            raw: raw.into(),
        }
    }

    pub fn failure(reason: ProbeFailure, raw: impl Into<String>) -> Self {
        ProbeResult::Failure {
            reason,
            raw: raw.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeResult::Success { .. })
    }

    /// Metrics of a successful probe.
    pub fn metrics(&self) -> Option<&ProbeMetrics> {
        match self {
            ProbeResult::Success { metrics, .. } => Some(metrics),
            ProbeResult::Failure { .. } => None,
        }
    }

    /// Human-readable failure text, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ProbeResult::Success { .. } => None,
            ProbeResult::Failure { reason, .. } => Some(reason.to_string()),
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            ProbeResult::Success { raw, .. } | ProbeResult::Failure { raw, .. } => raw,
        }
    }
}

/// Response of the manual single-feed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualCheckResult {
    pub ok: bool,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub error: Option<String>,
    /// Reliability after this check was recorded (0-100).
    pub reliability: f64,
    /// Persisted ranking score after this check was recorded.
    pub quality: f64,
    /// Check time (Unix seconds).
    pub timestamp: i64,
}

/// Current holder of the preview lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewLockInfo {
    pub locked_by: String,
    pub feed_id: i64,
    pub channel_name: Option<String>,
    pub locked_at: i64,
    pub last_heartbeat: i64,
}

/// Channel metadata and proxy location handed to the preview player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub feed_id: i64,
    pub channel_key: String,
    pub channel_name: Option<String>,
    pub url_display: String,
    pub proxy_url: String,
    pub last_ok: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_result_accessors() {
        let ok = ProbeResult::success(ProbeMetrics::video("hevc", 3840, 2160, 59.94), "{\"streams\":[]}");
        assert!(ok.is_ok());
        assert_eq!(ok.error_message(), None);
        assert_eq!(ok.raw(), "{\"streams\":[]}");

        let failed = ProbeResult::failure(ProbeFailure::NoVideoStream, "{}");
        assert!(!failed.is_ok());
        assert!(failed.metrics().is_none());
        assert_eq!(failed.error_message().as_deref(), Some("No video stream found"));
    }

    #[test]
    fn test_probe_result_json_shape() {
        let failed = ProbeResult::failure(ProbeFailure::Timeout(12), "");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["reason"]["kind"], "timeout");
        assert_eq!(value["reason"]["detail"], 12);
    }
}
