//! Shared types for the feedwatch stream health monitor.
//!
//! This crate holds the I/O-free vocabulary exchanged between the probe
//! layer, the check scheduler and the web API:
//!
//! - [`ProbeMetrics`]: codec, resolution and frame rate observed on a feed
//! - [`ProbeResult`]: tagged success/failure outcome of one probe run
//! - [`ProbeFailure`]: why a probe did not produce usable metrics
//! - [`ManualCheckResult`], [`PreviewLockInfo`], [`StreamInfo`]: API payloads
//!
//! ```rust
//! use feedwatch_protocol::{ProbeFailure, ProbeMetrics, ProbeResult};
//!
//! let ok = ProbeResult::success(ProbeMetrics::video("h264", 1920, 1080, 25.0), "{}");
//! assert!(ok.is_ok());
//! assert_eq!(ok.metrics().and_then(|m| m.height), Some(1080));
//!
//! let failed = ProbeResult::failure(ProbeFailure::Timeout(12), "");
//! assert!(!failed.is_ok());
//! assert_eq!(failed.error_message().as_deref(), Some("Probe timed out after 12s"));
//! ```

pub mod error;
pub mod types;

pub use error::ProbeFailure;
pub use types::{
    ManualCheckResult, PreviewLockInfo, ProbeMetrics, ProbeResult, StreamInfo,
};
