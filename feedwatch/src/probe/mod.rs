//! Stream probing.
//!
//! This module provides:
//! - [`ProbeClient`]: the seam the check scheduler probes feeds through
//! - [`FfprobeClient`]: implementation backed by an external `ffprobe` binary

pub mod ffprobe;

use std::time::Duration;

use async_trait::async_trait;
use feedwatch_protocol::ProbeResult;

pub use ffprobe::FfprobeClient;

/// Inspects a stream URL and reports its video properties.
///
/// Implementations never return an error: every failure mode is folded into
/// [`ProbeResult::Failure`] so it can be recorded as a failed check.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeResult;
}
