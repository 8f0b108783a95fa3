//! Probe failure taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a probe run did not yield a usable video stream.
///
/// Failures are recorded as failed checks; they are never propagated as
/// errors past the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeFailure {
    /// The inspector binary could not be started.
    #[error("Failed to launch probe: {0}")]
    Launch(String),

    /// The inspector exited without printing anything.
    #[error("Probe produced no output")]
    NoOutput,

    /// The inspector output could not be parsed.
    #[error("Malformed probe output: {0}")]
    Malformed(String),

    /// The output parsed but contained no video stream.
    #[error("No video stream found")]
    NoVideoStream,

    /// The inspector did not finish within the hard timeout (seconds).
    #[error("Probe timed out after {0}s")]
    Timeout(u64),

    /// The inspector exited unsuccessfully.
    #[error("Probe exited with status {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },
}

impl ProbeFailure {
    /// Short machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            ProbeFailure::Launch(_) => "launch",
            ProbeFailure::NoOutput => "no_output",
            ProbeFailure::Malformed(_) => "malformed",
            ProbeFailure::NoVideoStream => "no_video_stream",
            ProbeFailure::Timeout(_) => "timeout",
            ProbeFailure::ExitStatus { .. } => "exit_status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        assert_eq!(ProbeFailure::NoOutput.to_string(), "Probe produced no output");
        assert_eq!(
            ProbeFailure::ExitStatus { code: 1, stderr: "403 Forbidden".into() }.to_string(),
            "Probe exited with status 1: 403 Forbidden"
        );
        assert_eq!(ProbeFailure::Timeout(10).code(), "timeout");
    }

    #[test]
    fn test_failure_serde_tagging() {
        let json = serde_json::to_string(&ProbeFailure::Malformed("eof".into())).unwrap();
        assert_eq!(json, r#"{"kind":"malformed","detail":"eof"}"#);

        let back: ProbeFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProbeFailure::Malformed("eof".into()));
    }
}
