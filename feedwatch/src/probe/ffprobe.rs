//! ffprobe-backed probe client.
//!
//! Runs `ffprobe -v error -print_format json -show_streams -select_streams v:0 <url>`
//! with a hard timeout and parses the first video stream out of the JSON.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use feedwatch_protocol::{ProbeFailure, ProbeMetrics, ProbeResult};
use log::debug;
use tokio::process::Command;

use super::ProbeClient;

/// Maximum number of stderr bytes kept in a failure record.
const MAX_STDERR_LEN: usize = 512;

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub avg_frame_rate: Option<String>,
        pub r_frame_rate: Option<String>,
    }
}

/// Probe client that shells out to ffprobe.
#[derive(Debug, Clone)]
pub struct FfprobeClient {
    ffprobe_path: PathBuf,
}

impl FfprobeClient {
    pub fn new<P: AsRef<Path>>(ffprobe_path: P) -> Self {
        Self {
            ffprobe_path: ffprobe_path.as_ref().to_path_buf(),
        }
    }
}

impl Default for FfprobeClient {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl ProbeClient for FfprobeClient {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeResult {
        let child = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return ProbeResult::failure(
                    ProbeFailure::Launch(format!("{}: {}", self.ffprobe_path.display(), e)),
                    "",
                )
            }
        };

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ProbeResult::failure(ProbeFailure::Launch(e.to_string()), ""),
            Err(_) => {
                debug!("FfprobeClient: probe timed out after {:?}", timeout);
                return ProbeResult::failure(ProbeFailure::Timeout(timeout.as_secs()), "");
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ProbeResult::failure(
                ProbeFailure::ExitStatus {
                    code: output.status.code().unwrap_or(-1),
                    stderr: truncate(stderr.trim(), MAX_STDERR_LEN),
                },
                stdout.as_ref(),
            );
        }

        parse_ffprobe_output(&stdout)
    }
}

/// Parses ffprobe JSON output into a probe result.
pub fn parse_ffprobe_output(json_str: &str) -> ProbeResult {
    if json_str.trim().is_empty() {
        return ProbeResult::failure(ProbeFailure::NoOutput, json_str);
    }

    let ffprobe: ffprobe_json::FfprobeOutput = match serde_json::from_str(json_str) {
        Ok(parsed) => parsed,
        Err(e) => return ProbeResult::failure(ProbeFailure::Malformed(e.to_string()), json_str),
    };

    let video = ffprobe
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let Some(stream) = video else {
        return ProbeResult::failure(ProbeFailure::NoVideoStream, json_str);
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

    let metrics = ProbeMetrics {
        codec: stream.codec_name,
        width: stream.width.filter(|w| *w > 0),
        height: stream.height.filter(|h| *h > 0),
        fps,
    };
    ProbeResult::success(metrics, json_str)
}

/// Parse an ffprobe rational such as `30000/1001`. `0/0` means unknown.
fn parse_frame_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse().ok()?,
    };

    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
