//! Database model definitions.

use serde::{Deserialize, Serialize};

/// Feed record from database.
#[derive(Debug, Clone, Serialize)]
pub struct FeedRecord {
    pub id: i64,
    #[serde(skip_serializing)]
    pub url: String,
    pub url_hash: String,
    pub url_display: String,
    // Logical channel identity
    pub channel_key: String,
    pub channel_name: Option<String>,
    // Last observed snapshot
    pub last_ok: Option<bool>,
    pub last_codec: Option<String>,
    pub last_width: Option<u32>,
    pub last_height: Option<u32>,
    pub last_fps: Option<f64>,
    pub last_error: Option<String>,
    pub last_checked_at: Option<i64>,
    // Scores
    pub reliability_score: f64,
    pub quality_score: f64,
    pub display_score: f64,
    // Metadata
    pub created_at: i64,
    pub updated_at: i64,
}

impl FeedRecord {
    /// Pixel area of the last observed frame, 0 when unknown.
    pub fn pixel_area(&self) -> u64 {
        match (self.last_width, self.last_height) {
            (Some(w), Some(h)) => w as u64 * h as u64,
            _ => 0,
        }
    }
}

/// New feed for insertion.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFeed {
    pub url: String,
    pub channel_key: String,
    pub channel_name: Option<String>,
}

impl NewFeed {
    pub fn new(url: &str, channel_key: &str) -> Self {
        Self {
            url: url.to_string(),
            channel_key: channel_key.to_string(),
            channel_name: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.channel_name = Some(name.to_string());
        self
    }
}

/// Check lease (work queue) entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckLeaseRecord {
    pub feed_id: i64,
    pub next_run_at: i64,
    pub locked_at: Option<i64>,
    #[serde(skip_serializing)]
    pub lock_token: Option<String>,
    pub attempts: u32,
    pub last_result_ok: Option<bool>,
    pub last_error: Option<String>,
}

impl CheckLeaseRecord {
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }
}

/// Check history record.
#[derive(Debug, Clone, Serialize)]
pub struct CheckRecord {
    pub id: i64,
    pub feed_id: i64,
    pub checked_at: i64,
    pub ok: bool,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub error: Option<String>,
    pub raw: Option<String>,
}

/// Longest accepted lease before reclaim (1 day).
pub const MAX_LOCK_MINUTES: u64 = 24 * 60;
/// Longest accepted recheck delay after a success (30 days).
pub const MAX_OK_RECHECK_HOURS: u64 = 30 * 24;
/// Longest accepted retry delay after a failure (30 days).
pub const MAX_RETRY_MINUTES: u64 = 30 * 24 * 60;
/// Longest accepted probe timeout (1 hour).
pub const MAX_PROBE_TIMEOUT_SECS: u64 = 3600;
/// Longest accepted sweep interval (1 day).
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 3600;
/// Most probes one process may run at once.
pub const MAX_CONCURRENT_CHECKS: usize = 1024;
/// Most due feeds picked per sweep.
pub const MAX_SWEEP_BATCH_SIZE: usize = 10_000;
/// Longest accepted reliability window (1 year).
pub const MAX_RELIABILITY_WINDOW_HOURS: u64 = 365 * 24;

/// Check scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSettings {
    /// Lease age after which a lock is considered abandoned (minutes).
    pub lock_minutes: u64,
    /// Recheck delay after a successful check (hours).
    pub ok_recheck_hours: u64,
    /// First retry delay after a failure (minutes).
    pub fail_retry_min: u64,
    /// Retry delay cap (minutes).
    pub fail_retry_max: u64,
    /// Hard timeout for one probe (seconds).
    pub probe_timeout_secs: u64,
    /// Interval between scheduler sweeps (seconds).
    pub sweep_interval_secs: u64,
    /// Maximum probes running at once per process.
    pub max_concurrent_checks: usize,
    /// Maximum due feeds picked per sweep.
    pub sweep_batch_size: usize,
    /// Trailing window for reliability (hours).
    pub reliability_window_hours: u64,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            lock_minutes: 15,
            ok_recheck_hours: 6,
            fail_retry_min: 30,
            fail_retry_max: 360,
            probe_timeout_secs: 12,
            sweep_interval_secs: 60,
            max_concurrent_checks: 4,
            sweep_batch_size: 32,
            reliability_window_hours: 168,
        }
    }
}

impl CheckSettings {
    /// Validate relationships between settings.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.fail_retry_min == 0 {
            return Err("fail_retry_min must be at least 1".into());
        }
        if self.fail_retry_max < self.fail_retry_min {
            return Err("fail_retry_max must not be below fail_retry_min".into());
        }
        if self.lock_minutes.saturating_mul(60) <= self.probe_timeout_secs {
            return Err("lock_minutes must exceed the probe timeout".into());
        }
        if self.max_concurrent_checks == 0 || self.sweep_batch_size == 0 {
            return Err("concurrency and batch size must be at least 1".into());
        }
        if self.sweep_interval_secs == 0 || self.reliability_window_hours == 0 {
            return Err("intervals must be at least 1".into());
        }
        let limits = [
            ("lock_minutes", self.lock_minutes, MAX_LOCK_MINUTES),
            ("ok_recheck_hours", self.ok_recheck_hours, MAX_OK_RECHECK_HOURS),
            ("fail_retry_max", self.fail_retry_max, MAX_RETRY_MINUTES),
            ("probe_timeout_secs", self.probe_timeout_secs, MAX_PROBE_TIMEOUT_SECS),
            ("sweep_interval_secs", self.sweep_interval_secs, MAX_SWEEP_INTERVAL_SECS),
            (
                "max_concurrent_checks",
                self.max_concurrent_checks as u64,
                MAX_CONCURRENT_CHECKS as u64,
            ),
            ("sweep_batch_size", self.sweep_batch_size as u64, MAX_SWEEP_BATCH_SIZE as u64),
            (
                "reliability_window_hours",
                self.reliability_window_hours,
                MAX_RELIABILITY_WINDOW_HOURS,
            ),
        ];
        for (name, value, max) in limits {
            if value > max {
                return Err(format!("{} must not exceed {}", name, max));
            }
        }
        Ok(())
    }
}
