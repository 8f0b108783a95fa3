//! Feed reliability and quality scoring.
//!
//! `quality_score` is the value duplicates are ordered by. It packs three
//! tiers into one number so that a plain descending sort is lexicographic:
//!
//! ```text
//! quality = reliability * 1000 + resolution_points * 10 + fps_points
//! ```
//!
//! Reliability is a whole percent, so one point of reliability (1000) always
//! outweighs the largest resolution and frame rate contribution (310). Every
//! reliability figure that leaves this crate is that rounded value, including
//! `ManualCheckResult::reliability` and the stored `reliability_score`: 2 ok
//! checks out of 3 report 67.0, not 66.67.
//!
//! `display_score` is a 0-100 figure for humans and is never used for ordering.

use crate::database::{Database, Result};

/// Percentage of successful checks, rounded to a whole percent.
pub fn reliability_percentage(ok: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let ok = ok.min(total);
    (ok as f64 * 100.0 / total as f64).round()
}

/// Resolution tier by pixel area: 30 FHD, 20 HD, 10 SD, 5 smaller, 0 unknown.
pub fn resolution_points(width: Option<u32>, height: Option<u32>) -> u32 {
    if width.is_none() && height.is_none() {
        return 0;
    }
    let area = width.unwrap_or(0) as u64 * height.unwrap_or(0) as u64;
    match area {
        a if a >= 1920 * 1080 => 30,
        a if a >= 1280 * 720 => 20,
        a if a >= 854 * 480 => 10,
        _ => 5,
    }
}

/// Frame rate tier: 10 at 50+, 8 at 30+, 6 at 25+, 3 at 15+, otherwise 0.
pub fn fps_points(fps: Option<f64>) -> u32 {
    match fps {
        Some(f) if f >= 50.0 => 10,
        Some(f) if f >= 30.0 => 8,
        Some(f) if f >= 25.0 => 6,
        Some(f) if f >= 15.0 => 3,
        _ => 0,
    }
}

/// Ordering score: reliability, then resolution, then frame rate.
pub fn quality_score(reliability: f64, width: Option<u32>, height: Option<u32>, fps: Option<f64>) -> f64 {
    let reliability = reliability.clamp(0.0, 100.0);
    reliability * 1000.0
        + resolution_points(width, height) as f64 * 10.0
        + fps_points(fps) as f64
}

fn resolution_class(width: Option<u32>, height: Option<u32>) -> f64 {
    let w = width.unwrap_or(0);
    let h = height.unwrap_or(0);
    if width.is_none() && height.is_none() {
        40.0
    } else if h >= 2160 || w >= 3840 {
        100.0
    } else if h >= 1080 {
        85.0
    } else if h >= 720 {
        70.0
    } else {
        50.0
    }
}

/// Human-facing score in [0, 100], one decimal.
pub fn display_score(
    last_ok: bool,
    reliability: f64,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
) -> f64 {
    let fps_score = fps.map(|f| (f / 30.0 * 100.0).clamp(0.0, 100.0)).unwrap_or(0.0);

    let mut score = reliability.clamp(0.0, 100.0) * 0.60
        + resolution_class(width, height) * 0.25
        + fps_score * 0.15;
    if !last_ok {
        score -= 15.0;
    }

    (score.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

/// Feed scoring engine.
pub struct ScoringEngine;

impl ScoringEngine {
    /// Reliability of a feed over the trailing window ending at `now`.
    pub fn reliability(db: &Database, feed_id: i64, window_hours: u64, now: i64) -> Result<f64> {
        db.reliability(feed_id, window_hours, now)
    }

    /// Recompute the stored scores of every checked feed.
    ///
    /// Needed after the reliability window changes, since stored scores
    /// are otherwise only refreshed by check completions.
    pub fn rescore_all(db: &Database, window_hours: u64, now: i64) -> Result<usize> {
        let mut count = 0;
        for feed in db.get_all_feeds()? {
            let Some(last_ok) = feed.last_ok else {
                continue;
            };

            let reliability = Self::reliability(db, feed.id, window_hours, now)?;
            let quality = quality_score(reliability, feed.last_width, feed.last_height, feed.last_fps);
            let display = display_score(
                last_ok,
                reliability,
                feed.last_width,
                feed.last_height,
                feed.last_fps,
            );
            db.update_feed_scores(feed.id, reliability, quality, display)?;
            count += 1;
        }

        log::info!("ScoringEngine: rescored {} feed(s) over {}h window", count, window_hours);
        Ok(count)
    }
}
