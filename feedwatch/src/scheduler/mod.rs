//! Scheduled task management for feedwatch.
//!
//! This module provides:
//! - [`CheckScheduler`]: lease-based periodic feed health checks
//! - [`backoff_minutes`]: retry delay curve after failed checks

pub mod check_scheduler;

pub use check_scheduler::CheckScheduler;

/// Retry delay in minutes after `attempts` consecutive failures.
///
/// `min(max, min * 2^(attempts - 1))`, with 0 attempts treated as 1.
pub fn backoff_minutes(attempts: u32, min: u64, max: u64) -> u64 {
    let exponent = attempts.max(1) - 1;
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    min.saturating_mul(factor).min(max)
}
