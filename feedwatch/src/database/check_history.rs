//! Check history database operations.

use feedwatch_protocol::ProbeResult;
use rusqlite::{params, Connection};

use super::{span_secs, CheckRecord, Database, Result};
use crate::scoring::reliability_percentage;

/// Append one check record.
pub(super) fn insert_check_record(
    conn: &Connection,
    feed_id: i64,
    result: &ProbeResult,
    checked_at: i64,
) -> rusqlite::Result<i64> {
    let metrics = result.metrics();
    conn.execute(
        "INSERT INTO check_history (feed_id, checked_at, ok, codec, width, height, fps, error, raw) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            feed_id,
            checked_at,
            result.is_ok() as i32,
            metrics.and_then(|m| m.codec.as_deref()),
            metrics.and_then(|m| m.width),
            metrics.and_then(|m| m.height),
            metrics.and_then(|m| m.fps),
            result.error_message(),
            result.raw(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Reliability of a feed over the trailing window ending at `now`.
pub(super) fn reliability_on(
    conn: &Connection,
    feed_id: i64,
    window_hours: u64,
    now: i64,
) -> rusqlite::Result<f64> {
    let since = now.saturating_sub(span_secs(window_hours, 3600));
    let (total, ok): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(ok), 0) FROM check_history WHERE feed_id = ?1 AND checked_at > ?2 AND checked_at <= ?3",
        params![feed_id, since, now],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(reliability_percentage(ok as u64, total as u64))
}

impl Database {
    /// Get the most recent check records of a feed, newest first.
    pub fn get_check_history(&self, feed_id: i64, limit: u32) -> Result<Vec<CheckRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, feed_id, checked_at, ok, codec, width, height, fps, error, raw
             FROM check_history WHERE feed_id = ?1 ORDER BY checked_at DESC, id DESC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![feed_id, limit], |row| {
                Ok(CheckRecord {
                    id: row.get(0)?,
                    feed_id: row.get(1)?,
                    checked_at: row.get(2)?,
                    ok: row.get::<_, i32>(3)? != 0,
                    codec: row.get(4)?,
                    width: row.get(5)?,
                    height: row.get(6)?,
                    fps: row.get(7)?,
                    error: row.get(8)?,
                    raw: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Append a check record outside the lease protocol (history import).
    pub fn insert_check_record(
        &self,
        feed_id: i64,
        result: &ProbeResult,
        checked_at: i64,
    ) -> Result<i64> {
        Ok(insert_check_record(&self.conn, feed_id, result, checked_at)?)
    }

    /// Percentage (0-100) of successful checks within the trailing window.
    ///
    /// Returns 0.0 when the window holds no records.
    pub fn reliability(&self, feed_id: i64, window_hours: u64, now: i64) -> Result<f64> {
        Ok(reliability_on(&self.conn, feed_id, window_hours, now)?)
    }
}
