//! Check lease queue operations.
//!
//! Each feed owns exactly one `check_lease` row. A worker claims the row by
//! writing `locked_at` and a random `lock_token` in one transaction, runs the
//! probe with no transaction open, then presents the token back to
//! [`LeaseStore::complete_lease`]. A completion whose token no longer matches
//! (because the lease went stale and was reclaimed) changes nothing.

use feedwatch_protocol::ProbeResult;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::check_history::{insert_check_record, reliability_on};
use super::{span_secs, CheckLeaseRecord, CheckSettings, Database, DatabaseError, Result};
use crate::scheduler::backoff_minutes;
use crate::scoring::{display_score, quality_score};

/// Opaque token proving ownership of a check lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAcquire {
    /// The caller now holds the lease.
    Acquired(LeaseToken),
    /// A live lease is held by someone else.
    Conflict { locked_at: i64 },
}

/// Scores and schedule written by a successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCheck {
    pub ok: bool,
    pub reliability: f64,
    pub quality: f64,
    pub display: f64,
    pub attempts: u32,
    pub next_run_at: i64,
}

/// Result of a lease completion.
#[derive(Debug, Clone, PartialEq)]
pub enum CompleteOutcome {
    Completed(CompletedCheck),
    /// The stored token differs from the presented one; nothing was written.
    TokenMismatch,
}

/// Transactional work-queue operations backing the check scheduler.
pub trait LeaseStore {
    /// Unlock every lease older than `lease_minutes` and make it due now.
    fn reclaim_stale(&mut self, lease_minutes: u64, now: i64) -> Result<usize>;

    /// Claim the lease of `feed_id` if nobody holds it.
    fn acquire_lease(&mut self, feed_id: i64, now: i64) -> Result<LeaseAcquire>;

    /// Record a probe outcome and release the lease, if `token` still owns it.
    fn complete_lease(
        &mut self,
        feed_id: i64,
        token: &LeaseToken,
        result: &ProbeResult,
        settings: &CheckSettings,
        now: i64,
    ) -> Result<CompleteOutcome>;

    /// Unlocked feeds whose check is due, earliest first.
    fn due_feeds(&self, now: i64, limit: usize) -> Result<Vec<i64>>;

    fn get_check_lease(&self, feed_id: i64) -> Result<Option<CheckLeaseRecord>>;
}

impl LeaseStore for Database {
    fn reclaim_stale(&mut self, lease_minutes: u64, now: i64) -> Result<usize> {
        let cutoff = now.saturating_sub(span_secs(lease_minutes, 60));
        let tx = self.immediate()?;
        let reclaimed = tx.execute(
            "UPDATE check_lease SET locked_at = NULL, lock_token = NULL, next_run_at = ?2
             WHERE locked_at IS NOT NULL AND locked_at <= ?1",
            params![cutoff, now],
        )?;
        tx.commit()?;

        if reclaimed > 0 {
            log::warn!(
                "Database: reclaimed {} stale check lease(s) older than {} minutes",
                reclaimed,
                lease_minutes
            );
        }
        Ok(reclaimed)
    }

    fn acquire_lease(&mut self, feed_id: i64, now: i64) -> Result<LeaseAcquire> {
        let tx = self.immediate()?;

        let locked_at: Option<Option<i64>> = tx
            .query_row(
                "SELECT locked_at FROM check_lease WHERE feed_id = ?1",
                [feed_id],
                |row| row.get(0),
            )
            .optional()?;

        match locked_at {
            None => return Err(DatabaseError::FeedNotFound(feed_id)),
            Some(Some(locked_at)) => return Ok(LeaseAcquire::Conflict { locked_at }),
            Some(None) => {}
        }

        let token = LeaseToken::generate();
        let updated = tx.execute(
            "UPDATE check_lease SET locked_at = ?2, lock_token = ?3 WHERE feed_id = ?1 AND locked_at IS NULL",
            params![feed_id, now, token.as_str()],
        )?;
        if updated != 1 {
            return Ok(LeaseAcquire::Conflict { locked_at: now });
        }
        tx.commit()?;

        Ok(LeaseAcquire::Acquired(token))
    }

    fn complete_lease(
        &mut self,
        feed_id: i64,
        token: &LeaseToken,
        result: &ProbeResult,
        settings: &CheckSettings,
        now: i64,
    ) -> Result<CompleteOutcome> {
        let tx = self.immediate()?;

        let current: Option<(Option<String>, u32)> = tx
            .query_row(
                "SELECT lock_token, attempts FROM check_lease WHERE feed_id = ?1",
                [feed_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        // A deleted feed or a reclaimed lease both mean this worker lost it
        let attempts = match current {
            Some((Some(stored), attempts)) if stored == token.as_str() => attempts,
            _ => return Ok(CompleteOutcome::TokenMismatch),
        };

        insert_check_record(&tx, feed_id, result, now)?;

        let ok = result.is_ok();
        let (attempts, next_run_at) = if ok {
            (0, now.saturating_add(span_secs(settings.ok_recheck_hours, 3600)))
        } else {
            let attempts = attempts.saturating_add(1);
            let delay = backoff_minutes(attempts, settings.fail_retry_min, settings.fail_retry_max);
            (attempts, now.saturating_add(span_secs(delay, 60)))
        };
        let error = result.error_message();

        tx.execute(
            "UPDATE check_lease SET locked_at = NULL, lock_token = NULL, next_run_at = ?2,
                    attempts = ?3, last_result_ok = ?4, last_error = ?5
             WHERE feed_id = ?1",
            params![feed_id, next_run_at, attempts, ok as i32, error],
        )?;

        let reliability = reliability_on(&tx, feed_id, settings.reliability_window_hours, now)?;

        // A failed probe keeps the last known resolution so ranking stays stable
        let (quality, display) = if let Some(metrics) = result.metrics() {
            let quality = quality_score(reliability, metrics.width, metrics.height, metrics.fps);
            let display = display_score(true, reliability, metrics.width, metrics.height, metrics.fps);
            tx.execute(
                "UPDATE feeds SET last_ok = 1, last_codec = ?2, last_width = ?3, last_height = ?4,
                        last_fps = ?5, last_error = NULL, last_checked_at = ?6,
                        reliability_score = ?7, quality_score = ?8, display_score = ?9
                 WHERE id = ?1",
                params![
                    feed_id,
                    metrics.codec,
                    metrics.width,
                    metrics.height,
                    metrics.fps,
                    now,
                    reliability,
                    quality,
                    display
                ],
            )?;
            (quality, display)
        } else {
            let (width, height, fps): (Option<u32>, Option<u32>, Option<f64>) = tx.query_row(
                "SELECT last_width, last_height, last_fps FROM feeds WHERE id = ?1",
                [feed_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let quality = quality_score(reliability, width, height, fps);
            let display = display_score(false, reliability, width, height, fps);
            tx.execute(
                "UPDATE feeds SET last_ok = 0, last_error = ?2, last_checked_at = ?3,
                        reliability_score = ?4, quality_score = ?5, display_score = ?6
                 WHERE id = ?1",
                params![feed_id, error, now, reliability, quality, display],
            )?;
            (quality, display)
        };
        tx.commit()?;

        Ok(CompleteOutcome::Completed(CompletedCheck {
            ok,
            reliability,
            quality,
            display,
            attempts,
            next_run_at,
        }))
    }

    fn due_feeds(&self, now: i64, limit: usize) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT feed_id FROM check_lease
             WHERE locked_at IS NULL AND next_run_at <= ?1
             ORDER BY next_run_at ASC, feed_id ASC LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![now, limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn get_check_lease(&self, feed_id: i64) -> Result<Option<CheckLeaseRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT feed_id, next_run_at, locked_at, lock_token, attempts, last_result_ok, last_error
                 FROM check_lease WHERE feed_id = ?1",
                [feed_id],
                |row| {
                    Ok(CheckLeaseRecord {
                        feed_id: row.get(0)?,
                        next_run_at: row.get(1)?,
                        locked_at: row.get(2)?,
                        lock_token: row.get(3)?,
                        attempts: row.get(4)?,
                        last_result_ok: row.get::<_, Option<i32>>(5)?.map(|v| v != 0),
                        last_error: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewFeed;
    use feedwatch_protocol::{ProbeFailure, ProbeMetrics};

    const T0: i64 = 1_700_000_000;

    fn setup() -> (Database, i64) {
        let mut db = Database::open_in_memory().unwrap();
        let id = db
            .insert_feed(&NewFeed::new("http://a.example/live.m3u8", "ch1"), T0)
            .unwrap();
        (db, id)
    }

    fn acquired(outcome: LeaseAcquire) -> LeaseToken {
        match outcome {
            LeaseAcquire::Acquired(token) => token,
            other => panic!("expected lease, got {:?}", other),
        }
    }

    fn completed(outcome: CompleteOutcome) -> CompletedCheck {
        match outcome {
            CompleteOutcome::Completed(done) => done,
            CompleteOutcome::TokenMismatch => panic!("unexpected token mismatch"),
        }
    }

    fn hd_ok() -> ProbeResult {
        ProbeResult::success(ProbeMetrics::video("h264", 1920, 1080, 50.0), "{}")
    }

    fn timeout() -> ProbeResult {
        ProbeResult::failure(ProbeFailure::Timeout(12), "")
    }

    #[test]
    fn test_acquire_conflict_while_locked() {
        let (mut db, id) = setup();

        let token = acquired(db.acquire_lease(id, T0).unwrap());
        let lease = db.get_check_lease(id).unwrap().unwrap();
        assert_eq!(lease.locked_at, Some(T0));
        assert_eq!(lease.lock_token.as_deref(), Some(token.as_str()));

        assert_eq!(
            db.acquire_lease(id, T0 + 5).unwrap(),
            LeaseAcquire::Conflict { locked_at: T0 }
        );
    }

    #[test]
    fn test_acquire_unknown_feed() {
        let (mut db, _) = setup();
        assert!(matches!(
            db.acquire_lease(999, T0),
            Err(DatabaseError::FeedNotFound(999))
        ));
    }

    #[test]
    fn test_reclaim_stale_makes_lease_acquirable() {
        let (mut db, id) = setup();
        acquired(db.acquire_lease(id, T0).unwrap());

        // Not stale yet
        assert_eq!(db.reclaim_stale(15, T0 + 14 * 60).unwrap(), 0);
        assert!(db.get_check_lease(id).unwrap().unwrap().is_locked());

        let later = T0 + 15 * 60;
        assert_eq!(db.reclaim_stale(15, later).unwrap(), 1);
        let lease = db.get_check_lease(id).unwrap().unwrap();
        assert!(lease.locked_at.is_none());
        assert!(lease.lock_token.is_none());
        assert_eq!(lease.next_run_at, later);

        acquired(db.acquire_lease(id, later).unwrap());
    }

    #[test]
    fn test_late_completion_after_reclaim_is_ignored() {
        let (mut db, id) = setup();
        let settings = CheckSettings::default();

        let stale_token = acquired(db.acquire_lease(id, T0).unwrap());
        let later = T0 + 20 * 60;
        db.reclaim_stale(settings.lock_minutes, later).unwrap();
        let fresh_token = acquired(db.acquire_lease(id, later).unwrap());

        let outcome = db
            .complete_lease(id, &stale_token, &timeout(), &settings, later + 1)
            .unwrap();
        assert_eq!(outcome, CompleteOutcome::TokenMismatch);

        // The new holder's lease is untouched and no history was written
        let lease = db.get_check_lease(id).unwrap().unwrap();
        assert_eq!(lease.locked_at, Some(later));
        assert_eq!(lease.lock_token.as_deref(), Some(fresh_token.as_str()));
        assert_eq!(lease.attempts, 0);
        assert!(db.get_check_history(id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_failure_backoff_sequence_and_reset() {
        let (mut db, id) = setup();
        let settings = CheckSettings::default();
        let mut now = T0;

        for expected_minutes in [30, 60, 120, 240, 360, 360] {
            let token = acquired(db.acquire_lease(id, now).unwrap());
            let done = completed(db.complete_lease(id, &token, &timeout(), &settings, now).unwrap());
            assert!(!done.ok);
            assert_eq!(done.next_run_at - now, expected_minutes * 60);

            let lease = db.get_check_lease(id).unwrap().unwrap();
            assert_eq!(lease.next_run_at, done.next_run_at);
            assert_eq!(lease.attempts, done.attempts);
            assert_eq!(lease.last_result_ok, Some(false));
            assert_eq!(lease.last_error.as_deref(), Some("Probe timed out after 12s"));
            now = done.next_run_at;
        }
        assert_eq!(db.get_check_lease(id).unwrap().unwrap().attempts, 6);

        let token = acquired(db.acquire_lease(id, now).unwrap());
        let done = completed(db.complete_lease(id, &token, &hd_ok(), &settings, now).unwrap());
        assert!(done.ok);
        assert_eq!(done.attempts, 0);
        assert_eq!(done.next_run_at, now + 6 * 3600);

        let lease = db.get_check_lease(id).unwrap().unwrap();
        assert_eq!(lease.attempts, 0);
        assert!(lease.last_error.is_none());
        assert!(!lease.is_locked());
    }

    #[test]
    fn test_completion_updates_feed_snapshot_and_scores() {
        let (mut db, id) = setup();
        let settings = CheckSettings::default();

        let token = acquired(db.acquire_lease(id, T0).unwrap());
        let done = completed(db.complete_lease(id, &token, &hd_ok(), &settings, T0).unwrap());
        assert_eq!(done.reliability, 100.0);
        assert_eq!(done.quality, 100_000.0 + 300.0 + 10.0);

        let feed = db.get_feed(id).unwrap().unwrap();
        assert_eq!(feed.last_ok, Some(true));
        assert_eq!(feed.last_codec.as_deref(), Some("h264"));
        assert_eq!(feed.last_height, Some(1080));
        assert_eq!(feed.last_checked_at, Some(T0));
        assert_eq!(feed.reliability_score, 100.0);
        assert_eq!(feed.quality_score, done.quality);
        assert_eq!(feed.display_score, done.display);

        // A failure halves reliability and keeps the last known resolution
        let token = acquired(db.acquire_lease(id, T0 + 60).unwrap());
        let done = completed(db.complete_lease(id, &token, &timeout(), &settings, T0 + 60).unwrap());
        assert_eq!(done.reliability, 50.0);
        assert_eq!(done.quality, 50_000.0 + 300.0 + 10.0);

        let feed = db.get_feed(id).unwrap().unwrap();
        assert_eq!(feed.last_ok, Some(false));
        assert_eq!(feed.last_height, Some(1080));
        assert_eq!(feed.last_error.as_deref(), Some("Probe timed out after 12s"));
    }

    #[test]
    fn test_oversized_settings_saturate_schedule() {
        let (mut db, id) = setup();
        // Rows written by another process are read without validation
        let settings = CheckSettings {
            lock_minutes: 1 << 58,
            ok_recheck_hours: 1 << 52,
            fail_retry_min: u64::MAX,
            fail_retry_max: u64::MAX,
            reliability_window_hours: u64::MAX,
            ..CheckSettings::default()
        };

        let token = acquired(db.acquire_lease(id, T0).unwrap());
        assert_eq!(db.reclaim_stale(settings.lock_minutes, T0 + 3600).unwrap(), 0);

        let done = completed(db.complete_lease(id, &token, &hd_ok(), &settings, T0).unwrap());
        assert_eq!(done.next_run_at, i64::MAX);
        assert_eq!(done.reliability, 100.0);

        let token = acquired(db.acquire_lease(id, T0 + 1).unwrap());
        let done = completed(db.complete_lease(id, &token, &timeout(), &settings, T0 + 1).unwrap());
        assert_eq!(done.next_run_at, i64::MAX);
        assert_eq!(done.attempts, 1);
        assert_eq!(done.reliability, 50.0);
    }

    #[test]
    fn test_due_feeds_skips_locked_and_future() {
        let mut db = Database::open_in_memory().unwrap();
        let a = db.insert_feed(&NewFeed::new("http://a/1", "x"), T0).unwrap();
        let b = db.insert_feed(&NewFeed::new("http://b/1", "x"), T0 - 10).unwrap();
        let c = db.insert_feed(&NewFeed::new("http://c/1", "y"), T0 + 3600).unwrap();

        acquired(db.acquire_lease(a, T0).unwrap());

        assert_eq!(db.due_feeds(T0, 10).unwrap(), vec![b]);
        assert_eq!(db.due_feeds(T0 + 3600, 10).unwrap(), vec![b, c]);
        assert_eq!(db.due_feeds(T0 + 3600, 1).unwrap(), vec![b]);
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.db");
        let id = {
            let mut db = Database::open(&path).unwrap();
            db.insert_feed(&NewFeed::new("http://a/race", "race"), T0).unwrap()
        };

        let barrier = std::sync::Arc::new(std::sync::Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let mut db = Database::open(&path).unwrap();
                    barrier.wait();
                    db.acquire_lease(id, T0).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<LeaseAcquire> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = outcomes
            .iter()
            .filter(|o| matches!(o, LeaseAcquire::Acquired(_)))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, LeaseAcquire::Conflict { .. }))
                .count(),
            3
        );
    }
}
