//! Periodic feed health check scheduler.
//!
//! This module keeps every feed's health snapshot fresh by probing it on a
//! schedule driven by the `check_lease` queue.
//!
//! # How It Works
//!
//! 1. The scheduler runs as a background task, ticking every `sweep_interval_secs`
//! 2. Each tick reclaims stale leases, then lists feeds whose check is due
//! 3. Each due feed is claimed with a lease token, probed with no database
//!    lock held, and completed with the token
//! 4. Completion records history, reschedules the lease and rescores the feed
//!
//! Several processes may run schedulers against the same database file.
//! Lease acquisition is the only thing that decides who checks a feed.
//!
//! # Configuration
//!
//! Timing and concurrency come from the `check_settings` row and are reloaded
//! on every tick, so changes made over the API apply without a restart.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feedwatch_protocol::{ManualCheckResult, ProbeResult};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::interval;

use crate::database::{
    CheckSettings, CompleteOutcome, CompletedCheck, Database, DatabaseError, DatabaseHandle,
    LeaseAcquire, LeaseStore, LeaseToken, MAX_CONCURRENT_CHECKS,
};
use crate::probe::ProbeClient;

/// Manual check errors.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Another worker holds the feed's lease.
    #[error("Feed is already being checked")]
    AlreadyChecking,

    #[error("Feed not found: {0}")]
    FeedNotFound(i64),

    /// The lease was reclaimed before the probe finished.
    #[error("Check lease was lost before completion")]
    LeaseLost,

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for CheckError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::FeedNotFound(id) => CheckError::FeedNotFound(id),
            other => CheckError::Database(other),
        }
    }
}

/// Check scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
    /// Scheduler is stopped.
    Stopped,
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    /// Stale leases returned to the queue.
    pub reclaimed: usize,
    /// Due feeds picked for this sweep.
    pub due: usize,
    /// Checks completed.
    pub checked: usize,
    /// Completed checks that failed.
    pub failed: usize,
    /// Feeds skipped because another worker held the lease.
    pub conflicts: usize,
    /// Completions rejected because the lease was no longer ours.
    pub lost: usize,
    /// The datastore stayed unavailable after a reconnect and the batch was cut short.
    pub aborted: bool,
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Lease-based periodic feed checker.
pub struct CheckScheduler {
    /// Database handle.
    database: DatabaseHandle,
    /// Probe used for every check.
    prober: Arc<dyn ProbeClient>,
    /// Current state.
    state: Arc<Mutex<SchedulerState>>,
    /// Number of probes in flight.
    active_checks: Arc<AtomicUsize>,
    clock: Clock,
}

impl CheckScheduler {
    /// Create a new check scheduler.
    pub fn new(database: DatabaseHandle, prober: Arc<dyn ProbeClient>) -> Self {
        Self {
            database,
            prober,
            state: Arc::new(Mutex::new(SchedulerState::Running)),
            active_checks: Arc::new(AtomicUsize::new(0)),
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
        }
    }

    /// Replace the wall clock (tests drive time explicitly).
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Start the scheduler background task.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop.
    async fn run(&self) {
        let mut period = match self.database.lock().await.get_check_settings() {
            Ok(settings) => settings.sweep_interval_secs,
            Err(e) => {
                warn!("CheckScheduler: Failed to load settings, using defaults: {}", e);
                CheckSettings::default().sweep_interval_secs
            }
        };
        info!("CheckScheduler: Starting with sweep interval {} seconds", period);

        let mut ticker = interval(Duration::from_secs(period));

        loop {
            ticker.tick().await;

            let state = *self.state.lock().await;
            match state {
                SchedulerState::Stopped => {
                    info!("CheckScheduler: Stopped");
                    break;
                }
                SchedulerState::Paused => {
                    debug!("CheckScheduler: Paused, skipping sweep");
                    continue;
                }
                SchedulerState::Running => {}
            }

            match self.sweep().await {
                Ok((report, settings)) => {
                    if report.due > 0 {
                        info!(
                            "CheckScheduler: Sweep done: {} checked ({} failed), {} conflicts, {} lost, {} reclaimed",
                            report.checked, report.failed, report.conflicts, report.lost, report.reclaimed
                        );
                    }
                    if settings.sweep_interval_secs != period {
                        period = settings.sweep_interval_secs;
                        info!("CheckScheduler: Sweep interval changed to {} seconds", period);
                        ticker = interval(Duration::from_secs(period));
                        // The first tick of a new interval fires immediately
                        ticker.tick().await;
                    }
                }
                Err(e) => error!("CheckScheduler: Error during sweep: {}", e),
            }
        }
    }

    /// Reclaim stale leases, then check up to one batch of due feeds.
    ///
    /// A SQLite failure in any datastore step reopens the connection once and
    /// retries that step. If the retry fails too the sweep ends early; leases
    /// already taken stay locked until `reclaim_stale` recovers them.
    async fn sweep(&self) -> Result<(SweepReport, CheckSettings), DatabaseError> {
        let now = self.now();
        let (settings, reclaimed, due) = {
            let mut db = self.database.lock().await;
            with_reconnect(&mut db, "sweep setup", |db| {
                let settings = db.get_check_settings()?;
                let reclaimed = db.reclaim_stale(settings.lock_minutes, now)?;
                let due = db.due_feeds(now, settings.sweep_batch_size)?;
                Ok((settings, reclaimed, due))
            })?
        };

        let mut report = SweepReport {
            reclaimed,
            due: due.len(),
            ..SweepReport::default()
        };
        if due.is_empty() {
            debug!("CheckScheduler: No feeds due for checking");
            return Ok((report, settings));
        }

        info!("CheckScheduler: {} feed(s) due for checking", due.len());

        let permits = settings
            .max_concurrent_checks
            .clamp(1, MAX_CONCURRENT_CHECKS.min(Semaphore::MAX_PERMITS));
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();

        for feed_id in due {
            // Wait for a slot before claiming, so a held lease is always being probed
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let claimed = {
                let mut db = self.database.lock().await;
                let at = self.now();
                with_reconnect(&mut db, "lease acquisition", |db| db.acquire_lease(feed_id, at))
                    .and_then(|acquired| match acquired {
                        LeaseAcquire::Acquired(token) => {
                            // Lease stays locked until reclaimed if the lookup fails
                            let feed =
                                with_reconnect(&mut db, "feed lookup", |db| db.get_feed(feed_id))?;
                            Ok(Claim::Acquired(token, feed.map(|feed| feed.url)))
                        }
                        LeaseAcquire::Conflict { locked_at } => Ok(Claim::Conflict(locked_at)),
                    })
            };

            let (token, url) = match claimed {
                Ok(Claim::Acquired(token, Some(url))) => (token, url),
                Ok(Claim::Acquired(_, None)) => continue,
                Ok(Claim::Conflict(locked_at)) => {
                    debug!(
                        "CheckScheduler: Feed {} already leased since {}, skipping",
                        feed_id, locked_at
                    );
                    report.conflicts += 1;
                    continue;
                }
                Err(DatabaseError::FeedNotFound(_)) => {
                    debug!("CheckScheduler: Feed {} deleted before check", feed_id);
                    continue;
                }
                Err(e @ (DatabaseError::Sqlite(_) | DatabaseError::PathError(_))) => {
                    error!(
                        "CheckScheduler: Datastore unavailable after reconnect, ending sweep: {}",
                        e
                    );
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    warn!("CheckScheduler: Failed to lease feed {}: {}", feed_id, e);
                    continue;
                }
            };

            let job = CheckJob {
                database: self.database.clone(),
                prober: self.prober.clone(),
                active_checks: self.active_checks.clone(),
                clock: self.clock.clone(),
                settings: settings.clone(),
            };
            tasks.spawn(async move {
                let outcome = job.run(feed_id, &url, token).await;
                drop(permit);
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((_, CompleteOutcome::Completed(done)))) => {
                    report.checked += 1;
                    if !done.ok {
                        report.failed += 1;
                    }
                }
                Ok(Ok((_, CompleteOutcome::TokenMismatch))) => report.lost += 1,
                Ok(Err(e)) => error!("CheckScheduler: Check abandoned: {}", e),
                Err(e) => error!("CheckScheduler: Check task failed: {}", e),
            }
        }

        Ok((report, settings))
    }

    /// Check one feed now, outside the regular schedule.
    pub async fn run_manual_check(&self, feed_id: i64) -> Result<ManualCheckResult, CheckError> {
        let (settings, claim) = {
            let mut db = self.database.lock().await;
            let now = self.now();
            with_reconnect(&mut db, "manual check setup", |db| {
                let settings = db.get_check_settings()?;
                db.reclaim_stale(settings.lock_minutes, now)?;

                let feed = db.get_feed(feed_id)?.ok_or(DatabaseError::FeedNotFound(feed_id))?;
                let claim = match db.acquire_lease(feed_id, now)? {
                    LeaseAcquire::Acquired(token) => Claim::Acquired(token, Some(feed.url)),
                    LeaseAcquire::Conflict { locked_at } => Claim::Conflict(locked_at),
                };
                Ok((settings, claim))
            })?
        };
        let (token, url) = match claim {
            Claim::Acquired(token, Some(url)) => (token, url),
            Claim::Acquired(_, None) => return Err(CheckError::FeedNotFound(feed_id)),
            Claim::Conflict(_) => return Err(CheckError::AlreadyChecking),
        };

        info!("CheckScheduler: Manual check of feed {}", feed_id);

        let job = CheckJob {
            database: self.database.clone(),
            prober: self.prober.clone(),
            active_checks: self.active_checks.clone(),
            clock: self.clock.clone(),
            settings,
        };
        let (result, completed, timestamp) = match job.run(feed_id, &url, token).await? {
            ((result, timestamp), CompleteOutcome::Completed(done)) => (result, done, timestamp),
            (_, CompleteOutcome::TokenMismatch) => return Err(CheckError::LeaseLost),
        };

        let metrics = result.metrics();
        Ok(ManualCheckResult {
            ok: completed.ok,
            codec: metrics.and_then(|m| m.codec.clone()),
            width: metrics.and_then(|m| m.width),
            height: metrics.and_then(|m| m.height),
            fps: metrics.and_then(|m| m.fps),
            error: result.error_message(),
            reliability: completed.reliability,
            quality: completed.quality,
            timestamp,
        })
    }

    /// Pause the scheduler.
    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        if *state == SchedulerState::Running {
            *state = SchedulerState::Paused;
            info!("CheckScheduler: Paused");
        }
    }

    /// Resume the scheduler.
    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        if *state == SchedulerState::Paused {
            *state = SchedulerState::Running;
            info!("CheckScheduler: Resumed");
        }
    }

    /// Stop the scheduler.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        *state = SchedulerState::Stopped;
        info!("CheckScheduler: Stop requested");
    }

    /// Get the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        *self.state.lock().await
    }

    /// Get the number of probes in flight.
    pub fn active_check_count(&self) -> usize {
        self.active_checks.load(Ordering::SeqCst)
    }

    /// Run a sweep immediately.
    pub async fn trigger_sweep(&self) -> Result<SweepReport, CheckError> {
        info!("CheckScheduler: Manual sweep triggered");
        let (report, _) = self.sweep().await?;
        Ok(report)
    }
}

/// A single leased check: probe, then complete with the lease token.
struct CheckJob {
    database: DatabaseHandle,
    prober: Arc<dyn ProbeClient>,
    active_checks: Arc<AtomicUsize>,
    clock: Clock,
    settings: CheckSettings,
}

impl CheckJob {
    async fn run(
        self,
        feed_id: i64,
        url: &str,
        token: LeaseToken,
    ) -> Result<((ProbeResult, i64), CompleteOutcome), DatabaseError> {
        self.active_checks.fetch_add(1, Ordering::SeqCst);
        let result = self
            .prober
            .probe(url, Duration::from_secs(self.settings.probe_timeout_secs))
            .await;
        self.active_checks.fetch_sub(1, Ordering::SeqCst);

        if let ProbeResult::Failure { reason, .. } = &result {
            debug!(
                "CheckScheduler: Feed {} probe failed [{}]: {}",
                feed_id,
                reason.code(),
                reason
            );
        }

        let now = (self.clock)();
        let outcome = self.complete(feed_id, &token, &result, now).await?;
        match &outcome {
            CompleteOutcome::Completed(CompletedCheck {
                ok,
                reliability,
                display,
                attempts,
                next_run_at,
                ..
            }) => debug!(
                "CheckScheduler: Feed {} checked ok={} reliability={} display={} attempts={} next={}",
                feed_id, ok, reliability, display, attempts, next_run_at
            ),
            CompleteOutcome::TokenMismatch => warn!(
                "CheckScheduler: Lease of feed {} was reclaimed before completion, result dropped",
                feed_id
            ),
        }

        Ok(((result, now), outcome))
    }

    /// Complete the lease, reopening the connection once if the datastore failed.
    async fn complete(
        &self,
        feed_id: i64,
        token: &LeaseToken,
        result: &ProbeResult,
        now: i64,
    ) -> Result<CompleteOutcome, DatabaseError> {
        let mut db = self.database.lock().await;
        with_reconnect(&mut db, "check completion", |db| {
            db.complete_lease(feed_id, token, result, &self.settings, now)
        })
    }
}

/// Outcome of claiming one feed for a check.
enum Claim {
    /// Lease taken; the URL is `None` if the feed vanished meanwhile.
    Acquired(LeaseToken, Option<String>),
    Conflict(i64),
}

/// Run a datastore step, reopening the connection and retrying once if
/// SQLite fails.
fn with_reconnect<T, F>(db: &mut Database, step: &str, mut op: F) -> Result<T, DatabaseError>
where
    F: FnMut(&mut Database) -> Result<T, DatabaseError>,
{
    match op(db) {
        Err(DatabaseError::Sqlite(e)) => {
            warn!("CheckScheduler: {} failed ({}), reconnecting", step, e);
            db.reconnect()?;
            op(db)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewFeed;
    use async_trait::async_trait;
    use feedwatch_protocol::{ProbeFailure, ProbeMetrics};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicI64;

    /// Probe returning queued results, then a default success.
    #[derive(Default)]
    struct ScriptedProbe {
        script: std::sync::Mutex<VecDeque<ProbeResult>>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn with_script(results: Vec<ProbeResult>) -> Self {
            Self {
                script: std::sync::Mutex::new(results.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ProbeClient for ScriptedProbe {
        async fn probe(&self, _url: &str, _timeout: Duration) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                ProbeResult::success(ProbeMetrics::video("h264", 1920, 1080, 50.0), "{}")
            })
        }
    }

    struct Fixture {
        database: DatabaseHandle,
        probe: Arc<ScriptedProbe>,
        scheduler: CheckScheduler,
        clock: Arc<AtomicI64>,
    }

    const START: i64 = 1_700_000_000;

    fn setup(probe: ScriptedProbe, feeds: usize) -> (Fixture, Vec<i64>) {
        setup_with(Database::open_in_memory().unwrap(), probe, feeds)
    }

    fn setup_with(mut db: Database, probe: ScriptedProbe, feeds: usize) -> (Fixture, Vec<i64>) {
        db.get_check_settings().unwrap();
        let ids = (0..feeds)
            .map(|i| {
                db.insert_feed(&NewFeed::new(&format!("http://cdn/{}/live.m3u8", i), "ch"), START)
                    .unwrap()
            })
            .collect();

        let database = Arc::new(Mutex::new(db));
        let probe = Arc::new(probe);
        let clock = Arc::new(AtomicI64::new(START));
        let handle = clock.clone();
        let scheduler = CheckScheduler::new(database.clone(), probe.clone())
            .with_clock(move || handle.load(Ordering::SeqCst));

        (
            Fixture {
                database,
                probe,
                scheduler,
                clock,
            },
            ids,
        )
    }

    #[tokio::test]
    async fn test_sweep_checks_due_feeds() {
        let (f, ids) = setup(ScriptedProbe::default(), 3);

        let report = f.scheduler.trigger_sweep().await.unwrap();
        assert_eq!(report.due, 3);
        assert_eq!(report.checked, 3);
        assert_eq!(report.failed, 0);

        let db = f.database.lock().await;
        for id in ids {
            let lease = db.get_check_lease(id).unwrap().unwrap();
            assert!(!lease.is_locked());
            assert_eq!(lease.next_run_at, START + 6 * 3600);
            assert_eq!(db.get_feed(id).unwrap().unwrap().quality_score, 100_310.0);
        }
        drop(db);

        // Nothing due until the recheck time
        let report = f.scheduler.trigger_sweep().await.unwrap();
        assert_eq!(report.due, 0);
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sweep_respects_concurrency_limit() {
        let probe = ScriptedProbe {
            delay: Some(Duration::from_millis(30)),
            ..ScriptedProbe::default()
        };
        let (f, _) = setup(probe, 6);
        {
            let db = f.database.lock().await;
            let settings = CheckSettings {
                max_concurrent_checks: 2,
                ..db.get_check_settings().unwrap()
            };
            db.update_check_settings(&settings).unwrap();
        }

        let report = f.scheduler.trigger_sweep().await.unwrap();
        assert_eq!(report.checked, 6);
        assert!(f.probe.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(f.scheduler.active_check_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_leased_feed() {
        let (f, ids) = setup(ScriptedProbe::default(), 2);
        {
            let mut db = f.database.lock().await;
            assert!(matches!(
                db.acquire_lease(ids[0], START).unwrap(),
                LeaseAcquire::Acquired(_)
            ));
        }

        let report = f.scheduler.trigger_sweep().await.unwrap();
        // Locked leases are not due, so only the free feed is picked
        assert_eq!(report.due, 1);
        assert_eq!(report.checked, 1);
        assert!(f
            .database
            .lock()
            .await
            .get_check_lease(ids[0])
            .unwrap()
            .unwrap()
            .is_locked());
    }

    /// Make every write on the current connection fail until it is reopened.
    async fn break_connection(database: &DatabaseHandle) {
        database
            .lock()
            .await
            .connection()
            .execute_batch("PRAGMA query_only = ON;")
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_reclaims_abandoned_lease() {
        let (f, ids) = setup(ScriptedProbe::default(), 1);
        let abandoned = {
            let mut db = f.database.lock().await;
            match db.acquire_lease(ids[0], START).unwrap() {
                LeaseAcquire::Acquired(token) => token,
                other => panic!("unexpected {:?}", other),
            }
        };

        // Still within lock_minutes: the lease is neither reclaimed nor due
        f.clock.store(START + 14 * 60, Ordering::SeqCst);
        let report = f.scheduler.trigger_sweep().await.unwrap();
        assert_eq!(report.reclaimed, 0);
        assert_eq!(report.due, 0);

        let later = START + 15 * 60;
        f.clock.store(later, Ordering::SeqCst);
        let report = f.scheduler.trigger_sweep().await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.checked, 1);
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 1);

        let mut db = f.database.lock().await;
        let lease = db.get_check_lease(ids[0]).unwrap().unwrap();
        assert!(!lease.is_locked());
        assert!(lease.lock_token.is_none());
        assert_eq!(lease.attempts, 0);
        assert_eq!(lease.last_result_ok, Some(true));
        assert_eq!(lease.next_run_at, later + 6 * 3600);
        assert_eq!(db.get_check_history(ids[0], 10).unwrap().len(), 1);

        // The abandoned holder finishing late changes nothing
        let settings = db.get_check_settings().unwrap();
        let late = ProbeResult::failure(ProbeFailure::NoOutput, "");
        assert_eq!(
            db.complete_lease(ids[0], &abandoned, &late, &settings, later + 1).unwrap(),
            CompleteOutcome::TokenMismatch
        );
        assert_eq!(db.get_check_lease(ids[0]).unwrap().unwrap(), lease);
    }

    #[tokio::test]
    async fn test_sweep_reconnects_after_datastore_failure() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("feeds.db")).unwrap();
        let (f, ids) = setup_with(db, ScriptedProbe::default(), 2);

        break_connection(&f.database).await;
        let report = f.scheduler.trigger_sweep().await.unwrap();
        assert!(!report.aborted);
        assert_eq!(report.due, 2);
        assert_eq!(report.checked, 2);

        let db = f.database.lock().await;
        for id in ids {
            assert!(!db.get_check_lease(id).unwrap().unwrap().is_locked());
        }
    }

    #[tokio::test]
    async fn test_sweep_fails_when_reconnect_impossible() {
        let (f, _) = setup(ScriptedProbe::default(), 1);

        break_connection(&f.database).await;
        let err = f.scheduler.trigger_sweep().await.unwrap_err();
        assert!(matches!(err, CheckError::Database(DatabaseError::PathError(_))));
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completion_reconnects_after_datastore_failure() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("feeds.db")).unwrap();
        let (f, ids) = setup_with(db, ScriptedProbe::default(), 1);

        let (token, settings) = {
            let mut db = f.database.lock().await;
            let token = match db.acquire_lease(ids[0], START).unwrap() {
                LeaseAcquire::Acquired(token) => token,
                other => panic!("unexpected {:?}", other),
            };
            (token, db.get_check_settings().unwrap())
        };
        // The connection dies while the probe is running
        break_connection(&f.database).await;

        let job = CheckJob {
            database: f.database.clone(),
            prober: f.probe.clone(),
            active_checks: Arc::new(AtomicUsize::new(0)),
            clock: Arc::new(|| START + 30),
            settings,
        };
        let ((result, at), outcome) = job.run(ids[0], "http://cdn/0/live.m3u8", token).await.unwrap();
        assert!(result.is_ok());
        assert_eq!(at, START + 30);
        match outcome {
            CompleteOutcome::Completed(done) => assert!(done.ok),
            other => panic!("unexpected {:?}", other),
        }

        let db = f.database.lock().await;
        let lease = db.get_check_lease(ids[0]).unwrap().unwrap();
        assert!(!lease.is_locked());
        assert_eq!(lease.next_run_at, START + 30 + 6 * 3600);
        assert_eq!(db.get_check_history(ids[0], 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_settings_are_rejected_and_sweep_continues() {
        let (f, ids) = setup(ScriptedProbe::default(), 1);
        {
            let db = f.database.lock().await;
            for bad in [
                CheckSettings { lock_minutes: 1 << 58, ..CheckSettings::default() },
                CheckSettings { ok_recheck_hours: 1 << 52, ..CheckSettings::default() },
                CheckSettings { max_concurrent_checks: usize::MAX, ..CheckSettings::default() },
            ] {
                assert!(matches!(
                    db.update_check_settings(&bad),
                    Err(DatabaseError::InvalidSettings(_))
                ));
            }
        }

        let report = f.scheduler.trigger_sweep().await.unwrap();
        assert_eq!(report.checked, 1);
        let result = f.scheduler.run_manual_check(ids[0]).await.unwrap();
        assert!(result.ok);
    }

    #[tokio::test]
    async fn test_manual_check_result() {
        let probe = ScriptedProbe::with_script(vec![
            ProbeResult::failure(ProbeFailure::Timeout(12), ""),
            ProbeResult::success(ProbeMetrics::video("hevc", 1280, 720, 25.0), "{}"),
        ]);
        let (f, ids) = setup(probe, 1);

        let failed = f.scheduler.run_manual_check(ids[0]).await.unwrap();
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("Probe timed out after 12s"));
        assert_eq!(failed.reliability, 0.0);
        assert_eq!(failed.timestamp, START);

        f.clock.store(START + 60, Ordering::SeqCst);
        let ok = f.scheduler.run_manual_check(ids[0]).await.unwrap();
        assert!(ok.ok);
        assert_eq!(ok.codec.as_deref(), Some("hevc"));
        assert_eq!(ok.height, Some(720));
        assert_eq!(ok.reliability, 50.0);
        assert_eq!(ok.quality, 50_206.0);
        assert!(ok.error.is_none());

        let lease = f.database.lock().await.get_check_lease(ids[0]).unwrap().unwrap();
        assert_eq!(lease.attempts, 0);
    }

    #[tokio::test]
    async fn test_manual_check_conflict_and_missing_feed() {
        let (f, ids) = setup(ScriptedProbe::default(), 1);
        {
            let mut db = f.database.lock().await;
            db.acquire_lease(ids[0], START).unwrap();
        }

        let err = f.scheduler.run_manual_check(ids[0]).await.unwrap_err();
        assert!(matches!(err, CheckError::AlreadyChecking));
        assert_eq!(err.to_string(), "Feed is already being checked");
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 0);

        assert!(matches!(
            f.scheduler.run_manual_check(9999).await,
            Err(CheckError::FeedNotFound(9999))
        ));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (f, _) = setup(ScriptedProbe::default(), 0);
        assert_eq!(f.scheduler.state().await, SchedulerState::Running);

        f.scheduler.pause().await;
        assert_eq!(f.scheduler.state().await, SchedulerState::Paused);
        f.scheduler.resume().await;
        assert_eq!(f.scheduler.state().await, SchedulerState::Running);

        f.scheduler.stop().await;
        f.scheduler.resume().await;
        assert_eq!(f.scheduler.state().await, SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_stopped_loop_exits() {
        let (f, _) = setup(ScriptedProbe::default(), 0);
        let scheduler = Arc::new(f.scheduler);
        scheduler.stop().await;

        let handle = scheduler.clone().start();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should exit")
            .unwrap();
    }
}
