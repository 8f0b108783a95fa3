//! Preview lock management.
//!
//! Only one viewer may hold the preview player at a time. The lock is
//! preemptible: a new [`PreviewLockManager::acquire`] always succeeds and
//! silently takes over from the previous holder, who learns about it on
//! their next heartbeat. A lock whose heartbeat is older than the staleness
//! window is treated as absent by readers; the row itself is only removed
//! when somebody acquires or releases.

use std::sync::Arc;
use std::time::Duration;

use feedwatch_protocol::{PreviewLockInfo, StreamInfo};
use log::{debug, info};
use thiserror::Error;

use crate::database::{DatabaseError, DatabaseHandle, LockStore};

/// Default age after which a lock without heartbeats is considered stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

/// Default prefix of the stream proxy route handed to the player.
pub const DEFAULT_PROXY_BASE: &str = "/proxy/stream";

/// Preview lock errors.
#[derive(Debug, Error)]
pub enum PreviewError {
    /// Caller does not hold the lock (never had it, released, or preempted).
    #[error("lock lost")]
    NotHeld,

    #[error("Feed not found: {0}")]
    FeedNotFound(i64),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for PreviewError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::FeedNotFound(id) => PreviewError::FeedNotFound(id),
            other => PreviewError::Database(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PreviewError>;

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Singleton preview lock with heartbeat-based expiry.
pub struct PreviewLockManager {
    database: DatabaseHandle,
    stale_after: Duration,
    proxy_base: String,
    clock: Clock,
}

impl PreviewLockManager {
    /// Create a manager with the default staleness window and proxy route.
    pub fn new(database: DatabaseHandle) -> Self {
        Self {
            database,
            stale_after: DEFAULT_STALE_AFTER,
            proxy_base: DEFAULT_PROXY_BASE.to_string(),
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_proxy_base(mut self, proxy_base: &str) -> Self {
        self.proxy_base = proxy_base.trim_end_matches('/').to_string();
        self
    }

    /// Replace the wall clock (tests drive time explicitly).
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn is_fresh(&self, lock: &PreviewLockInfo, now: i64) -> bool {
        now - lock.last_heartbeat < self.stale_after.as_secs() as i64
    }

    /// Take the preview lock for `owner` on `feed_id`, preempting any holder.
    pub async fn acquire(&self, owner: &str, feed_id: i64) -> Result<PreviewLockInfo> {
        let now = self.now();
        let mut db = self.database.lock().await;
        let info = db.acquire_preview_lock(owner, feed_id, now)?;
        info!("PreviewLock: {} acquired lock on feed {}", owner, feed_id);
        Ok(info)
    }

    /// Refresh `owner`'s heartbeat; [`PreviewError::NotHeld`] once it was taken over.
    pub async fn heartbeat(&self, owner: &str) -> Result<()> {
        let now = self.now();
        let mut db = self.database.lock().await;
        if db.heartbeat_preview_lock(owner, now)? {
            Ok(())
        } else {
            debug!("PreviewLock: heartbeat from {} without lock", owner);
            Err(PreviewError::NotHeld)
        }
    }

    /// Release `owner`'s lock. Returns whether a lock was removed.
    pub async fn release(&self, owner: &str) -> Result<bool> {
        let mut db = self.database.lock().await;
        let released = db.release_preview_lock(owner)?;
        if released {
            info!("PreviewLock: {} released lock", owner);
        }
        Ok(released)
    }

    /// The current lock, if its heartbeat is within the staleness window.
    pub async fn is_active(&self) -> Result<Option<PreviewLockInfo>> {
        let now = self.now();
        let db = self.database.lock().await;
        Ok(db.get_preview_lock()?.filter(|lock| self.is_fresh(lock, now)))
    }

    /// Player metadata for `feed_id`, only while `owner` holds a live lock on it.
    pub async fn stream_info(&self, owner: &str, feed_id: i64) -> Result<StreamInfo> {
        let now = self.now();
        let db = self.database.lock().await;

        match db.get_preview_lock()? {
            Some(lock) if lock.locked_by == owner && lock.feed_id == feed_id && self.is_fresh(&lock, now) => {}
            _ => return Err(PreviewError::NotHeld),
        }

        let feed = db
            .get_feed(feed_id)?
            .ok_or(PreviewError::FeedNotFound(feed_id))?;

        Ok(StreamInfo {
            feed_id: feed.id,
            proxy_url: format!("{}/{}", self.proxy_base, feed.id),
            channel_key: feed.channel_key,
            channel_name: feed.channel_name,
            url_display: feed.url_display,
            last_ok: feed.last_ok,
            width: feed.last_width,
            height: feed.last_height,
            fps: feed.last_fps,
        })
    }
}
