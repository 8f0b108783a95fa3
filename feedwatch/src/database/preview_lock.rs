//! Preview lock storage.
//!
//! The `preview_lock` table holds at most one row. Acquisition always
//! replaces whatever row exists: the newest viewer wins.

use feedwatch_protocol::PreviewLockInfo;
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError, Result};

/// Transactional storage of the singleton preview lock.
pub trait LockStore {
    /// Replace any existing lock with one held by `owner` on `feed_id`.
    fn acquire_preview_lock(&mut self, owner: &str, feed_id: i64, now: i64) -> Result<PreviewLockInfo>;

    /// Refresh the heartbeat of `owner`'s lock. Returns false if `owner` holds no lock.
    fn heartbeat_preview_lock(&mut self, owner: &str, now: i64) -> Result<bool>;

    /// Delete `owner`'s lock. Returns false if there was nothing to delete.
    fn release_preview_lock(&mut self, owner: &str) -> Result<bool>;

    /// The stored lock row regardless of heartbeat age.
    fn get_preview_lock(&self) -> Result<Option<PreviewLockInfo>>;
}

impl LockStore for Database {
    fn acquire_preview_lock(&mut self, owner: &str, feed_id: i64, now: i64) -> Result<PreviewLockInfo> {
        let tx = self.immediate()?;

        let channel_name: Option<Option<String>> = tx
            .query_row(
                "SELECT channel_name FROM feeds WHERE id = ?1",
                [feed_id],
                |row| row.get(0),
            )
            .optional()?;
        let channel_name = channel_name.ok_or(DatabaseError::FeedNotFound(feed_id))?;

        let previous: Option<String> = tx
            .query_row("SELECT locked_by FROM preview_lock WHERE id = 1", [], |row| row.get(0))
            .optional()?;

        tx.execute("DELETE FROM preview_lock", [])?;
        tx.execute(
            "INSERT INTO preview_lock (id, locked_by, feed_id, channel_name, locked_at, last_heartbeat)
             VALUES (1, ?1, ?2, ?3, ?4, ?4)",
            params![owner, feed_id, channel_name, now],
        )?;
        tx.commit()?;

        if let Some(previous) = previous.filter(|p| p != owner) {
            log::info!("Database: preview lock taken over from {} by {}", previous, owner);
        }

        Ok(PreviewLockInfo {
            locked_by: owner.to_string(),
            feed_id,
            channel_name,
            locked_at: now,
            last_heartbeat: now,
        })
    }

    fn heartbeat_preview_lock(&mut self, owner: &str, now: i64) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE preview_lock SET last_heartbeat = ?2 WHERE locked_by = ?1",
            params![owner, now],
        )?;
        Ok(updated > 0)
    }

    fn release_preview_lock(&mut self, owner: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM preview_lock WHERE locked_by = ?1", [owner])?;
        Ok(deleted > 0)
    }

    fn get_preview_lock(&self) -> Result<Option<PreviewLockInfo>> {
        let lock = self
            .conn
            .query_row(
                "SELECT locked_by, feed_id, channel_name, locked_at, last_heartbeat FROM preview_lock WHERE id = 1",
                [],
                |row| {
                    Ok(PreviewLockInfo {
                        locked_by: row.get(0)?,
                        feed_id: row.get(1)?,
                        channel_name: row.get(2)?,
                        locked_at: row.get(3)?,
                        last_heartbeat: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewFeed;

    fn setup() -> (Database, i64) {
        let mut db = Database::open_in_memory().unwrap();
        let id = db
            .insert_feed(&NewFeed::new("http://a/live", "news").with_name("News 24"), 0)
            .unwrap();
        (db, id)
    }

    #[test]
    fn test_acquire_replaces_existing_row() {
        let (mut db, id) = setup();

        db.acquire_preview_lock("alice", id, 100).unwrap();
        let info = db.acquire_preview_lock("bob", id, 105).unwrap();
        assert_eq!(info.channel_name.as_deref(), Some("News 24"));

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM preview_lock", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let stored = db.get_preview_lock().unwrap().unwrap();
        assert_eq!(stored.locked_by, "bob");
        assert_eq!(stored.locked_at, 105);

        assert!(!db.heartbeat_preview_lock("alice", 110).unwrap());
        assert!(db.heartbeat_preview_lock("bob", 110).unwrap());
        assert_eq!(db.get_preview_lock().unwrap().unwrap().last_heartbeat, 110);
    }

    #[test]
    fn test_acquire_unknown_feed() {
        let (mut db, _) = setup();
        assert!(matches!(
            db.acquire_preview_lock("alice", 42, 0),
            Err(DatabaseError::FeedNotFound(42))
        ));
        assert!(db.get_preview_lock().unwrap().is_none());
    }

    #[test]
    fn test_release_is_idempotent_and_owner_scoped() {
        let (mut db, id) = setup();
        db.acquire_preview_lock("alice", id, 0).unwrap();

        assert!(!db.release_preview_lock("mallory").unwrap());
        assert!(db.get_preview_lock().unwrap().is_some());

        assert!(db.release_preview_lock("alice").unwrap());
        assert!(!db.release_preview_lock("alice").unwrap());
        assert!(db.get_preview_lock().unwrap().is_none());
    }
}
