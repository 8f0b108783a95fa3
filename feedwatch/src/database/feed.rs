//! Feed CRUD operations.

use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use super::{Database, DatabaseError, FeedRecord, NewFeed, Result};

/// Columns selected for every [`FeedRecord`] query, in `feed_from_row` order.
pub(super) const FEED_COLUMNS: &str = "id, url, url_hash, url_display, channel_key, channel_name,
     last_ok, last_codec, last_width, last_height, last_fps, last_error, last_checked_at,
     reliability_score, quality_score, display_score, created_at, updated_at";

pub(super) fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<FeedRecord> {
    Ok(FeedRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        url_hash: row.get(2)?,
        url_display: row.get(3)?,
        channel_key: row.get(4)?,
        channel_name: row.get(5)?,
        last_ok: row.get::<_, Option<i32>>(6)?.map(|v| v != 0),
        last_codec: row.get(7)?,
        last_width: row.get(8)?,
        last_height: row.get(9)?,
        last_fps: row.get(10)?,
        last_error: row.get(11)?,
        last_checked_at: row.get(12)?,
        reliability_score: row.get(13)?,
        quality_score: row.get(14)?,
        display_score: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

/// SHA-256 content hash of a feed URL, hex encoded.
pub fn url_hash(url: &str) -> String {
    hex::encode(Sha256::digest(url.trim().as_bytes()))
}

/// Mask a stream URL for display.
///
/// Credentials and query strings are dropped and only the last path segment
/// is kept, so tokens embedded in provider URLs never reach the UI.
pub fn mask_url(url: &str) -> String {
    let url = url.trim();
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => return "***".to_string(),
    };

    let rest = rest.split(['?', '#']).next().unwrap_or("");
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let host = match authority.rsplit_once('@') {
        Some((_, host)) => format!("***@{}", host),
        None => authority.to_string(),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => format!("{}://{}/", scheme, host),
        [only] => format!("{}://{}/{}", scheme, host, only),
        [.., last] => format!("{}://{}/.../{}", scheme, host, last),
    }
}

impl Database {
    /// Insert a new feed together with its check lease row.
    ///
    /// The lease is due immediately. Fails with [`DatabaseError::DuplicateFeed`]
    /// when a feed with the same URL already exists.
    pub fn insert_feed(&mut self, feed: &NewFeed, now: i64) -> Result<i64> {
        let hash = url_hash(&feed.url);
        let tx = self.immediate()?;

        let existing: Option<i64> = tx
            .query_row("SELECT id FROM feeds WHERE url_hash = ?1", [&hash], |row| row.get(0))
            .optional()?;
        if let Some(id) = existing {
            return Err(DatabaseError::DuplicateFeed(id));
        }

        tx.execute(
            "INSERT INTO feeds (url, url_hash, url_display, channel_key, channel_name) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                feed.url.trim(),
                hash,
                mask_url(&feed.url),
                feed.channel_key,
                feed.channel_name
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO check_lease (feed_id, next_run_at) VALUES (?1, ?2)",
            params![id, now],
        )?;
        tx.commit()?;

        log::debug!("Database: inserted feed {} ({})", id, feed.channel_key);
        Ok(id)
    }

    /// Get feed by ID.
    pub fn get_feed(&self, id: i64) -> Result<Option<FeedRecord>> {
        let sql = format!("SELECT {} FROM feeds WHERE id = ?1", FEED_COLUMNS);
        Ok(self.conn.query_row(&sql, [id], feed_from_row).optional()?)
    }

    /// Get all feeds sharing a logical channel identity.
    pub fn get_feeds_by_channel_key(&self, channel_key: &str) -> Result<Vec<FeedRecord>> {
        let sql = format!(
            "SELECT {} FROM feeds WHERE channel_key = ?1 ORDER BY id",
            FEED_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let feeds = stmt
            .query_map([channel_key], feed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    /// Channel identities served by more than one feed.
    pub fn get_duplicate_channel_keys(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT channel_key, COUNT(*) FROM feeds GROUP BY channel_key HAVING COUNT(*) > 1 ORDER BY channel_key",
        )?;
        let keys = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Get all feeds ordered by ID.
    pub fn get_all_feeds(&self) -> Result<Vec<FeedRecord>> {
        let sql = format!("SELECT {} FROM feeds ORDER BY id", FEED_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let feeds = stmt
            .query_map([], feed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    /// Overwrite the stored scores of a feed without touching its snapshot.
    pub fn update_feed_scores(
        &self,
        id: i64,
        reliability: f64,
        quality: f64,
        display: f64,
    ) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE feeds SET reliability_score = ?2, quality_score = ?3, display_score = ?4 WHERE id = ?1",
            params![id, reliability, quality, display],
        )?;
        if affected == 0 {
            return Err(DatabaseError::FeedNotFound(id));
        }
        Ok(())
    }

    /// Delete a feed. Its lease row and history go with it.
    pub fn delete_feed(&self, id: i64) -> Result<bool> {
        let affected = self.conn.execute("DELETE FROM feeds WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }
}
