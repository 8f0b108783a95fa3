//! Database schema definitions.

/// SQL schema for the feed health database.
pub const SCHEMA_SQL: &str = r#"
-- Monitored stream endpoints
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,                     -- Full stream URL (may carry credentials)
    url_hash TEXT UNIQUE NOT NULL,         -- SHA-256 of url, hex encoded
    url_display TEXT NOT NULL,             -- Masked URL safe to show in the UI
    -- Logical channel identity (duplicates share the same key)
    channel_key TEXT NOT NULL,
    channel_name TEXT,
    -- Last observed snapshot
    last_ok INTEGER,
    last_codec TEXT,
    last_width INTEGER,
    last_height INTEGER,
    last_fps REAL,
    last_error TEXT,
    last_checked_at INTEGER,
    -- Scores (recomputed on every completed check)
    reliability_score REAL NOT NULL DEFAULT 0.0 CHECK (reliability_score >= 0.0 AND reliability_score <= 100.0),
    quality_score REAL NOT NULL DEFAULT 0.0,
    display_score REAL NOT NULL DEFAULT 0.0,
    -- Metadata
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Check work queue, exactly one row per feed
CREATE TABLE IF NOT EXISTS check_lease (
    feed_id INTEGER PRIMARY KEY,
    next_run_at INTEGER NOT NULL,
    locked_at INTEGER,
    lock_token TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,   -- Consecutive failures
    last_result_ok INTEGER,
    last_error TEXT,
    CHECK ((locked_at IS NULL) = (lock_token IS NULL)),
    FOREIGN KEY(feed_id) REFERENCES feeds(id) ON DELETE CASCADE
);

-- Append-only check history
CREATE TABLE IF NOT EXISTS check_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL,
    checked_at INTEGER NOT NULL,
    ok INTEGER NOT NULL,
    codec TEXT,
    width INTEGER,
    height INTEGER,
    fps REAL,
    error TEXT,
    raw TEXT,
    FOREIGN KEY(feed_id) REFERENCES feeds(id) ON DELETE CASCADE
);

-- Preview lock (only one row allowed)
CREATE TABLE IF NOT EXISTS preview_lock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    locked_by TEXT NOT NULL,
    feed_id INTEGER NOT NULL,
    channel_name TEXT,
    locked_at INTEGER NOT NULL,
    last_heartbeat INTEGER NOT NULL
);

-- Check scheduler settings (only one row allowed)
CREATE TABLE IF NOT EXISTS check_settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    lock_minutes INTEGER DEFAULT 15,
    ok_recheck_hours INTEGER DEFAULT 6,
    fail_retry_min INTEGER DEFAULT 30,
    fail_retry_max INTEGER DEFAULT 360,
    probe_timeout_secs INTEGER DEFAULT 12,
    sweep_interval_secs INTEGER DEFAULT 60,
    max_concurrent_checks INTEGER DEFAULT 4,
    sweep_batch_size INTEGER DEFAULT 32,
    reliability_window_hours INTEGER DEFAULT 168,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Indexes for efficient queries
CREATE INDEX IF NOT EXISTS idx_feeds_channel_key ON feeds(channel_key);
CREATE INDEX IF NOT EXISTS idx_check_lease_due ON check_lease(next_run_at, locked_at);
CREATE INDEX IF NOT EXISTS idx_check_history_feed_time ON check_history(feed_id, checked_at);

-- Trigger to update updated_at on feeds
CREATE TRIGGER IF NOT EXISTS feeds_updated_at
AFTER UPDATE ON feeds
BEGIN
    UPDATE feeds SET updated_at = strftime('%s', 'now') WHERE id = NEW.id;
END;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"feeds".to_string()));
        assert!(tables.contains(&"check_lease".to_string()));
        assert!(tables.contains(&"check_history".to_string()));
        assert!(tables.contains(&"preview_lock".to_string()));
        assert!(tables.contains(&"check_settings".to_string()));
    }

    #[test]
    fn test_lease_token_pairing_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        conn.execute(
            "INSERT INTO feeds (url, url_hash, url_display, channel_key) VALUES ('u', 'h', 'd', 'k')",
            [],
        )
        .unwrap();

        let half_locked = conn.execute(
            "INSERT INTO check_lease (feed_id, next_run_at, locked_at) VALUES (1, 0, 100)",
            [],
        );
        assert!(half_locked.is_err());
    }

    #[test]
    fn test_preview_lock_single_row() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();

        let second = conn.execute(
            "INSERT INTO preview_lock (id, locked_by, feed_id, locked_at, last_heartbeat) VALUES (2, 'a', 1, 0, 0)",
            [],
        );
        assert!(second.is_err());
    }
}
