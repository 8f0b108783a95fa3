//! Duplicate feed ranking.
//!
//! Feeds carrying the same `channel_key` are alternatives for one channel.
//! They are ordered by reliability, then pixel area, then frame rate, with
//! the last result, check recency and id as tie breakers so the order is
//! total and stable between calls.

use std::cmp::Ordering;

use serde::Serialize;

use crate::database::{Database, FeedRecord, Result};

/// Feed with its position in a duplicate group (1 = best).
#[derive(Debug, Clone, Serialize)]
pub struct RankedFeed {
    pub rank: usize,
    #[serde(flatten)]
    pub feed: FeedRecord,
}

/// Channel identity served by more than one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub channel_key: String,
    pub feed_count: i64,
}

/// Duplicate feed ranker.
pub struct DuplicateRanker;

impl DuplicateRanker {
    /// All feeds of a channel, best first.
    pub fn rank(db: &Database, channel_key: &str) -> Result<Vec<RankedFeed>> {
        let mut feeds = db.get_feeds_by_channel_key(channel_key)?;
        feeds.sort_by(Self::compare);

        Ok(feeds
            .into_iter()
            .enumerate()
            .map(|(i, feed)| RankedFeed { rank: i + 1, feed })
            .collect())
    }

    /// The best feed of a channel, if it has any.
    pub fn best(db: &Database, channel_key: &str) -> Result<Option<RankedFeed>> {
        Ok(Self::rank(db, channel_key)?.into_iter().next())
    }

    /// Channel identities with more than one feed.
    pub fn channel_keys(db: &Database) -> Result<Vec<DuplicateGroup>> {
        Ok(db
            .get_duplicate_channel_keys()?
            .into_iter()
            .map(|(channel_key, feed_count)| DuplicateGroup {
                channel_key,
                feed_count,
            })
            .collect())
    }

    /// Ordering used by [`rank`](Self::rank); `Less` means `a` ranks higher.
    pub fn compare(a: &FeedRecord, b: &FeedRecord) -> Ordering {
        b.reliability_score
            .total_cmp(&a.reliability_score)
            .then_with(|| b.pixel_area().cmp(&a.pixel_area()))
            .then_with(|| b.last_fps.unwrap_or(-1.0).total_cmp(&a.last_fps.unwrap_or(-1.0)))
            .then_with(|| b.last_ok.cmp(&a.last_ok))
            .then_with(|| b.last_checked_at.cmp(&a.last_checked_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}
