//! WatermarkStore — sync resumption points, one row per (seller, marketplace, channel).
//!
//! The cursor advances only after a batch is durably written and moves
//! monotonically forward; failures bump `consecutive_errors` without
//! touching the cursor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::db::Database;
use crate::error::StoreError;
use crate::model::PairKey;

/// Persisted sync watermark for one pair.
#[derive(Debug, Clone)]
pub struct SyncWatermark {
    pub pair: PairKey,
    /// Opaque resumption token (connector-defined).
    pub cursor: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

/// Watermark persistence backed by SQLite.
pub struct WatermarkStore {
    db: Arc<Database>,
}

impl WatermarkStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Load the watermark for a pair, creating a fresh one if absent.
    pub fn get_or_create(&self, pair: &PairKey) -> Result<SyncWatermark, StoreError> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT OR IGNORE INTO sync_watermarks (seller_id, marketplace, channel)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![pair.seller_id, pair.marketplace, pair.channel.as_str()],
        )?;

        let (cursor, last_synced, errors): (Option<String>, Option<String>, i64) = conn.query_row(
            "SELECT cursor, last_synced_at, consecutive_errors FROM sync_watermarks
             WHERE seller_id = ?1 AND marketplace = ?2 AND channel = ?3",
            rusqlite::params![pair.seller_id, pair.marketplace, pair.channel.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(SyncWatermark {
            pair: pair.clone(),
            cursor,
            last_synced_at: last_synced.as_deref().and_then(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
            consecutive_errors: errors.max(0) as u32,
        })
    }

    /// Advance the cursor after a durable batch write.
    ///
    /// A `None` cursor, the terminal page of an offset-paginated feed,
    /// never clears an already-persisted one: the cursor moves forward or
    /// stays put.
    pub fn advance(&self, pair: &PairKey, cursor: Option<&str>) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE sync_watermarks SET cursor = COALESCE(?1, cursor)
             WHERE seller_id = ?2 AND marketplace = ?3 AND channel = ?4",
            rusqlite::params![cursor, pair.seller_id, pair.marketplace, pair.channel.as_str()],
        )?;
        debug!(pair = %pair, cursor = ?cursor, "Watermark advanced");
        Ok(())
    }

    /// Record a successful tick: reset the error streak.
    pub fn record_success(&self, pair: &PairKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE sync_watermarks SET last_synced_at = ?1, consecutive_errors = 0
             WHERE seller_id = ?2 AND marketplace = ?3 AND channel = ?4",
            rusqlite::params![
                at.to_rfc3339(),
                pair.seller_id,
                pair.marketplace,
                pair.channel.as_str()
            ],
        )?;
        Ok(())
    }

    /// Record a failed tick. Returns the new consecutive error count.
    pub fn record_failure(&self, pair: &PairKey) -> Result<u32, StoreError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE sync_watermarks SET consecutive_errors = consecutive_errors + 1
             WHERE seller_id = ?1 AND marketplace = ?2 AND channel = ?3",
            rusqlite::params![pair.seller_id, pair.marketplace, pair.channel.as_str()],
        )?;
        let errors: i64 = conn.query_row(
            "SELECT consecutive_errors FROM sync_watermarks
             WHERE seller_id = ?1 AND marketplace = ?2 AND channel = ?3",
            rusqlite::params![pair.seller_id, pair.marketplace, pair.channel.as_str()],
            |row| row.get(0),
        )?;
        Ok(errors.max(0) as u32)
    }

    /// All watermarks, for sync-health reporting.
    pub fn all(&self) -> Result<Vec<SyncWatermark>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT seller_id, marketplace, channel, cursor, last_synced_at, consecutive_errors
             FROM sync_watermarks",
        )?;
        let rows = stmt.query_map([], |row| {
            let seller: String = row.get(0)?;
            let marketplace: String = row.get(1)?;
            let channel: String = row.get(2)?;
            let cursor: Option<String> = row.get(3)?;
            let last: Option<String> = row.get(4)?;
            let errors: i64 = row.get(5)?;
            Ok((seller, marketplace, channel, cursor, last, errors))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seller, marketplace, channel, cursor, last, errors) = row?;
            let Some(channel) = crate::model::Channel::parse(&channel) else {
                continue;
            };
            out.push(SyncWatermark {
                pair: PairKey::new(seller, marketplace, channel),
                cursor,
                last_synced_at: last.as_deref().and_then(|s| {
                    DateTime::parse_from_rfc3339(s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok()
                }),
                consecutive_errors: errors.max(0) as u32,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Channel;

    fn test_store() -> WatermarkStore {
        WatermarkStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn pair() -> PairKey {
        PairKey::new("seller-1", "amazon", Channel::Review)
    }

    #[test]
    fn fresh_watermark_is_empty() {
        let store = test_store();
        let wm = store.get_or_create(&pair()).unwrap();
        assert!(wm.cursor.is_none());
        assert!(wm.last_synced_at.is_none());
        assert_eq!(wm.consecutive_errors, 0);
    }

    #[test]
    fn advance_and_reload() {
        let store = test_store();
        let p = pair();
        store.get_or_create(&p).unwrap();
        store.advance(&p, Some("page-2")).unwrap();

        let wm = store.get_or_create(&p).unwrap();
        assert_eq!(wm.cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn terminal_none_does_not_clear_cursor() {
        let store = test_store();
        let p = pair();
        store.get_or_create(&p).unwrap();
        store.advance(&p, Some("c1")).unwrap();

        store.advance(&p, None).unwrap();
        let wm = store.get_or_create(&p).unwrap();
        assert_eq!(wm.cursor.as_deref(), Some("c1"));
    }

    #[test]
    fn failure_streak_and_reset() {
        let store = test_store();
        let p = pair();
        store.get_or_create(&p).unwrap();

        assert_eq!(store.record_failure(&p).unwrap(), 1);
        assert_eq!(store.record_failure(&p).unwrap(), 2);

        store.record_success(&p, Utc::now()).unwrap();
        let wm = store.get_or_create(&p).unwrap();
        assert_eq!(wm.consecutive_errors, 0);
        assert!(wm.last_synced_at.is_some());
    }

    #[test]
    fn pairs_are_independent() {
        let store = test_store();
        let a = pair();
        let b = PairKey::new("seller-1", "amazon", Channel::Chat);
        store.get_or_create(&a).unwrap();
        store.get_or_create(&b).unwrap();

        store.advance(&a, Some("cursor-a")).unwrap();
        let wm_b = store.get_or_create(&b).unwrap();
        assert!(wm_b.cursor.is_none());
    }
}
