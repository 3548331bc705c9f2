//! Read-only operational metrics derived from the store.
//!
//! Nothing here samples or aggregates out of band; every figure is a
//! query over the event log, the interactions table, or the watermarks,
//! so the numbers are always consistent with what an operator sees in
//! the queue.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{Channel, PairKey};
use crate::store::{Database, EventStore, EventType, WatermarkStore};

/// Reply quality counters for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelQuality {
    pub channel: Channel,
    pub drafts_generated: u64,
    pub draft_cache_hits: u64,
    pub replies_sent: u64,
    pub replies_manual: u64,
    pub blocked: u64,
}

impl ChannelQuality {
    /// Share of outbound replies that were approved drafts.
    pub fn automation_rate(&self) -> f64 {
        let total = self.replies_sent + self.replies_manual;
        if total == 0 {
            0.0
        } else {
            self.replies_sent as f64 / total as f64
        }
    }

    /// Share of validated replies the guardrail refused.
    pub fn block_rate(&self) -> f64 {
        let total = self.replies_sent + self.replies_manual + self.blocked;
        if total == 0 {
            0.0
        } else {
            self.blocked as f64 / total as f64
        }
    }
}

/// Overdue-queue size for one (seller, channel).
#[derive(Debug, Clone, Serialize)]
pub struct OverdueCount {
    pub seller_id: String,
    pub channel: Channel,
    pub count: u64,
}

/// Health snapshot of one sync unit.
#[derive(Debug, Clone, Serialize)]
pub struct SyncHealth {
    #[serde(serialize_with = "serialize_pair")]
    pub pair: PairKey,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    /// No successful tick within the staleness window.
    pub stale: bool,
}

fn serialize_pair<S: serde::Serializer>(pair: &PairKey, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(pair)
}

/// Read-only metrics over the engine's store.
pub struct MetricsReader {
    db: Arc<Database>,
    events: EventStore,
    watermarks: WatermarkStore,
}

impl MetricsReader {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            events: EventStore::new(Arc::clone(&db)),
            watermarks: WatermarkStore::new(Arc::clone(&db)),
            db,
        }
    }

    /// Quality counters for one channel.
    pub fn channel_quality(&self, channel: Channel) -> Result<ChannelQuality, StoreError> {
        let ch = Some(channel.as_str());
        Ok(ChannelQuality {
            channel,
            drafts_generated: self.events.count_by_type(EventType::DraftGenerated, ch)?,
            draft_cache_hits: self.events.count_by_type(EventType::DraftCacheHit, ch)?,
            replies_sent: self.events.count_by_type(EventType::ReplySent, ch)?,
            replies_manual: self.events.count_by_type(EventType::ReplyManual, ch)?,
            blocked: self.events.count_by_type(EventType::ValidationBlocked, ch)?,
        })
    }

    /// Open, unresponded interactions past their deadline, grouped by
    /// seller and channel.
    pub fn overdue_counts(&self, now: DateTime<Utc>) -> Result<Vec<OverdueCount>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT seller_id, channel, COUNT(*) FROM interactions
             WHERE status = 'open' AND needs_response = 1
               AND sla_deadline IS NOT NULL AND sla_deadline < ?1
             GROUP BY seller_id, channel
             ORDER BY seller_id, channel",
        )?;
        let rows = stmt.query_map(rusqlite::params![now.to_rfc3339()], |row| {
            let seller: String = row.get(0)?;
            let channel: String = row.get(1)?;
            let count: i64 = row.get(2)?;
            Ok((seller, channel, count))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seller_id, channel, count) = row?;
            let Some(channel) = Channel::parse(&channel) else {
                continue;
            };
            out.push(OverdueCount {
                seller_id,
                channel,
                count: count.max(0) as u64,
            });
        }
        Ok(out)
    }

    /// Per-pair sync health. A pair with no successful tick within
    /// `stale_after` is flagged stale even when its error streak is zero.
    pub fn sync_health(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Vec<SyncHealth>, StoreError> {
        let watermarks = self.watermarks.all()?;
        Ok(watermarks
            .into_iter()
            .map(|wm| {
                let stale = match wm.last_synced_at {
                    Some(at) => now - at > stale_after,
                    None => true,
                };
                SyncHealth {
                    pair: wm.pair,
                    last_synced_at: wm.last_synced_at,
                    consecutive_errors: wm.consecutive_errors,
                    stale,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Interaction, InteractionStatus, Priority, Source};
    use crate::store::InteractionStore;

    fn setup() -> (Arc<Database>, MetricsReader) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let reader = MetricsReader::new(Arc::clone(&db));
        (db, reader)
    }

    fn interaction(channel: Channel, external_id: &str, overdue: bool) -> Interaction {
        let now = Utc::now();
        Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            seller_id: "s1".into(),
            marketplace: "amazon".into(),
            channel,
            external_id: external_id.into(),
            text: "text".into(),
            rating: None,
            attachments: vec![],
            customer_id: None,
            customer_name: None,
            order_id: None,
            product_id: None,
            status: InteractionStatus::Open,
            needs_response: true,
            priority: Priority::Normal,
            sla_deadline: Some(if overdue {
                now - Duration::hours(1)
            } else {
                now + Duration::hours(4)
            }),
            escalated_at: None,
            source: Source::PrimaryApi,
            occurred_at: now,
            created_at: now,
            updated_at: now,
            extension: serde_json::json!({}),
        }
    }

    #[test]
    fn quality_rates_per_channel() {
        let (db, reader) = setup();
        let store = InteractionStore::new(Arc::clone(&db));
        let events = EventStore::new(Arc::clone(&db));

        let review = interaction(Channel::Review, "r-1", false);
        let chat = interaction(Channel::Chat, "c-1", false);
        store.upsert(&review).unwrap();
        store.upsert(&chat).unwrap();

        events.append(Some(&review.id), EventType::ReplySent, serde_json::json!({})).unwrap();
        events.append(Some(&review.id), EventType::ReplyManual, serde_json::json!({})).unwrap();
        events.append(Some(&review.id), EventType::ValidationBlocked, serde_json::json!({})).unwrap();
        events.append(Some(&chat.id), EventType::ReplyManual, serde_json::json!({})).unwrap();

        let q = reader.channel_quality(Channel::Review).unwrap();
        assert_eq!(q.replies_sent, 1);
        assert_eq!(q.replies_manual, 1);
        assert_eq!(q.blocked, 1);
        assert!((q.automation_rate() - 0.5).abs() < 1e-9);
        assert!((q.block_rate() - 1.0 / 3.0).abs() < 1e-9);

        let q = reader.channel_quality(Channel::Chat).unwrap();
        assert_eq!(q.replies_sent, 0);
        assert_eq!(q.automation_rate(), 0.0);
    }

    #[test]
    fn overdue_counts_group_by_seller_and_channel() {
        let (db, reader) = setup();
        let store = InteractionStore::new(db);

        store.upsert(&interaction(Channel::Review, "r-1", true)).unwrap();
        store.upsert(&interaction(Channel::Review, "r-2", true)).unwrap();
        store.upsert(&interaction(Channel::Chat, "c-1", true)).unwrap();
        store.upsert(&interaction(Channel::Chat, "c-2", false)).unwrap();

        let counts = reader.overdue_counts(Utc::now()).unwrap();
        assert_eq!(counts.len(), 2);
        let review = counts.iter().find(|c| c.channel == Channel::Review).unwrap();
        assert_eq!(review.count, 2);
        let chat = counts.iter().find(|c| c.channel == Channel::Chat).unwrap();
        assert_eq!(chat.count, 1);
    }

    #[test]
    fn sync_health_flags_staleness_and_streaks() {
        let (db, reader) = setup();
        let watermarks = WatermarkStore::new(db);

        let fresh = PairKey::new("s1", "amazon", Channel::Review);
        let never = PairKey::new("s1", "amazon", Channel::Chat);
        watermarks.get_or_create(&fresh).unwrap();
        watermarks.get_or_create(&never).unwrap();
        watermarks.record_success(&fresh, Utc::now()).unwrap();
        watermarks.record_failure(&never).unwrap();

        let health = reader.sync_health(Utc::now(), Duration::minutes(30)).unwrap();
        assert_eq!(health.len(), 2);

        let fresh_h = health.iter().find(|h| h.pair == fresh).unwrap();
        assert!(!fresh_h.stale);
        assert_eq!(fresh_h.consecutive_errors, 0);

        let never_h = health.iter().find(|h| h.pair == never).unwrap();
        assert!(never_h.stale);
        assert_eq!(never_h.consecutive_errors, 1);
    }
}
