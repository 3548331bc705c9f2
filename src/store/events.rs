//! EventStore — append-only log of pipeline actions.
//!
//! Write-once rows consumed by the metrics reader; nothing in the engine
//! ever mutates or deletes an event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::db::Database;
use crate::error::StoreError;

/// Kind of pipeline action being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DraftGenerated,
    DraftCacheHit,
    ReplySent,
    ReplyManual,
    ValidationBlocked,
    Escalated,
    SyncAlert,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DraftGenerated => "draft_generated",
            EventType::DraftCacheHit => "draft_cache_hit",
            EventType::ReplySent => "reply_sent",
            EventType::ReplyManual => "reply_manual",
            EventType::ValidationBlocked => "validation_blocked",
            EventType::Escalated => "escalated",
            EventType::SyncAlert => "sync_alert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft_generated" => Some(EventType::DraftGenerated),
            "draft_cache_hit" => Some(EventType::DraftCacheHit),
            "reply_sent" => Some(EventType::ReplySent),
            "reply_manual" => Some(EventType::ReplyManual),
            "validation_blocked" => Some(EventType::ValidationBlocked),
            "escalated" => Some(EventType::Escalated),
            "sync_alert" => Some(EventType::SyncAlert),
            _ => None,
        }
    }
}

/// One append-only event row.
#[derive(Debug, Clone)]
pub struct InteractionEvent {
    pub id: String,
    /// None for pair-level events such as sync alerts.
    pub interaction_id: Option<String>,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Append-only event persistence backed by SQLite.
pub struct EventStore {
    db: Arc<Database>,
}

impl EventStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one event. Returns the generated id.
    pub fn append(
        &self,
        interaction_id: Option<&str>,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO interaction_events (id, interaction_id, event_type, payload, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                id,
                interaction_id,
                event_type.as_str(),
                serde_json::to_string(&payload)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!(id = %id, event = event_type.as_str(), "Event appended");
        Ok(id)
    }

    /// Events for one interaction, oldest first.
    pub fn for_interaction(&self, interaction_id: &str) -> Result<Vec<InteractionEvent>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, interaction_id, event_type, payload, occurred_at
             FROM interaction_events WHERE interaction_id = ?1
             ORDER BY occurred_at ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![interaction_id], row_to_event)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Count of events of one type, optionally filtered to a channel via
    /// the owning interaction.
    pub fn count_by_type(
        &self,
        event_type: EventType,
        channel: Option<&str>,
    ) -> Result<u64, StoreError> {
        let conn = self.db.conn();
        let count: i64 = match channel {
            None => conn.query_row(
                "SELECT COUNT(*) FROM interaction_events WHERE event_type = ?1",
                rusqlite::params![event_type.as_str()],
                |row| row.get(0),
            )?,
            Some(ch) => conn.query_row(
                "SELECT COUNT(*) FROM interaction_events e
                 JOIN interactions i ON i.id = e.interaction_id
                 WHERE e.event_type = ?1 AND i.channel = ?2",
                rusqlite::params![event_type.as_str(), ch],
                |row| row.get(0),
            )?,
        };
        Ok(count.max(0) as u64)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<InteractionEvent, rusqlite::Error> {
    let event_type: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let occurred: String = row.get(4)?;
    Ok(InteractionEvent {
        id: row.get(0)?,
        interaction_id: row.get(1)?,
        event_type: EventType::parse(&event_type).unwrap_or(EventType::SyncAlert),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        occurred_at: DateTime::parse_from_rfc3339(&occurred)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC),
    })
}
