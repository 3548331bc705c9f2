//! InteractionStore — the single normalized table holding all channels.
//!
//! All writes are idempotent upserts keyed by the
//! `(seller_id, marketplace, channel, external_id)` uniqueness invariant,
//! which makes concurrent sync units safe by construction: no unit ever
//! writes another unit's rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::db::Database;
use crate::error::StoreError;
use crate::model::{Channel, Interaction, InteractionStatus, PairKey, Priority, Source};

/// Outcome of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New row inserted.
    Inserted,
    /// Existing row had different content; updated in place.
    Updated,
    /// Content identical to the stored row; no-op.
    Unchanged,
}

const SELECT_COLS: &str = "id, seller_id, marketplace, channel, external_id, text, rating,
    attachments, customer_id, customer_name, order_id, product_id, status, needs_response,
    priority, sla_deadline, escalated_at, source, occurred_at, created_at, updated_at, extension";

/// Persistent interaction storage backed by SQLite.
pub struct InteractionStore {
    db: Arc<Database>,
}

impl InteractionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Idempotent upsert by the uniqueness invariant.
    ///
    /// Re-ingesting an unchanged upstream item is a no-op; changed content
    /// is updated in place. Workflow fields owned by this system (priority,
    /// deadline, escalation stamp) are preserved on update — only the
    /// escalation sweep may raise priority after creation. Status never
    /// moves backward: a locally-responded row is not reopened by a stale
    /// upstream page.
    pub fn upsert(&self, candidate: &Interaction) -> Result<UpsertOutcome, StoreError> {
        let conn = self.db.conn();
        let new_hash = candidate.content_hash();

        let existing: Option<(String, String, String, i64)> = conn
            .query_row(
                "SELECT id, content_hash, status, needs_response FROM interactions
                 WHERE seller_id = ?1 AND marketplace = ?2 AND channel = ?3 AND external_id = ?4",
                rusqlite::params![
                    candidate.seller_id,
                    candidate.marketplace,
                    candidate.channel.as_str(),
                    candidate.external_id,
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::from(other)),
            })?;

        let now = Utc::now().to_rfc3339();

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO interactions (id, seller_id, marketplace, channel, external_id,
                        text, rating, attachments, customer_id, customer_name, order_id,
                        product_id, status, needs_response, priority, sla_deadline, escalated_at,
                        source, content_hash, occurred_at, created_at, updated_at, extension)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                        ?16, ?17, ?18, ?19, ?20, ?21, ?21, ?22)",
                    rusqlite::params![
                        candidate.id,
                        candidate.seller_id,
                        candidate.marketplace,
                        candidate.channel.as_str(),
                        candidate.external_id,
                        candidate.text,
                        candidate.rating,
                        serde_json::to_string(&candidate.attachments)?,
                        candidate.customer_id,
                        candidate.customer_name,
                        candidate.order_id,
                        candidate.product_id,
                        candidate.status.as_str(),
                        candidate.needs_response as i64,
                        candidate.priority.as_str(),
                        candidate.sla_deadline.map(|d| d.to_rfc3339()),
                        candidate.escalated_at.map(|d| d.to_rfc3339()),
                        candidate.source.as_str(),
                        new_hash,
                        candidate.occurred_at.to_rfc3339(),
                        now,
                        serde_json::to_string(&candidate.extension)?,
                    ],
                )?;
                debug!(id = %candidate.id, external_id = %candidate.external_id, "Interaction inserted");
                Ok(UpsertOutcome::Inserted)
            }
            Some((id, stored_hash, _, _)) if stored_hash == new_hash => {
                debug!(id = %id, "Interaction unchanged, skipping");
                Ok(UpsertOutcome::Unchanged)
            }
            Some((id, _, stored_status, stored_needs)) => {
                // Status only moves forward; needs_response only clears.
                let status = if stored_status != InteractionStatus::Open.as_str() {
                    stored_status
                } else {
                    candidate.status.as_str().to_string()
                };
                let needs_response = (stored_needs != 0) && candidate.needs_response;

                conn.execute(
                    "UPDATE interactions SET text = ?1, rating = ?2, attachments = ?3,
                        customer_id = ?4, customer_name = ?5, order_id = ?6, product_id = ?7,
                        status = ?8, needs_response = ?9, content_hash = ?10, updated_at = ?11
                     WHERE id = ?12",
                    rusqlite::params![
                        candidate.text,
                        candidate.rating,
                        serde_json::to_string(&candidate.attachments)?,
                        candidate.customer_id,
                        candidate.customer_name,
                        candidate.order_id,
                        candidate.product_id,
                        status,
                        needs_response as i64,
                        new_hash,
                        now,
                        id,
                    ],
                )?;
                debug!(id = %id, "Interaction content updated in place");
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    /// Fetch by internal id.
    pub fn get(&self, id: &str) -> Result<Option<Interaction>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM interactions WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(rusqlite::params![id], row_to_interaction)?;
        match rows.next() {
            Some(Ok(i)) => Ok(Some(i)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Fetch by the uniqueness key.
    pub fn get_by_external(
        &self,
        pair: &PairKey,
        external_id: &str,
    ) -> Result<Option<Interaction>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM interactions
             WHERE seller_id = ?1 AND marketplace = ?2 AND channel = ?3 AND external_id = ?4"
        ))?;
        let mut rows = stmt.query_map(
            rusqlite::params![pair.seller_id, pair.marketplace, pair.channel.as_str(), external_id],
            row_to_interaction,
        )?;
        match rows.next() {
            Some(Ok(i)) => Ok(Some(i)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Mark an interaction responded (send path or approved manual reply).
    pub fn mark_responded(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE interactions SET status = 'responded', needs_response = 0, updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                entity: "interaction".into(),
                id: id.into(),
            });
        }
        Ok(())
    }

    /// Close an interaction. Closure is a status transition — rows are
    /// never physically deleted by the engine.
    pub fn close(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE interactions SET status = 'closed', needs_response = 0, updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        Ok(())
    }

    /// Promote priority and stamp the escalation. Used only by the sweep.
    pub fn mark_escalated(
        &self,
        id: &str,
        new_priority: Priority,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE interactions SET priority = ?1, escalated_at = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![
                new_priority.as_str(),
                at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                id,
            ],
        )?;
        Ok(())
    }

    /// Open, unresponded interactions whose deadline has passed and which
    /// have not yet been escalated for the current breach.
    ///
    /// `escalated_at > sla_deadline` means the breach was already handled:
    /// the deadline is immutable after assignment, so one stamp per breach.
    pub fn overdue_unescalated(&self, now: DateTime<Utc>) -> Result<Vec<Interaction>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM interactions
             WHERE status = 'open' AND needs_response = 1
               AND sla_deadline IS NOT NULL AND sla_deadline < ?1
               AND (escalated_at IS NULL OR escalated_at < sla_deadline)
             ORDER BY sla_deadline ASC"
        ))?;
        let rows = stmt.query_map(rusqlite::params![now.to_rfc3339()], row_to_interaction)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Other interactions of the same seller sharing an exact order id.
    pub fn find_by_order(
        &self,
        seller_id: &str,
        order_id: &str,
        exclude_id: &str,
    ) -> Result<Vec<Interaction>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM interactions
             WHERE seller_id = ?1 AND order_id = ?2 AND id != ?3"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![seller_id, order_id, exclude_id],
            row_to_interaction,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Other interactions of the same seller sharing an exact customer id.
    pub fn find_by_customer(
        &self,
        seller_id: &str,
        customer_id: &str,
        exclude_id: &str,
    ) -> Result<Vec<Interaction>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM interactions
             WHERE seller_id = ?1 AND customer_id = ?2 AND id != ?3"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![seller_id, customer_id, exclude_id],
            row_to_interaction,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Interactions of the same seller carrying a product id, within a
    /// time window around `occurred_at`.
    pub fn find_with_product(
        &self,
        seller_id: &str,
        exclude_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Interaction>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM interactions
             WHERE seller_id = ?1 AND id != ?2 AND product_id IS NOT NULL
               AND occurred_at >= ?3 AND occurred_at <= ?4"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![seller_id, exclude_id, from.to_rfc3339(), to.to_rfc3339()],
            row_to_interaction,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Recent interactions of the same seller for probabilistic matching.
    pub fn recent_for_seller(
        &self,
        seller_id: &str,
        exclude_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Interaction>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM interactions
             WHERE seller_id = ?1 AND id != ?2
               AND occurred_at >= ?3 AND occurred_at <= ?4
             ORDER BY occurred_at DESC"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![seller_id, exclude_id, from.to_rfc3339(), to.to_rfc3339()],
            row_to_interaction,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Replace the extension bag (display/context metadata only).
    pub fn set_extension(&self, id: &str, extension: &serde_json::Value) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE interactions SET extension = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![
                serde_json::to_string(extension)?,
                Utc::now().to_rfc3339(),
                id,
            ],
        )?;
        Ok(())
    }

    /// All open interactions needing a response, most urgent first.
    pub fn open_queue(&self, limit: usize) -> Result<Vec<Interaction>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM interactions
             WHERE status = 'open' AND needs_response = 1
             ORDER BY CASE priority
                 WHEN 'urgent' THEN 0 WHEN 'high' THEN 1
                 WHEN 'normal' THEN 2 ELSE 3 END,
               occurred_at ASC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_interaction)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

fn row_to_interaction(row: &rusqlite::Row<'_>) -> Result<Interaction, rusqlite::Error> {
    let channel_str: String = row.get(3)?;
    let attachments_str: String = row.get(7)?;
    let status_str: String = row.get(12)?;
    let needs_response: i64 = row.get(13)?;
    let priority_str: String = row.get(14)?;
    let deadline_str: Option<String> = row.get(15)?;
    let escalated_str: Option<String> = row.get(16)?;
    let source_str: String = row.get(17)?;
    let occurred_str: String = row.get(18)?;
    let created_str: String = row.get(19)?;
    let updated_str: String = row.get(20)?;
    let extension_str: String = row.get(21)?;

    Ok(Interaction {
        id: row.get(0)?,
        seller_id: row.get(1)?,
        marketplace: row.get(2)?,
        channel: Channel::parse(&channel_str).unwrap_or(Channel::Chat),
        external_id: row.get(4)?,
        text: row.get(5)?,
        rating: row.get(6)?,
        attachments: serde_json::from_str(&attachments_str).unwrap_or_default(),
        customer_id: row.get(8)?,
        customer_name: row.get(9)?,
        order_id: row.get(10)?,
        product_id: row.get(11)?,
        status: InteractionStatus::parse(&status_str).unwrap_or(InteractionStatus::Open),
        needs_response: needs_response != 0,
        priority: Priority::parse(&priority_str).unwrap_or(Priority::Normal),
        sla_deadline: deadline_str.as_deref().map(parse_datetime),
        escalated_at: escalated_str.as_deref().map(parse_datetime),
        source: Source::parse(&source_str).unwrap_or(Source::PrimaryApi),
        occurred_at: parse_datetime(&occurred_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        extension: serde_json::from_str(&extension_str).unwrap_or(serde_json::Value::Null),
    })
}

// ── Tests ───────────────────────────────────────────────────────────
