//! LinkStore — persisted cross-channel link candidates.
//!
//! Candidates are never deleted; a recomputation marks the previous set
//! for the source interaction as superseded and appends the new one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::db::Database;
use crate::error::StoreError;

/// How two interactions were matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMethod {
    OrderId,
    CustomerId,
    ProductTimeWindow,
    NameHeuristic,
    SemanticOverlap,
}

impl LinkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkMethod::OrderId => "order_id",
            LinkMethod::CustomerId => "customer_id",
            LinkMethod::ProductTimeWindow => "product_time_window",
            LinkMethod::NameHeuristic => "name_heuristic",
            LinkMethod::SemanticOverlap => "semantic_overlap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "order_id" => Some(LinkMethod::OrderId),
            "customer_id" => Some(LinkMethod::CustomerId),
            "product_time_window" => Some(LinkMethod::ProductTimeWindow),
            "name_heuristic" => Some(LinkMethod::NameHeuristic),
            "semantic_overlap" => Some(LinkMethod::SemanticOverlap),
            _ => None,
        }
    }

    /// Deterministic methods rest on an exact shared identifier;
    /// heuristic methods never qualify for automated action.
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            LinkMethod::OrderId | LinkMethod::CustomerId | LinkMethod::ProductTimeWindow
        )
    }
}

/// One candidate link between two interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCandidate {
    pub id: String,
    pub source_interaction_id: String,
    pub target_interaction_id: String,
    pub method: LinkMethod,
    pub confidence: f64,
    /// Human-readable reasoning shown in the queue UI.
    pub explanation: String,
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
}

/// Link candidate persistence backed by SQLite.
pub struct LinkStore {
    db: Arc<Database>,
}

impl LinkStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Supersede the current candidate set for a source interaction and
    /// append the new one, in a single transaction.
    pub fn replace_for_source(
        &self,
        source_id: &str,
        candidates: &[LinkCandidate],
    ) -> Result<(), StoreError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction().map_err(StoreError::from)?;

        tx.execute(
            "UPDATE link_candidates SET superseded = 1 WHERE source_interaction_id = ?1",
            rusqlite::params![source_id],
        )?;

        for c in candidates {
            tx.execute(
                "INSERT INTO link_candidates (id, source_interaction_id, target_interaction_id,
                    method, confidence, explanation, superseded, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                rusqlite::params![
                    c.id,
                    c.source_interaction_id,
                    c.target_interaction_id,
                    c.method.as_str(),
                    c.confidence,
                    c.explanation,
                    c.created_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit().map_err(StoreError::from)
    }

    /// Current (non-superseded) candidates for a source interaction,
    /// highest confidence first.
    pub fn current_for_source(&self, source_id: &str) -> Result<Vec<LinkCandidate>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, source_interaction_id, target_interaction_id, method, confidence,
                    explanation, superseded, created_at
             FROM link_candidates
             WHERE source_interaction_id = ?1 AND superseded = 0
             ORDER BY confidence DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![source_id], row_to_link)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn row_to_link(row: &rusqlite::Row<'_>) -> Result<LinkCandidate, rusqlite::Error> {
    let method: String = row.get(3)?;
    let superseded: i64 = row.get(6)?;
    let created: String = row.get(7)?;
    Ok(LinkCandidate {
        id: row.get(0)?,
        source_interaction_id: row.get(1)?,
        target_interaction_id: row.get(2)?,
        method: LinkMethod::parse(&method).unwrap_or(LinkMethod::SemanticOverlap),
        confidence: row.get(4)?,
        explanation: row.get(5)?,
        superseded: superseded != 0,
        created_at: DateTime::parse_from_rfc3339(&created)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC),
    })
}

/// Convenience constructor used by the linking engine.
pub fn new_candidate(
    source_id: &str,
    target_id: &str,
    method: LinkMethod,
    confidence: f64,
    explanation: impl Into<String>,
) -> LinkCandidate {
    LinkCandidate {
        id: Uuid::new_v4().to_string(),
        source_interaction_id: source_id.into(),
        target_interaction_id: target_id.into(),
        method,
        confidence,
        explanation: explanation.into(),
        superseded: false,
        created_at: Utc::now(),
    }
}
