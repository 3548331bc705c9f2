//! SlaRuleStore — data-driven priority/deadline rules.
//!
//! Rules live in the database rather than in ingestion code so response
//! targets can change per seller without a deploy. A rule with a NULL
//! `seller_id` is a default that applies to every seller.

use std::sync::Arc;

use uuid::Uuid;

use super::db::Database;
use crate::error::StoreError;
use crate::model::{Channel, Priority};

/// One priority/deadline rule.
#[derive(Debug, Clone)]
pub struct SlaRule {
    pub id: String,
    /// None = default rule for all sellers.
    pub seller_id: Option<String>,
    /// None = any channel.
    pub channel: Option<Channel>,
    /// Intent label this rule requires (questions only), e.g. "compliance".
    pub intent: Option<String>,
    /// Matches ratings at or below this value (reviews only).
    pub max_rating: Option<i32>,
    pub deadline_minutes: i64,
    pub priority_on_match: Priority,
}

impl SlaRule {
    /// Whether this rule applies to the given interaction facts.
    pub fn matches(
        &self,
        seller_id: &str,
        channel: Channel,
        intent: Option<&str>,
        rating: Option<i32>,
    ) -> bool {
        if let Some(ref rule_seller) = self.seller_id {
            if rule_seller != seller_id {
                return false;
            }
        }
        if let Some(rule_channel) = self.channel {
            if rule_channel != channel {
                return false;
            }
        }
        if let Some(ref rule_intent) = self.intent {
            match intent {
                Some(i) if i == rule_intent => {}
                _ => return false,
            }
        }
        if let Some(max) = self.max_rating {
            match rating {
                Some(r) if r <= max => {}
                _ => return false,
            }
        }
        true
    }

    /// More specific rules win: seller-scoped beats default, then each
    /// extra constraint adds weight.
    pub fn specificity(&self) -> u32 {
        let mut score = 0;
        if self.seller_id.is_some() {
            score += 8;
        }
        if self.intent.is_some() {
            score += 4;
        }
        if self.max_rating.is_some() {
            score += 2;
        }
        if self.channel.is_some() {
            score += 1;
        }
        score
    }
}

/// SLA rule persistence backed by SQLite.
pub struct SlaRuleStore {
    db: Arc<Database>,
}

impl SlaRuleStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a rule. Returns the generated id.
    pub fn insert(&self, rule: &SlaRule) -> Result<String, StoreError> {
        let id = if rule.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            rule.id.clone()
        };
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO sla_rules (id, seller_id, channel, intent, max_rating,
                deadline_minutes, priority_on_match)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id,
                rule.seller_id,
                rule.channel.map(|c| c.as_str()),
                rule.intent,
                rule.max_rating,
                rule.deadline_minutes,
                rule.priority_on_match.as_str(),
            ],
        )?;
        Ok(id)
    }

    /// Rules applicable to a seller: its own plus the defaults.
    pub fn for_seller(&self, seller_id: &str) -> Result<Vec<SlaRule>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, seller_id, channel, intent, max_rating, deadline_minutes, priority_on_match
             FROM sla_rules WHERE seller_id IS NULL OR seller_id = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![seller_id], |row| {
            let channel: Option<String> = row.get(2)?;
            let priority: String = row.get(6)?;
            Ok(SlaRule {
                id: row.get(0)?,
                seller_id: row.get(1)?,
                channel: channel.as_deref().and_then(Channel::parse),
                intent: row.get(3)?,
                max_rating: row.get(4)?,
                deadline_minutes: row.get(5)?,
                priority_on_match: Priority::parse(&priority).unwrap_or(Priority::Normal),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
