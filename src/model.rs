//! Core domain types shared across the engine.
//!
//! Every inbound customer communication — review, pre-purchase question,
//! buyer chat — is normalized into one [`Interaction`] record. Connectors
//! produce [`crate::connectors::ExternalItem`]s; the sync orchestrator turns
//! them into `Interaction`s keyed by the
//! `(seller_id, marketplace, channel, external_id)` uniqueness invariant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ── Channel ─────────────────────────────────────────────────────────

/// Communication channel of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Review,
    Question,
    Chat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Review => "review",
            Channel::Question => "question",
            Channel::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "review" => Some(Channel::Review),
            "question" => Some(Channel::Question),
            "chat" => Some(Channel::Chat),
            _ => None,
        }
    }

    /// Reviews and questions are visible to every future customer; chats
    /// are private. Public channels get the strictest guardrail set.
    pub fn is_public(&self) -> bool {
        matches!(self, Channel::Review | Channel::Question)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Priority ────────────────────────────────────────────────────────

/// Response priority class, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }

    /// One level up, capped at `Urgent`.
    pub fn promote(&self) -> Self {
        match self {
            Priority::Low => Priority::Normal,
            Priority::Normal => Priority::High,
            Priority::High => Priority::Urgent,
            Priority::Urgent => Priority::Urgent,
        }
    }
}

// ── Status / provenance ─────────────────────────────────────────────

/// Workflow status of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Open,
    Responded,
    Closed,
}

impl InteractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionStatus::Open => "open",
            InteractionStatus::Responded => "responded",
            InteractionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(InteractionStatus::Open),
            "responded" => Some(InteractionStatus::Responded),
            "closed" => Some(InteractionStatus::Closed),
            _ => None,
        }
    }
}

/// Where the data came from. Fallback-sourced rows are never silently
/// merged into primary-sourced aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    PrimaryApi,
    FallbackSource,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::PrimaryApi => "primary_api",
            Source::FallbackSource => "fallback_source",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary_api" => Some(Source::PrimaryApi),
            "fallback_source" => Some(Source::FallbackSource),
            _ => None,
        }
    }
}

// ── Interaction ─────────────────────────────────────────────────────

/// One inbound customer communication, normalized across channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    /// Internal UUID.
    pub id: String,
    pub seller_id: String,
    pub marketplace: String,
    pub channel: Channel,
    /// Channel-native id, unique per (seller, marketplace, channel).
    pub external_id: String,
    pub text: String,
    /// Review-only star rating.
    pub rating: Option<i32>,
    /// Opaque attachment references.
    pub attachments: Vec<String>,
    pub customer_id: Option<String>,
    /// Display name of the buyer, used only by heuristic linking.
    pub customer_name: Option<String>,
    pub order_id: Option<String>,
    pub product_id: Option<String>,
    pub status: InteractionStatus,
    pub needs_response: bool,
    pub priority: Priority,
    pub sla_deadline: Option<DateTime<Utc>>,
    /// Set by the escalation sweep; guards against re-promotion within the
    /// same deadline breach.
    pub escalated_at: Option<DateTime<Utc>>,
    pub source: Source,
    /// When the customer wrote the message (upstream time).
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Free-form channel-specific metadata (last draft, intent label,
    /// unread count). Display/context only, never queried.
    pub extension: serde_json::Value,
}

impl Interaction {
    /// Fingerprint of upstream-owned content, used by the idempotent
    /// upsert to detect unchanged re-ingestion.
    pub fn content_hash(&self) -> String {
        content_hash(
            &self.text,
            self.rating,
            &self.attachments,
            self.customer_id.as_deref(),
            self.order_id.as_deref(),
            self.product_id.as_deref(),
            self.status == InteractionStatus::Responded,
        )
    }
}

/// Hash the fields a connector owns. Workflow fields (priority, deadline,
/// escalation stamp) are local and excluded.
pub fn content_hash(
    text: &str,
    rating: Option<i32>,
    attachments: &[String],
    customer_id: Option<&str>,
    order_id: Option<&str>,
    product_id: Option<&str>,
    answered: bool,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(rating.unwrap_or(0).to_le_bytes());
    for a in attachments {
        hasher.update(a.as_bytes());
        hasher.update([0u8]);
    }
    for key in [customer_id, order_id, product_id] {
        hasher.update(key.unwrap_or("").as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([answered as u8]);
    hex::encode(hasher.finalize())
}

// ── Pair key ────────────────────────────────────────────────────────

/// Identity of one sync unit: a (seller, marketplace, channel) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub seller_id: String,
    pub marketplace: String,
    pub channel: Channel,
}

impl PairKey {
    pub fn new(seller_id: impl Into<String>, marketplace: impl Into<String>, channel: Channel) -> Self {
        Self {
            seller_id: seller_id.into(),
            marketplace: marketplace.into(),
            channel,
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.seller_id, self.marketplace, self.channel)
    }
}
