//! Priority/SLA assignment.
//!
//! Deterministic precedence when multiple signals apply:
//! age escalation > negative-outcome signals (low rating, matched rule on a
//! hot intent) > channel default > seller default. Later stages only ever
//! raise priority, so the composition is a monotone `max`.

use chrono::{DateTime, Duration, Utc};

use crate::config::SlaConfig;
use crate::model::{Channel, Priority};
use crate::store::SlaRule;

/// Facts about one interaction at assignment time.
#[derive(Debug, Clone)]
pub struct AssignContext<'a> {
    pub seller_id: &'a str,
    pub channel: Channel,
    pub rating: Option<i32>,
    /// Intent label (questions only), from the classifier capability.
    pub intent: Option<&'a str>,
    pub unread_count: u32,
    /// When the customer wrote the message.
    pub occurred_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub needs_response: bool,
}

/// Result of priority/deadline assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub priority: Priority,
    pub sla_deadline: Option<DateTime<Utc>>,
}

/// Channel-default priority before any rule or signal applies.
fn channel_default(ctx: &AssignContext<'_>, cfg: &SlaConfig) -> Priority {
    match ctx.channel {
        Channel::Review | Channel::Question => Priority::Normal,
        Channel::Chat => {
            if ctx.unread_count >= cfg.chat_unread_high {
                Priority::High
            } else {
                Priority::Normal
            }
        }
    }
}

/// Compute priority and deadline for an interaction.
///
/// The deadline comes from the most specific matching [`SlaRule`], anchored
/// at the interaction's creation time. Interactions with no matching rule
/// carry no deadline and are ineligible for sweep escalation.
pub fn assign(ctx: &AssignContext<'_>, rules: &[SlaRule], cfg: &SlaConfig) -> Assignment {
    let matched = rules
        .iter()
        .filter(|r| r.matches(ctx.seller_id, ctx.channel, ctx.intent, ctx.rating))
        .max_by_key(|r| r.specificity());

    let mut priority = channel_default(ctx, cfg);
    let mut deadline = None;

    if let Some(rule) = matched {
        priority = priority.max(rule.priority_on_match);
        deadline = Some(ctx.occurred_at + Duration::minutes(rule.deadline_minutes));
    }

    // Negative-outcome floor: a low rating is at least `high`.
    if let Some(rating) = ctx.rating {
        if rating <= cfg.low_rating_threshold {
            priority = priority.max(Priority::High);
        }
    }

    // Explicit age escalation overrides everything.
    if ctx.needs_response && ctx.now - ctx.occurred_at >= cfg.age_escalation {
        priority = Priority::Urgent;
    }

    Assignment {
        priority,
        sla_deadline: deadline,
    }
}
