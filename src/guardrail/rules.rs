//! Guardrail rule set — compiled patterns with per-channel severity.
//!
//! Public channels (reviews, questions) are read by every future customer
//! and get the strictest severities; private chat gets a relaxed set.
//! Promise rules are conditional: a refund/replacement commitment is only
//! a violation when the customer never asked for one.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// What kind of problem a rule detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Language implying automation or non-human origin.
    AutomationDisclosure,
    /// Unconditional refund/replacement/compensation promises.
    UnconditionalPromise,
    /// Blaming the customer for the problem.
    BlamingCustomer,
    /// Dismissive or belittling phrasing.
    Dismissive,
}

/// Rule severity — a blocked reply never reaches the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warn,
    Block,
}

/// One compiled guardrail rule.
#[derive(Debug, Clone)]
pub struct GuardrailRule {
    /// Stable rule name for events and operator display.
    pub name: &'static str,
    pub category: RuleCategory,
    pub regex: Regex,
    /// Severity on public channels (review, question).
    pub severity_public: Severity,
    /// Severity on private chat.
    pub severity_chat: Severity,
}

/// The default rule set applied to every outbound reply.
pub fn default_rules() -> Vec<GuardrailRule> {
    vec![
        GuardrailRule {
            name: "automation-disclosure",
            category: RuleCategory::AutomationDisclosure,
            regex: Regex::new(
                r"(?i)\b(as an ai|i am (a|an) (bot|ai)|i'm (a|an) (bot|ai)|automated (message|response|reply)|this (message|reply|response) (was|has been) (generated|auto))",
            )
            .unwrap(),
            severity_public: Severity::Block,
            severity_chat: Severity::Warn,
        },
        GuardrailRule {
            name: "refund-promise",
            category: RuleCategory::UnconditionalPromise,
            regex: Regex::new(
                r"(?i)\b(we|i)('ll| will| shall) (of course )?(refund|reimburse|issue (you )?a refund)",
            )
            .unwrap(),
            severity_public: Severity::Block,
            severity_chat: Severity::Block,
        },
        GuardrailRule {
            name: "replacement-promise",
            category: RuleCategory::UnconditionalPromise,
            regex: Regex::new(
                r"(?i)\b(we|i)('ll| will) (send|ship) (you )?a (free )?(replacement|new (one|unit|item))",
            )
            .unwrap(),
            severity_public: Severity::Block,
            severity_chat: Severity::Block,
        },
        GuardrailRule {
            name: "compensation-promise",
            category: RuleCategory::UnconditionalPromise,
            regex: Regex::new(
                r"(?i)\byou('ll| will) (get|receive) (a |some )?(refund|replacement|compensation|voucher|coupon)",
            )
            .unwrap(),
            severity_public: Severity::Block,
            severity_chat: Severity::Block,
        },
        GuardrailRule {
            name: "blaming-customer",
            category: RuleCategory::BlamingCustomer,
            regex: Regex::new(
                r"(?i)\b(your (own )?fault|you (clearly )?(did not|didn't|failed to) (read|follow|understand)|user error)",
            )
            .unwrap(),
            severity_public: Severity::Block,
            severity_chat: Severity::Warn,
        },
        GuardrailRule {
            name: "dismissive-phrasing",
            category: RuleCategory::Dismissive,
            regex: Regex::new(
                r"(?i)\b(calm down|not our problem|stop complaining|deal with it|that's just how it is)",
            )
            .unwrap(),
            severity_public: Severity::Block,
            severity_chat: Severity::Warn,
        },
        GuardrailRule {
            name: "dismissive-brushoff",
            category: RuleCategory::Dismissive,
            regex: Regex::new(r"(?i)\bnothing (we|i) can do\b").unwrap(),
            severity_public: Severity::Warn,
            severity_chat: Severity::Warn,
        },
    ]
}
