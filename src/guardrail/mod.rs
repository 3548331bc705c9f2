//! Outbound guardrail validator.
//!
//! Every candidate reply — human-composed or generated — runs through
//! [`GuardrailValidator::validate`] before it may reach a connector's
//! `send_reply`. A `Blocked` verdict is an expected business outcome, not
//! an error: the send path surfaces it to the operator with the itemized
//! violations and never calls the connector.

pub mod rules;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::Channel;
pub use rules::{default_rules, GuardrailRule, RuleCategory, Severity};

/// Minimal context about the conversation the reply belongs to.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyContext {
    /// The customer explicitly asked for a refund.
    pub refund_requested: bool,
    /// The customer explicitly asked for a return or replacement.
    pub return_requested: bool,
}

impl ReplyContext {
    /// Promise rules only apply when the customer asked for nothing.
    pub fn remedy_requested(&self) -> bool {
        self.refund_requested || self.return_requested
    }
}

/// Final verdict over a candidate reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    /// May be sent, but the violations are recorded for quality tracking.
    Warned,
    /// Must not be sent. No bypass exists.
    Blocked,
}

/// One violated rule, itemized for the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub category: RuleCategory,
    pub severity: Severity,
    /// The offending snippet from the reply text.
    pub excerpt: String,
}

/// Validation result: verdict plus every violated rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailReport {
    pub verdict: Verdict,
    pub violations: Vec<Violation>,
}

impl GuardrailReport {
    pub fn is_blocked(&self) -> bool {
        self.verdict == Verdict::Blocked
    }
}

/// Validates outbound reply text against the rule set.
pub struct GuardrailValidator {
    rules: Vec<GuardrailRule>,
}

impl GuardrailValidator {
    /// Validator with the built-in rule set.
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// Validator with a custom rule set (tests, per-tenant overrides).
    pub fn with_rules(rules: Vec<GuardrailRule>) -> Self {
        Self { rules }
    }

    /// Check a candidate reply. Never fails — an unparsable or empty text
    /// simply passes with no violations.
    pub fn validate(&self, text: &str, channel: Channel, ctx: &ReplyContext) -> GuardrailReport {
        let mut violations = Vec::new();

        for rule in &self.rules {
            // A promise the customer explicitly asked for is not
            // unconditional.
            if rule.category == RuleCategory::UnconditionalPromise && ctx.remedy_requested() {
                continue;
            }

            if let Some(m) = rule.regex.find(text) {
                let severity = if channel.is_public() {
                    rule.severity_public
                } else {
                    rule.severity_chat
                };
                violations.push(Violation {
                    rule: rule.name.to_string(),
                    category: rule.category,
                    severity,
                    excerpt: m.as_str().to_string(),
                });
            }
        }

        let verdict = if violations.iter().any(|v| v.severity == Severity::Block) {
            Verdict::Blocked
        } else if !violations.is_empty() {
            Verdict::Warned
        } else {
            Verdict::Passed
        };

        if verdict != Verdict::Passed {
            debug!(
                verdict = ?verdict,
                channel = %channel,
                rules = ?violations.iter().map(|v| v.rule.as_str()).collect::<Vec<_>>(),
                "Guardrail flagged reply"
            );
        }

        GuardrailReport { verdict, violations }
    }
}

impl Default for GuardrailValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> GuardrailValidator {
        GuardrailValidator::new()
    }

    #[test]
    fn unrequested_refund_promise_is_blocked() {
        let report = validator().validate(
            "Sorry to hear that! We will refund your order today.",
            Channel::Review,
            &ReplyContext::default(),
        );
        assert_eq!(report.verdict, Verdict::Blocked);
        assert!(report.violations.iter().any(|v| v.rule == "refund-promise"));
    }

    #[test]
    fn same_text_passes_when_customer_requested_return() {
        let ctx = ReplyContext {
            refund_requested: false,
            return_requested: true,
        };
        let report = validator().validate(
            "Sorry to hear that! We will refund your order today.",
            Channel::Review,
            &ctx,
        );
        assert_eq!(report.verdict, Verdict::Passed);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn automation_disclosure_blocked_on_public_channel() {
        let report = validator().validate(
            "As an AI assistant I can confirm your order shipped.",
            Channel::Question,
            &ReplyContext::default(),
        );
        assert_eq!(report.verdict, Verdict::Blocked);
    }

    #[test]
    fn automation_disclosure_only_warns_in_chat() {
        let report = validator().validate(
            "As an AI assistant I can confirm your order shipped.",
            Channel::Chat,
            &ReplyContext::default(),
        );
        assert_eq!(report.verdict, Verdict::Warned);
        assert_eq!(report.violations.len(), 1);
    }

    #[test]
    fn blaming_blocked_publicly_warned_privately() {
        let text = "You clearly did not read the instructions.";
        let public = validator().validate(text, Channel::Review, &ReplyContext::default());
        assert_eq!(public.verdict, Verdict::Blocked);

        let private = validator().validate(text, Channel::Chat, &ReplyContext::default());
        assert_eq!(private.verdict, Verdict::Warned);
    }

    #[test]
    fn clean_reply_passes() {
        let report = validator().validate(
            "Thanks for reaching out! Your order shipped yesterday and should arrive by Friday.",
            Channel::Review,
            &ReplyContext::default(),
        );
        assert_eq!(report.verdict, Verdict::Passed);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn multiple_violations_are_itemized() {
        let report = validator().validate(
            "This automated response confirms we will refund you. It's your own fault though.",
            Channel::Review,
            &ReplyContext::default(),
        );
        assert_eq!(report.verdict, Verdict::Blocked);
        assert!(report.violations.len() >= 3);
    }

    #[test]
    fn warn_only_violations_yield_warned() {
        let report = validator().validate(
            "Unfortunately there is nothing we can do about carrier delays.",
            Channel::Review,
            &ReplyContext::default(),
        );
        assert_eq!(report.verdict, Verdict::Warned);
    }
}
