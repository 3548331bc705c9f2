//! Channel-specific normalization of connector items into interactions.
//!
//! A malformed item is an item-level failure: the orchestrator logs it
//! with enough context to reproduce and continues the page, it never
//! fails the batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::SlaConfig;
use crate::connectors::ExternalItem;
use crate::model::{Channel, Interaction, InteractionStatus, PairKey};
use crate::sla::{assign, AssignContext};
use crate::store::SlaRule;

/// Item-level normalization failure.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Item has an empty external id")]
    EmptyExternalId,

    #[error("Rating {0} outside the 1..=5 scale")]
    RatingOutOfRange(i32),
}

// ── Intent classification seam ──────────────────────────────────────

/// External capability classifying a question's intent.
///
/// The production deployment plugs in an LLM-backed classifier; the
/// built-in keyword classifier keeps the pipeline functional without one.
pub trait IntentClassifier: Send + Sync {
    /// Intent label for a question text, e.g. "compliance", "shipping".
    fn classify(&self, text: &str) -> Option<String>;
}

/// Fast keyword-based intent classifier.
pub struct KeywordIntentClassifier {
    patterns: Vec<(&'static str, Regex)>,
}

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        let patterns = vec![
            (
                "compliance",
                Regex::new(r"(?i)\b(certif|compliance|legal|recall|hazard|safety warning|warranty claim|ce mark)")
                    .unwrap(),
            ),
            (
                "refund",
                Regex::new(r"(?i)\b(refund|money back|return the|send it back|chargeback)").unwrap(),
            ),
            (
                "shipping",
                Regex::new(r"(?i)\b(shipping|delivery|tracking|arrive|dispatched|where is my (order|package))")
                    .unwrap(),
            ),
            (
                "product",
                Regex::new(r"(?i)\b(compatible|dimensions|size|material|how (do|does|to)|instructions|manual)")
                    .unwrap(),
            ),
        ];
        Self { patterns }
    }
}

impl Default for KeywordIntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier for KeywordIntentClassifier {
    fn classify(&self, text: &str) -> Option<String> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(intent, _)| (*intent).to_string())
    }
}

// ── Normalizer ──────────────────────────────────────────────────────

/// Turns connector items into interactions with an initial priority.
pub struct Normalizer {
    classifier: Arc<dyn IntentClassifier>,
    sla_cfg: SlaConfig,
}

impl Normalizer {
    pub fn new(classifier: Arc<dyn IntentClassifier>, sla_cfg: SlaConfig) -> Self {
        Self { classifier, sla_cfg }
    }

    /// Normalize one item. The resulting interaction carries a fresh
    /// internal id; the store's upsert decides insert-vs-update by the
    /// uniqueness invariant.
    pub fn normalize(
        &self,
        pair: &PairKey,
        item: &ExternalItem,
        rules: &[SlaRule],
        now: DateTime<Utc>,
    ) -> Result<Interaction, NormalizeError> {
        if item.external_id.trim().is_empty() {
            return Err(NormalizeError::EmptyExternalId);
        }
        if let Some(rating) = item.rating {
            if !(1..=5).contains(&rating) {
                return Err(NormalizeError::RatingOutOfRange(rating));
            }
        }

        let intent = match pair.channel {
            Channel::Question => self.classifier.classify(&item.text),
            _ => None,
        };
        let needs_response = !item.answered;

        let assignment = assign(
            &AssignContext {
                seller_id: &pair.seller_id,
                channel: pair.channel,
                rating: item.rating,
                intent: intent.as_deref(),
                unread_count: item.unread_count,
                occurred_at: item.occurred_at,
                now,
                needs_response,
            },
            rules,
            &self.sla_cfg,
        );

        let mut extension = serde_json::Map::new();
        if let Some(ref intent) = intent {
            extension.insert("intent".into(), serde_json::Value::String(intent.clone()));
        }
        if item.unread_count > 0 {
            extension.insert("unread_count".into(), serde_json::json!(item.unread_count));
        }
        if !item.metadata.is_null() {
            extension.insert("upstream".into(), item.metadata.clone());
        }

        Ok(Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            seller_id: pair.seller_id.clone(),
            marketplace: pair.marketplace.clone(),
            channel: pair.channel,
            external_id: item.external_id.clone(),
            text: item.text.clone(),
            rating: item.rating,
            attachments: item.attachments.clone(),
            customer_id: item.customer_id.clone(),
            customer_name: item.customer_name.clone(),
            order_id: item.order_id.clone(),
            product_id: item.product_id.clone(),
            status: if item.answered {
                InteractionStatus::Responded
            } else {
                InteractionStatus::Open
            },
            needs_response,
            priority: assignment.priority,
            sla_deadline: assignment.sla_deadline,
            escalated_at: None,
            source: item.source,
            occurred_at: item.occurred_at,
            created_at: now,
            updated_at: now,
            extension: serde_json::Value::Object(extension),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(KeywordIntentClassifier::new()), SlaConfig::default())
    }

    fn review_pair() -> PairKey {
        PairKey::new("s1", "amazon", Channel::Review)
    }

    #[test]
    fn empty_external_id_is_malformed() {
        let item = ExternalItem::new("  ", "text", Utc::now());
        let err = normalizer()
            .normalize(&review_pair(), &item, &[], Utc::now())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::EmptyExternalId));
    }

    #[test]
    fn out_of_scale_rating_is_malformed() {
        let mut item = ExternalItem::new("r-1", "terrible", Utc::now());
        item.rating = Some(0);
        let err = normalizer()
            .normalize(&review_pair(), &item, &[], Utc::now())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::RatingOutOfRange(0)));
    }

    #[test]
    fn low_rating_review_is_at_least_high() {
        let mut item = ExternalItem::new("r-2", "broke after a day", Utc::now());
        item.rating = Some(1);
        let i = normalizer()
            .normalize(&review_pair(), &item, &[], Utc::now())
            .unwrap();
        assert!(i.priority >= Priority::High);
    }

    #[test]
    fn question_gets_intent_classified_into_extension() {
        let pair = PairKey::new("s1", "amazon", Channel::Question);
        let item = ExternalItem::new("q-1", "Is there a safety warning for this toy?", Utc::now());
        let i = normalizer().normalize(&pair, &item, &[], Utc::now()).unwrap();
        assert_eq!(i.extension["intent"], "compliance");
    }

    #[test]
    fn review_text_is_not_classified() {
        let item = ExternalItem::new("r-3", "refund me now", Utc::now());
        let i = normalizer()
            .normalize(&review_pair(), &item, &[], Utc::now())
            .unwrap();
        assert!(i.extension.get("intent").is_none());
    }

    #[test]
    fn answered_item_is_stored_responded() {
        let mut item = ExternalItem::new("r-4", "nice", Utc::now());
        item.answered = true;
        let i = normalizer()
            .normalize(&review_pair(), &item, &[], Utc::now())
            .unwrap();
        assert_eq!(i.status, InteractionStatus::Responded);
        assert!(!i.needs_response);
    }

    #[test]
    fn old_unanswered_chat_is_urgent() {
        let cfg = SlaConfig::default();
        let pair = PairKey::new("s1", "amazon", Channel::Chat);
        let old = Utc::now() - cfg.age_escalation - chrono::Duration::hours(1);
        let item = ExternalItem::new("c-1", "hello?", old);
        let i = normalizer().normalize(&pair, &item, &[], Utc::now()).unwrap();
        assert_eq!(i.priority, Priority::Urgent);
    }

    #[test]
    fn keyword_classifier_labels() {
        let c = KeywordIntentClassifier::new();
        assert_eq!(c.classify("Where is my order?").as_deref(), Some("shipping"));
        assert_eq!(c.classify("I want my money back").as_deref(), Some("refund"));
        assert_eq!(c.classify("Is this CE marked?").as_deref(), Some("compliance"));
        assert_eq!(c.classify("What are the dimensions?").as_deref(), Some("product"));
        assert_eq!(c.classify("Lovely weather today"), None);
    }
}
