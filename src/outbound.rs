//! Outbound path: draft generation seam and the guardrail-gated send.
//!
//! Draft generation is a capability seam like the connectors: the engine
//! stores and gates drafts but never produces text itself. Every reply,
//! drafted or human-typed, passes [`OutboundGate::send_reply`], which is
//! the only code path allowed to call a connector's `send_reply`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::connectors::{call_with_retry, Connector, TokenBucket};
use crate::error::{DraftError, Error, StoreError};
use crate::guardrail::{GuardrailReport, GuardrailValidator, ReplyContext, Severity};
use crate::linking::is_auto_actionable;
use crate::model::Interaction;
use crate::store::{Database, EventStore, EventType, InteractionStore, LinkStore};

// ── Draft seam ──────────────────────────────────────────────────────

/// A generated reply draft, never auto-sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    /// Generator's self-reported confidence, display only.
    pub confidence: f32,
}

/// External draft-generation capability.
///
/// `prior` carries linked earlier interactions of the same customer or
/// order so the generator can avoid re-answering a handled complaint.
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    async fn generate(
        &self,
        interaction: &Interaction,
        prior: &[Interaction],
    ) -> Result<Draft, DraftError>;
}

/// Draft orchestration: context assembly, caching, events.
pub struct DraftService {
    interactions: InteractionStore,
    events: EventStore,
    links: LinkStore,
    generator: Arc<dyn DraftGenerator>,
}

impl DraftService {
    pub fn new(db: Arc<Database>, generator: Arc<dyn DraftGenerator>) -> Self {
        Self {
            interactions: InteractionStore::new(Arc::clone(&db)),
            events: EventStore::new(Arc::clone(&db)),
            links: LinkStore::new(db),
            generator,
        }
    }

    /// Produce a draft for an interaction, reusing the cached one while
    /// the content is unchanged.
    pub async fn draft_for(&self, interaction_id: &str) -> Result<Draft, DraftError> {
        let interaction = self
            .interactions
            .get(interaction_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "interaction".into(),
                id: interaction_id.to_string(),
            })?;

        let content_hash = interaction.content_hash();
        if let Some(cached) = cached_draft(&interaction, &content_hash) {
            debug!(id = %interaction.id, "Draft cache hit");
            self.events.append(
                Some(&interaction.id),
                EventType::DraftCacheHit,
                serde_json::json!({ "confidence": cached.confidence }),
            )?;
            return Ok(cached);
        }

        let prior = self.linked_context(&interaction)?;
        let draft = self.generator.generate(&interaction, &prior).await?;

        let mut extension = match interaction.extension {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        extension.insert(
            "draft".into(),
            serde_json::json!({
                "text": draft.text,
                "confidence": draft.confidence,
                "content_hash": content_hash,
            }),
        );
        self.interactions
            .set_extension(&interaction.id, &serde_json::Value::Object(extension))?;

        self.events.append(
            Some(&interaction.id),
            EventType::DraftGenerated,
            serde_json::json!({
                "confidence": draft.confidence,
                "prior_context": prior.len(),
            }),
        )?;
        Ok(draft)
    }

    /// Linked interactions safe to feed into generation. Only links that
    /// pass the auto-action gate qualify; assist-only links stay a human
    /// affordance.
    fn linked_context(&self, interaction: &Interaction) -> Result<Vec<Interaction>, StoreError> {
        let mut prior = Vec::new();
        for link in self.links.current_for_source(&interaction.id)? {
            if !is_auto_actionable(&link) {
                continue;
            }
            if let Some(target) = self.interactions.get(&link.target_interaction_id)? {
                prior.push(target);
            }
        }
        Ok(prior)
    }
}

fn cached_draft(interaction: &Interaction, content_hash: &str) -> Option<Draft> {
    let cached = interaction.extension.get("draft")?;
    if cached.get("content_hash")?.as_str()? != content_hash {
        return None;
    }
    Some(Draft {
        text: cached.get("text")?.as_str()?.to_string(),
        confidence: cached.get("confidence")?.as_f64()? as f32,
    })
}

// ── Guarded send ────────────────────────────────────────────────────

/// Who composed the reply being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOrigin {
    /// Typed or edited by an operator.
    Human,
    /// An approved draft sent unedited.
    Automated,
}

/// Result of a send attempt that reached a verdict.
#[derive(Debug)]
pub enum SendOutcome {
    /// Delivered upstream; any warn-level findings ride along.
    Sent { warnings: Vec<String> },
    /// Refused by the guardrail. The reply never reached the connector.
    Blocked(GuardrailReport),
}

/// The single gate in front of connector `send_reply`.
pub struct OutboundGate {
    interactions: InteractionStore,
    events: EventStore,
    validator: GuardrailValidator,
    retry: RetryConfig,
}

impl OutboundGate {
    pub fn new(db: Arc<Database>, retry: RetryConfig) -> Self {
        Self {
            interactions: InteractionStore::new(Arc::clone(&db)),
            events: EventStore::new(db),
            validator: GuardrailValidator::new(),
            retry,
        }
    }

    /// Validate and send one reply.
    ///
    /// A `Blocked` verdict is a normal outcome: the violations are recorded
    /// and returned for operator display, and no connector call happens.
    /// There is no origin that bypasses validation.
    pub async fn send_reply(
        &self,
        interaction_id: &str,
        text: &str,
        ctx: &ReplyContext,
        connector: &dyn Connector,
        bucket: &TokenBucket,
        origin: ReplyOrigin,
    ) -> Result<SendOutcome, Error> {
        let interaction = self
            .interactions
            .get(interaction_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "interaction".into(),
                id: interaction_id.to_string(),
            })
            .map_err(Error::Store)?;

        let report = self.validator.validate(text, interaction.channel, ctx);
        if report.is_blocked() {
            warn!(
                id = %interaction.id,
                origin = ?origin,
                rules = ?report.violations.iter().map(|v| v.rule.as_str()).collect::<Vec<_>>(),
                "Reply blocked by guardrail"
            );
            self.events
                .append(
                    Some(&interaction.id),
                    EventType::ValidationBlocked,
                    serde_json::json!({
                        "origin": origin_str(origin),
                        "violations": report.violations,
                    }),
                )
                .map_err(Error::Store)?;
            return Ok(SendOutcome::Blocked(report));
        }

        let warnings: Vec<String> = report
            .violations
            .iter()
            .filter(|v| v.severity == Severity::Warn)
            .map(|v| v.rule.clone())
            .collect();

        call_with_retry(
            bucket,
            &self.retry,
            &interaction.marketplace,
            "send_reply",
            || connector.send_reply(&interaction.external_id, text),
        )
        .await
        .map_err(Error::Connector)?;

        self.interactions
            .mark_responded(&interaction.id)
            .map_err(Error::Store)?;

        let event_type = match origin {
            ReplyOrigin::Human => EventType::ReplyManual,
            ReplyOrigin::Automated => EventType::ReplySent,
        };
        self.events
            .append(
                Some(&interaction.id),
                event_type,
                serde_json::json!({
                    "origin": origin_str(origin),
                    "warnings": warnings,
                }),
            )
            .map_err(Error::Store)?;

        info!(id = %interaction.id, origin = ?origin, warnings = warnings.len(), "Reply sent");
        Ok(SendOutcome::Sent { warnings })
    }
}

fn origin_str(origin: ReplyOrigin) -> &'static str {
    match origin {
        ReplyOrigin::Human => "human",
        ReplyOrigin::Automated => "automated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use crate::model::{Channel, InteractionStatus, Priority, Source};
    use crate::store::links::new_candidate;
    use crate::store::LinkMethod;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn stored_interaction(db: &Arc<Database>, external_id: &str) -> Interaction {
        let now = Utc::now();
        let i = Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            seller_id: "s1".into(),
            marketplace: "amazon".into(),
            channel: Channel::Review,
            external_id: external_id.into(),
            text: "Product arrived broken".into(),
            rating: Some(1),
            attachments: vec![],
            customer_id: Some("cust-1".into()),
            customer_name: Some("Alice".into()),
            order_id: Some("ORD-1".into()),
            product_id: None,
            status: InteractionStatus::Open,
            needs_response: true,
            priority: Priority::High,
            sla_deadline: Some(now + chrono::Duration::hours(4)),
            escalated_at: None,
            source: Source::PrimaryApi,
            occurred_at: now,
            created_at: now,
            updated_at: now,
            extension: serde_json::json!({}),
        };
        InteractionStore::new(Arc::clone(db)).upsert(&i).unwrap();
        i
    }

    struct RecordingConnector {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingConnector {
        fn new() -> Self {
            Self { sent: Mutex::new(vec![]) }
        }
    }

    #[async_trait]
    impl Connector for RecordingConnector {
        fn marketplace(&self) -> &str {
            "amazon"
        }

        fn channel(&self) -> Channel {
            Channel::Review
        }

        async fn list_items(
            &self,
            _cursor: Option<&str>,
            _page_size: u32,
        ) -> Result<crate::connectors::Page, ConnectorError> {
            Ok(crate::connectors::Page::empty())
        }

        async fn send_reply(&self, item_id: &str, text: &str) -> Result<(), ConnectorError> {
            self.sent
                .lock()
                .unwrap()
                .push((item_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn gate(db: &Arc<Database>) -> OutboundGate {
        OutboundGate::new(Arc::clone(db), RetryConfig::default())
    }

    fn bucket() -> TokenBucket {
        TokenBucket::new(1000, 1000)
    }

    #[tokio::test]
    async fn clean_reply_is_sent_and_marked_responded() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let i = stored_interaction(&db, "r-1");
        let connector = RecordingConnector::new();

        let outcome = gate(&db)
            .send_reply(
                &i.id,
                "Thanks for flagging this, our team is on it.",
                &ReplyContext::default(),
                &connector,
                &bucket(),
                ReplyOrigin::Human,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Sent { ref warnings } if warnings.is_empty()));
        assert_eq!(connector.sent.lock().unwrap().len(), 1);

        let loaded = InteractionStore::new(Arc::clone(&db)).get(&i.id).unwrap().unwrap();
        assert_eq!(loaded.status, InteractionStatus::Responded);
        assert!(!loaded.needs_response);

        let events = EventStore::new(db).for_interaction(&i.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ReplyManual);
    }

    #[tokio::test]
    async fn blocked_reply_never_reaches_connector() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let i = stored_interaction(&db, "r-2");
        let connector = RecordingConnector::new();

        let outcome = gate(&db)
            .send_reply(
                &i.id,
                "We will refund you right away.",
                &ReplyContext::default(),
                &connector,
                &bucket(),
                ReplyOrigin::Automated,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Blocked(_)));
        assert!(connector.sent.lock().unwrap().is_empty());

        let loaded = InteractionStore::new(Arc::clone(&db)).get(&i.id).unwrap().unwrap();
        assert_eq!(loaded.status, InteractionStatus::Open);

        let events = EventStore::new(db).for_interaction(&i.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ValidationBlocked);
    }

    #[tokio::test]
    async fn human_origin_gets_no_bypass() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let i = stored_interaction(&db, "r-3");
        let connector = RecordingConnector::new();

        let outcome = gate(&db)
            .send_reply(
                &i.id,
                "It's your own fault for ignoring the manual.",
                &ReplyContext::default(),
                &connector,
                &bucket(),
                ReplyOrigin::Human,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Blocked(_)));
        assert!(connector.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn warned_reply_sends_with_recorded_warnings() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let i = stored_interaction(&db, "r-4");
        let connector = RecordingConnector::new();

        let outcome = gate(&db)
            .send_reply(
                &i.id,
                "Sadly there is nothing we can do about carrier delays, sorry!",
                &ReplyContext::default(),
                &connector,
                &bucket(),
                ReplyOrigin::Automated,
            )
            .await
            .unwrap();

        let SendOutcome::Sent { warnings } = outcome else {
            panic!("expected sent outcome");
        };
        assert_eq!(warnings, vec!["dismissive-brushoff".to_string()]);

        let events = EventStore::new(db).for_interaction(&i.id).unwrap();
        assert_eq!(events[0].event_type, EventType::ReplySent);
        assert_eq!(events[0].payload["warnings"][0], "dismissive-brushoff");
    }

    #[tokio::test]
    async fn requested_refund_promise_goes_through() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let i = stored_interaction(&db, "r-5");
        let connector = RecordingConnector::new();
        let ctx = ReplyContext {
            refund_requested: true,
            return_requested: false,
        };

        let outcome = gate(&db)
            .send_reply(
                &i.id,
                "We will refund your order as requested.",
                &ctx,
                &connector,
                &bucket(),
                ReplyOrigin::Human,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Sent { .. }));
        assert_eq!(connector.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_interaction_is_a_store_error() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let connector = RecordingConnector::new();

        let err = gate(&db)
            .send_reply(
                "nope",
                "hello",
                &ReplyContext::default(),
                &connector,
                &bucket(),
                ReplyOrigin::Human,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Store(StoreError::NotFound { .. })));
    }

    // ── Draft service ───────────────────────────────────────────────

    struct CountingGenerator {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DraftGenerator for CountingGenerator {
        async fn generate(
            &self,
            interaction: &Interaction,
            prior: &[Interaction],
        ) -> Result<Draft, DraftError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Draft {
                text: format!("Re {}: sorry to hear ({} prior)", interaction.external_id, prior.len()),
                confidence: 0.8,
            })
        }
    }

    #[tokio::test]
    async fn draft_is_cached_until_content_changes() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let i = stored_interaction(&db, "r-6");
        let generator = Arc::new(CountingGenerator { calls: AtomicU32::new(0) });
        let service = DraftService::new(Arc::clone(&db), Arc::clone(&generator) as Arc<dyn DraftGenerator>);

        let first = service.draft_for(&i.id).await.unwrap();
        let second = service.draft_for(&i.id).await.unwrap();
        assert_eq!(first.text, second.text);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        // Content change invalidates the cache.
        let mut edited = i.clone();
        edited.text = "Product arrived broken, second unit too".into();
        InteractionStore::new(Arc::clone(&db)).upsert(&edited).unwrap();
        service.draft_for(&i.id).await.unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);

        let events = EventStore::new(db).for_interaction(&i.id).unwrap();
        let hits = events
            .iter()
            .filter(|e| e.event_type == EventType::DraftCacheHit)
            .count();
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn only_auto_actionable_links_feed_generation() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let source = stored_interaction(&db, "r-7");
        let target = stored_interaction(&db, "r-8");
        let weak_target = stored_interaction(&db, "r-9");

        LinkStore::new(Arc::clone(&db))
            .replace_for_source(
                &source.id,
                &[
                    new_candidate(&source.id, &target.id, LinkMethod::OrderId, 0.99, "same order"),
                    new_candidate(
                        &source.id,
                        &weak_target.id,
                        LinkMethod::NameHeuristic,
                        0.6,
                        "similar name",
                    ),
                ],
            )
            .unwrap();

        let generator = Arc::new(CountingGenerator { calls: AtomicU32::new(0) });
        let service = DraftService::new(Arc::clone(&db), Arc::clone(&generator) as Arc<dyn DraftGenerator>);
        let draft = service.draft_for(&source.id).await.unwrap();
        assert!(draft.text.contains("(1 prior)"));
    }
}
