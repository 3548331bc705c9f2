//! Cross-channel linking engine.
//!
//! Two-tier matching, always computed, never blocking the pipeline:
//! a deterministic tier over exact shared identifiers with fixed
//! confidences, then a probabilistic tier combining buyer-name similarity,
//! lexical overlap, and temporal proximity — capped strictly below the
//! deterministic floor. Candidates are persisted with an explanation and
//! superseded (never deleted) on recomputation.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::policy::{
    CONFIDENCE_CUSTOMER_ID, CONFIDENCE_ORDER_ID, CONFIDENCE_PRODUCT_ARTICLE,
    CONFIDENCE_PRODUCT_EXACT, PROBABILISTIC_CEILING,
};
use crate::config::LinkConfig;
use crate::error::StoreError;
use crate::model::Interaction;
use crate::store::links::new_candidate;
use crate::store::{Database, InteractionStore, LinkCandidate, LinkMethod, LinkStore};

/// Computes and persists link candidates for interactions.
pub struct LinkingEngine {
    interactions: InteractionStore,
    links: LinkStore,
    cfg: LinkConfig,
}

impl LinkingEngine {
    pub fn new(db: Arc<Database>, cfg: LinkConfig) -> Self {
        Self {
            interactions: InteractionStore::new(Arc::clone(&db)),
            links: LinkStore::new(db),
            cfg,
        }
    }

    /// Recompute candidates for one interaction and persist them,
    /// superseding the previous set. Every matched counterpart has its own
    /// candidate set refreshed too, so the earlier side of a pair picks up
    /// the new arrival. Returns the interaction's new candidates.
    pub fn link_interaction(&self, interaction: &Interaction) -> Result<Vec<LinkCandidate>, StoreError> {
        let out = self.compute_and_store(interaction)?;

        for candidate in &out {
            if let Some(target) = self.interactions.get(&candidate.target_interaction_id)? {
                self.compute_and_store(&target)?;
            }
        }

        Ok(out)
    }

    fn compute_and_store(&self, interaction: &Interaction) -> Result<Vec<LinkCandidate>, StoreError> {
        let mut candidates = self.deterministic_tier(interaction)?;

        let matched: HashSet<String> = candidates
            .iter()
            .map(|c| c.target_interaction_id.clone())
            .collect();
        candidates.extend(self.probabilistic_tier(interaction, &matched)?);

        // One candidate per target: keep the highest confidence.
        let mut best: HashMap<String, LinkCandidate> = HashMap::new();
        for c in candidates {
            match best.get(&c.target_interaction_id) {
                Some(existing) if existing.confidence >= c.confidence => {}
                _ => {
                    best.insert(c.target_interaction_id.clone(), c);
                }
            }
        }
        let mut out: Vec<LinkCandidate> = best.into_values().collect();
        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        self.links.replace_for_source(&interaction.id, &out)?;
        debug!(id = %interaction.id, count = out.len(), "Link candidates recomputed");
        Ok(out)
    }

    // ── Deterministic tier ──────────────────────────────────────────

    fn deterministic_tier(&self, interaction: &Interaction) -> Result<Vec<LinkCandidate>, StoreError> {
        let mut out = Vec::new();

        if let Some(ref order_id) = interaction.order_id {
            for other in
                self.interactions.find_by_order(&interaction.seller_id, order_id, &interaction.id)?
            {
                out.push(new_candidate(
                    &interaction.id,
                    &other.id,
                    LinkMethod::OrderId,
                    CONFIDENCE_ORDER_ID,
                    format!("Same order {order_id} ({} on {})", other.channel, other.marketplace),
                ));
            }
        }

        if let Some(ref customer_id) = interaction.customer_id {
            for other in self.interactions.find_by_customer(
                &interaction.seller_id,
                customer_id,
                &interaction.id,
            )? {
                out.push(new_candidate(
                    &interaction.id,
                    &other.id,
                    LinkMethod::CustomerId,
                    CONFIDENCE_CUSTOMER_ID,
                    format!("Same customer ({} on {})", other.channel, other.marketplace),
                ));
            }
        }

        if let Some(ref product_id) = interaction.product_id {
            let from = interaction.occurred_at - self.cfg.product_window;
            let to = interaction.occurred_at + self.cfg.product_window;
            for other in self.interactions.find_with_product(
                &interaction.seller_id,
                &interaction.id,
                from,
                to,
            )? {
                let Some(ref other_product) = other.product_id else {
                    continue;
                };
                if other_product == product_id {
                    out.push(new_candidate(
                        &interaction.id,
                        &other.id,
                        LinkMethod::ProductTimeWindow,
                        CONFIDENCE_PRODUCT_EXACT,
                        format!(
                            "Same product {product_id} within {}h",
                            self.cfg.product_window.num_hours()
                        ),
                    ));
                } else if article_of(other_product) == article_of(product_id) {
                    out.push(new_candidate(
                        &interaction.id,
                        &other.id,
                        LinkMethod::ProductTimeWindow,
                        CONFIDENCE_PRODUCT_ARTICLE,
                        format!(
                            "Same article {} (variants {product_id} / {other_product})",
                            article_of(product_id)
                        ),
                    ));
                }
            }
        }

        Ok(out)
    }

    // ── Probabilistic tier ──────────────────────────────────────────

    fn probabilistic_tier(
        &self,
        interaction: &Interaction,
        already_matched: &HashSet<String>,
    ) -> Result<Vec<LinkCandidate>, StoreError> {
        let from = interaction.occurred_at - self.cfg.probabilistic_window;
        let to = interaction.occurred_at + self.cfg.probabilistic_window;
        let recent = self.interactions.recent_for_seller(
            &interaction.seller_id,
            &interaction.id,
            from,
            to,
        )?;

        let mut out = Vec::new();
        for other in recent {
            if already_matched.contains(&other.id) {
                continue;
            }

            let name_sim = match (&interaction.customer_name, &other.customer_name) {
                (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
                    strsim::jaro_winkler(&a.to_lowercase(), &b.to_lowercase())
                }
                _ => 0.0,
            };
            let overlap = token_overlap(&interaction.text, &other.text);
            let temporal = temporal_proximity(
                interaction.occurred_at,
                other.occurred_at,
                self.cfg.probabilistic_window,
            );

            let raw = 0.5 * name_sim + 0.3 * overlap + 0.2 * temporal;
            let confidence = raw * PROBABILISTIC_CEILING;
            if confidence < self.cfg.min_probabilistic_confidence {
                continue;
            }

            let (method, explanation) = if 0.5 * name_sim >= 0.3 * overlap {
                (
                    LinkMethod::NameHeuristic,
                    format!(
                        "Similar buyer name ({:.0}% match), {:.0}% text overlap",
                        name_sim * 100.0,
                        overlap * 100.0
                    ),
                )
            } else {
                (
                    LinkMethod::SemanticOverlap,
                    format!(
                        "{:.0}% text overlap within {} days",
                        overlap * 100.0,
                        self.cfg.probabilistic_window.num_days()
                    ),
                )
            };

            out.push(new_candidate(&interaction.id, &other.id, method, confidence, explanation));
        }

        Ok(out)
    }
}

/// Article-level identity of a product id: the part before the final
/// variant suffix, e.g. `SKU-100-RED` → `SKU-100`.
fn article_of(product_id: &str) -> &str {
    match product_id.rfind('-') {
        Some(idx) if idx > 0 => &product_id[..idx],
        _ => product_id,
    }
}

/// Jaccard overlap of significant words (length > 3).
fn token_overlap(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .map(String::from)
            .collect()
    };
    let wa = words(a);
    let wb = words(b);
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let shared = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    shared / union
}

/// 1.0 for simultaneous, falling linearly to 0.0 at the window edge.
fn temporal_proximity(
    a: chrono::DateTime<chrono::Utc>,
    b: chrono::DateTime<chrono::Utc>,
    window: chrono::Duration,
) -> f64 {
    let dt = (a - b).num_seconds().unsigned_abs() as f64;
    let span = window.num_seconds().max(1) as f64;
    (1.0 - dt / span).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linking::policy::DETERMINISTIC_FLOOR;
    use crate::model::{Channel, InteractionStatus, Priority, Source};
    use chrono::Utc;

    fn make(
        external_id: &str,
        channel: Channel,
        order_id: Option<&str>,
        customer_id: Option<&str>,
        product_id: Option<&str>,
    ) -> Interaction {
        let now = Utc::now();
        Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            seller_id: "s1".into(),
            marketplace: "amazon".into(),
            channel,
            external_id: external_id.into(),
            text: "Hello, I have a question about my delivery".into(),
            rating: None,
            attachments: vec![],
            customer_id: customer_id.map(String::from),
            customer_name: None,
            order_id: order_id.map(String::from),
            product_id: product_id.map(String::from),
            status: InteractionStatus::Open,
            needs_response: true,
            priority: Priority::Normal,
            sla_deadline: None,
            escalated_at: None,
            source: Source::PrimaryApi,
            occurred_at: now,
            created_at: now,
            updated_at: now,
            extension: serde_json::json!({}),
        }
    }

    fn setup() -> (Arc<Database>, InteractionStore, LinkingEngine) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = InteractionStore::new(Arc::clone(&db));
        let engine = LinkingEngine::new(Arc::clone(&db), LinkConfig::default());
        (db, store, engine)
    }

    #[test]
    fn shared_order_id_links_at_099() {
        let (_db, store, engine) = setup();
        let review = make("r-1", Channel::Review, Some("ORD-1"), None, None);
        let chat = make("c-1", Channel::Chat, Some("ORD-1"), None, None);
        store.upsert(&review).unwrap();
        store.upsert(&chat).unwrap();

        let links = engine.link_interaction(&review).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].method, LinkMethod::OrderId);
        assert_eq!(links[0].confidence, CONFIDENCE_ORDER_ID);
        assert_eq!(links[0].target_interaction_id, chat.id);
    }

    #[test]
    fn earlier_interaction_gains_the_reverse_link() {
        let (db, store, engine) = setup();
        let review = make("r-early", Channel::Review, Some("ORD-3"), None, None);
        store.upsert(&review).unwrap();
        assert!(engine.link_interaction(&review).unwrap().is_empty());

        let chat = make("c-late", Channel::Chat, Some("ORD-3"), None, None);
        store.upsert(&chat).unwrap();
        engine.link_interaction(&chat).unwrap();

        let review_links = LinkStore::new(db).current_for_source(&review.id).unwrap();
        assert_eq!(review_links.len(), 1);
        assert_eq!(review_links[0].method, LinkMethod::OrderId);
        assert_eq!(review_links[0].target_interaction_id, chat.id);
    }

    #[test]
    fn shared_customer_id_links_at_095() {
        let (_db, store, engine) = setup();
        let a = make("q-1", Channel::Question, None, Some("cust-9"), None);
        let b = make("c-2", Channel::Chat, None, Some("cust-9"), None);
        store.upsert(&a).unwrap();
        store.upsert(&b).unwrap();

        let links = engine.link_interaction(&a).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].method, LinkMethod::CustomerId);
        assert_eq!(links[0].confidence, CONFIDENCE_CUSTOMER_ID);
    }

    #[test]
    fn order_match_wins_over_customer_match_for_same_target() {
        let (_db, store, engine) = setup();
        let a = make("q-2", Channel::Question, Some("ORD-7"), Some("cust-7"), None);
        let b = make("c-3", Channel::Chat, Some("ORD-7"), Some("cust-7"), None);
        store.upsert(&a).unwrap();
        store.upsert(&b).unwrap();

        let links = engine.link_interaction(&a).unwrap();
        // Deduped to the single strongest candidate per target.
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].method, LinkMethod::OrderId);
    }

    #[test]
    fn same_product_within_window_links_at_082() {
        let (_db, store, engine) = setup();
        let a = make("r-2", Channel::Review, None, None, Some("SKU-100-RED"));
        let b = make("q-3", Channel::Question, None, None, Some("SKU-100-RED"));
        store.upsert(&a).unwrap();
        store.upsert(&b).unwrap();

        let links = engine.link_interaction(&a).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].method, LinkMethod::ProductTimeWindow);
        assert_eq!(links[0].confidence, CONFIDENCE_PRODUCT_EXACT);
    }

    #[test]
    fn article_level_variant_links_at_078() {
        let (_db, store, engine) = setup();
        let a = make("r-3", Channel::Review, None, None, Some("SKU-100-RED"));
        let b = make("q-4", Channel::Question, None, None, Some("SKU-100-BLUE"));
        store.upsert(&a).unwrap();
        store.upsert(&b).unwrap();

        let links = engine.link_interaction(&a).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].confidence, CONFIDENCE_PRODUCT_ARTICLE);
    }

    #[test]
    fn product_match_outside_window_is_dropped() {
        let (_db, store, engine) = setup();
        let a = make("r-4", Channel::Review, None, None, Some("SKU-200-XL"));
        let mut b = make("q-5", Channel::Question, None, None, Some("SKU-200-XL"));
        b.occurred_at = a.occurred_at - LinkConfig::default().product_window - chrono::Duration::hours(1);
        store.upsert(&a).unwrap();
        store.upsert(&b).unwrap();

        let links = engine.link_interaction(&a).unwrap();
        assert!(links.iter().all(|l| l.method != LinkMethod::ProductTimeWindow));
    }

    #[test]
    fn probabilistic_confidence_stays_below_deterministic_floor() {
        let (_db, store, engine) = setup();
        let mut a = make("c-4", Channel::Chat, None, None, None);
        a.customer_name = Some("Johannes Mueller".into());
        a.text = "The charging cable stopped working after two weeks".into();
        let mut b = make("r-5", Channel::Review, None, None, None);
        b.customer_name = Some("Johannes Müller".into());
        b.text = "Charging cable stopped working, very disappointed".into();
        store.upsert(&a).unwrap();
        store.upsert(&b).unwrap();

        let links = engine.link_interaction(&a).unwrap();
        assert!(!links.is_empty());
        for link in &links {
            assert!(link.confidence < DETERMINISTIC_FLOOR);
            assert!(!link.method.is_deterministic());
            assert!(!crate::linking::policy::is_auto_actionable(link));
        }
    }

    #[test]
    fn unrelated_interactions_produce_no_links() {
        let (_db, store, engine) = setup();
        let a = make("c-5", Channel::Chat, None, None, None);
        let mut b = make("r-6", Channel::Review, None, None, None);
        b.text = "Completely different topic entirely unrelated words".into();
        b.occurred_at = a.occurred_at - chrono::Duration::days(13);
        store.upsert(&a).unwrap();
        store.upsert(&b).unwrap();

        let links = engine.link_interaction(&a).unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn article_of_strips_variant_suffix() {
        assert_eq!(article_of("SKU-100-RED"), "SKU-100");
        assert_eq!(article_of("PLAIN"), "PLAIN");
        assert_eq!(article_of("A-B"), "A");
    }

    #[test]
    fn token_overlap_basics() {
        assert_eq!(token_overlap("", "anything here"), 0.0);
        let same = token_overlap("broken charging cable", "broken charging cable");
        assert!((same - 1.0).abs() < f64::EPSILON);
    }
}
