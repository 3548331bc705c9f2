//! Per-pair sync orchestration.
//!
//! One call to [`SyncOrchestrator::sync_pair`] runs one tick for one
//! (seller, marketplace, channel) unit: page through the connector from
//! the stored watermark, normalize and upsert each item, link the changed
//! interactions, and advance the watermark only after the batch is
//! durably written. A pair already in flight is skipped, never queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, SyncConfig};
use crate::connectors::{call_with_retry, Connector, RateLimiterMap};
use crate::error::{ConnectorError, StoreError, SyncError};
use crate::linking::LinkingEngine;
use crate::model::PairKey;
use crate::store::{
    Database, EventStore, EventType, InteractionStore, SlaRuleStore, UpsertOutcome, WatermarkStore,
};
use crate::sync::normalize::Normalizer;

/// Outcome counts for one sync tick of one pair.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub pages: u32,
    pub inserted: u32,
    pub updated: u32,
    pub unchanged: u32,
    /// Malformed items logged and dropped.
    pub skipped: u32,
    /// The pair was already syncing; nothing was done.
    pub already_in_flight: bool,
}

impl SyncReport {
    fn in_flight() -> Self {
        Self {
            already_in_flight: true,
            ..Self::default()
        }
    }

    pub fn changed(&self) -> u32 {
        self.inserted + self.updated
    }
}

/// Removes the pair from the in-flight set when the tick ends, on every
/// exit path.
struct InFlightGuard<'a> {
    pairs: &'a Mutex<HashSet<PairKey>>,
    pair: PairKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.pairs
            .lock()
            .expect("in-flight mutex poisoned")
            .remove(&self.pair);
    }
}

/// Drives sync ticks against the store.
pub struct SyncOrchestrator {
    interactions: InteractionStore,
    watermarks: WatermarkStore,
    events: EventStore,
    sla_rules: SlaRuleStore,
    linking: LinkingEngine,
    normalizer: Normalizer,
    limiters: RateLimiterMap,
    cfg: SyncConfig,
    in_flight: Mutex<HashSet<PairKey>>,
}

impl SyncOrchestrator {
    pub fn new(db: Arc<Database>, normalizer: Normalizer, cfg: &EngineConfig) -> Self {
        Self {
            interactions: InteractionStore::new(Arc::clone(&db)),
            watermarks: WatermarkStore::new(Arc::clone(&db)),
            events: EventStore::new(Arc::clone(&db)),
            sla_rules: SlaRuleStore::new(Arc::clone(&db)),
            linking: LinkingEngine::new(db, cfg.linking.clone()),
            normalizer,
            limiters: RateLimiterMap::new(cfg.sync.rate_limit_per_sec, cfg.sync.rate_limit_burst),
            cfg: cfg.sync.clone(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// The shared limiter map, so the outbound path throttles against the
    /// same per-(seller, marketplace) budget as sync.
    pub fn limiters(&self) -> &RateLimiterMap {
        &self.limiters
    }

    /// Run one sync tick for one pair.
    pub async fn sync_pair(
        &self,
        pair: &PairKey,
        connector: &dyn Connector,
    ) -> Result<SyncReport, SyncError> {
        let _guard = {
            let mut in_flight = self.in_flight.lock().expect("in-flight mutex poisoned");
            if !in_flight.insert(pair.clone()) {
                debug!(pair = %pair, "Sync tick skipped, pair already in flight");
                return Ok(SyncReport::in_flight());
            }
            InFlightGuard {
                pairs: &self.in_flight,
                pair: pair.clone(),
            }
        };

        let watermark = self.watermarks.get_or_create(pair)?;
        let rules = self.sla_rules.for_seller(&pair.seller_id)?;
        let bucket = self.limiters.bucket(&pair.seller_id, &pair.marketplace);

        let mut report = SyncReport::default();
        let mut cursor = watermark.cursor.clone();

        while report.pages < self.cfg.max_pages_per_tick {
            let cursor_ref = cursor.as_deref();
            let page = match call_with_retry(&bucket, &self.cfg.retry, &pair.marketplace, "list_items", || {
                connector.list_items(cursor_ref, self.cfg.page_size)
            })
            .await
            {
                Ok(page) => page,
                Err(e) => return Err(self.on_page_failure(pair, e)),
            };
            report.pages += 1;

            let now = Utc::now();
            for item in &page.items {
                let interaction = match self.normalizer.normalize(pair, item, &rules, now) {
                    Ok(i) => i,
                    Err(e) => {
                        warn!(
                            pair = %pair,
                            external_id = %item.external_id,
                            error = %e,
                            "Dropping malformed item"
                        );
                        report.skipped += 1;
                        continue;
                    }
                };

                match self.interactions.upsert(&interaction)? {
                    UpsertOutcome::Inserted => {
                        report.inserted += 1;
                        self.relink(pair, &interaction.external_id);
                    }
                    UpsertOutcome::Updated => {
                        report.updated += 1;
                        self.relink(pair, &interaction.external_id);
                    }
                    UpsertOutcome::Unchanged => report.unchanged += 1,
                }
            }

            // The batch is durable; only now may the cursor move.
            self.advance_watermark(pair, page.next_cursor.as_deref())
                .await?;
            cursor = page.next_cursor;

            if !page.has_more {
                break;
            }
        }

        self.watermarks.record_success(pair, Utc::now())?;
        if report.changed() > 0 || report.skipped > 0 {
            info!(
                pair = %pair,
                pages = report.pages,
                inserted = report.inserted,
                updated = report.updated,
                unchanged = report.unchanged,
                skipped = report.skipped,
                "Sync tick finished"
            );
        }
        Ok(report)
    }

    /// Recompute links for the stored row behind one external id. A linking
    /// failure degrades that interaction's context, it must not abort the
    /// batch.
    fn relink(&self, pair: &PairKey, external_id: &str) {
        let stored = match self.interactions.get_by_external(pair, external_id) {
            Ok(Some(i)) => i,
            Ok(None) => return,
            Err(e) => {
                warn!(pair = %pair, external_id, error = %e, "Could not reload interaction for linking");
                return;
            }
        };
        if let Err(e) = self.linking.link_interaction(&stored) {
            warn!(id = %stored.id, error = %e, "Linking failed for interaction");
        }
    }

    /// Persist the new cursor, retrying a bounded number of times. The
    /// interactions are already durable, so losing the cursor only costs a
    /// redundant (idempotent) re-fetch, but a stuck watermark is surfaced
    /// loudly rather than retried forever.
    async fn advance_watermark(
        &self,
        pair: &PairKey,
        cursor: Option<&str>,
    ) -> Result<(), SyncError> {
        let mut last_err: Option<StoreError> = None;
        for attempt in 1..=self.cfg.watermark_retries {
            match self.watermarks.advance(pair, cursor) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(pair = %pair, attempt, error = %e, "Watermark write failed");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(u64::from(attempt) * 20)).await;
                }
            }
        }
        Err(SyncError::WatermarkStuck {
            attempts: self.cfg.watermark_retries,
            source: last_err.unwrap_or(StoreError::Query("watermark update failed".into())),
        })
    }

    /// Classify a page failure, bump the error streak, and raise the
    /// operational alert when the streak crosses the threshold.
    fn on_page_failure(&self, pair: &PairKey, err: ConnectorError) -> SyncError {
        let streak = match self.watermarks.record_failure(pair) {
            Ok(n) => n,
            Err(e) => {
                error!(pair = %pair, error = %e, "Could not record sync failure");
                0
            }
        };

        if streak == self.cfg.alert_after_errors {
            error!(
                pair = %pair,
                consecutive_errors = streak,
                error = %err,
                "Pair keeps failing to sync, operator attention needed"
            );
            let payload = serde_json::json!({
                "pair": pair.to_string(),
                "consecutive_errors": streak,
                "error": err.to_string(),
            });
            if let Err(e) = self.events.append(None, EventType::SyncAlert, payload) {
                error!(pair = %pair, error = %e, "Could not append sync alert event");
            }
        }

        match err {
            e @ ConnectorError::AuthFailed { .. } => SyncError::AuthBroken { source: e },
            e => SyncError::PageFetch {
                attempts: self.cfg.retry.max_attempts,
                source: e,
            },
        }
    }
}
