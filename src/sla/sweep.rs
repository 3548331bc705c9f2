//! Periodic escalation sweep.
//!
//! Re-evaluates open, unresponded interactions whose deadline has passed:
//! each is promoted exactly one priority level (capped at `urgent`) and
//! stamped so the same breach is never promoted twice. This sweep is the
//! only code path permitted to raise priority after creation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::store::{Database, EventStore, EventType, InteractionStore};

/// Escalation sweep over the interaction store.
pub struct EscalationSweep {
    interactions: InteractionStore,
    events: EventStore,
}

impl EscalationSweep {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            interactions: InteractionStore::new(Arc::clone(&db)),
            events: EventStore::new(db),
        }
    }

    /// Run one sweep pass. Returns how many interactions were escalated.
    pub fn sweep_once(&self) -> Result<u32, StoreError> {
        let now = Utc::now();
        let overdue = self.interactions.overdue_unescalated(now)?;
        let mut escalated = 0u32;

        for interaction in overdue {
            let from = interaction.priority;
            let to = from.promote();
            self.interactions.mark_escalated(&interaction.id, to, now)?;
            self.events.append(
                Some(&interaction.id),
                EventType::Escalated,
                serde_json::json!({
                    "from": from.as_str(),
                    "to": to.as_str(),
                    "deadline": interaction.sla_deadline.map(|d| d.to_rfc3339()),
                }),
            )?;
            info!(
                id = %interaction.id,
                from = from.as_str(),
                to = to.as_str(),
                "SLA deadline breached, priority escalated"
            );
            escalated += 1;
        }

        Ok(escalated)
    }
}

/// Spawn the sweep on its own timer, independent of the sync scheduler.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop.
pub fn spawn_sweep(sweep: Arc<EscalationSweep>, interval: Duration) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Escalation sweep started — every {}s", interval.as_secs());
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                info!("Escalation sweep shutting down");
                return;
            }

            let started = Instant::now();
            match sweep.sweep_once() {
                Ok(0) => {}
                Ok(n) => info!(count = n, "Sweep escalated overdue interactions"),
                Err(e) => error!("Escalation sweep failed: {e}"),
            }
            log_slow_sweep(started.elapsed(), interval);
        }
    });

    (handle, shutdown_flag)
}

/// Warn when a sweep pass ran longer than its interval. Returns whether
/// the pass was flagged.
pub fn log_slow_sweep(elapsed: Duration, interval: Duration) -> bool {
    if elapsed > interval {
        warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            interval_ms = interval.as_millis() as u64,
            "Sweep pass exceeded its interval"
        );
        return true;
    }
    false
}
