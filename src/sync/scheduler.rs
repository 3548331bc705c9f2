//! Sync scheduler — periodic fan-out of pair ticks with a concurrency cap.
//!
//! Every interval, each registered unit gets one tick. Tick tasks are
//! spawned, never awaited, so a slow or failing pair cannot delay the next
//! interval for the others; a unit still running when its next tick fires
//! is skipped by the orchestrator's in-flight set rather than queued
//! behind itself. The semaphore alone bounds how many units sync at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connectors::Connector;
use crate::model::PairKey;
use crate::sync::orchestrator::SyncOrchestrator;

/// One schedulable sync unit.
#[derive(Clone)]
pub struct SyncUnit {
    pub pair: PairKey,
    pub connector: Arc<dyn Connector>,
}

impl SyncUnit {
    pub fn new(pair: PairKey, connector: Arc<dyn Connector>) -> Self {
        Self { pair, connector }
    }
}

/// Spawn the scheduler loop. Returns a `JoinHandle` and a shutdown flag;
/// set the flag to stop after the current interval.
pub fn spawn_sync_scheduler(
    orchestrator: Arc<SyncOrchestrator>,
    units: Vec<SyncUnit>,
    interval: Duration,
    max_concurrent: usize,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            units = units.len(),
            interval_secs = interval.as_secs(),
            max_concurrent,
            "Sync scheduler started"
        );
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                info!("Sync scheduler shutting down");
                return;
            }

            for unit in &units {
                let semaphore = Arc::clone(&semaphore);
                let orchestrator = Arc::clone(&orchestrator);
                let unit = unit.clone();
                tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => return,
                    };
                    if let Err(e) = orchestrator.sync_pair(&unit.pair, unit.connector.as_ref()).await
                    {
                        warn!(pair = %unit.pair, error = %e, "Sync tick failed");
                    }
                });
            }
        }
    });

    (handle, shutdown_flag)
}
