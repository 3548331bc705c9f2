use std::sync::Arc;
use std::sync::atomic::Ordering;

use seller_inbox::config::EngineConfig;
use seller_inbox::connectors::ConnectorRegistry;
use seller_inbox::sla::{spawn_sweep, EscalationSweep};
use seller_inbox::store::Database;
use seller_inbox::sync::{
    spawn_sync_scheduler, KeywordIntentClassifier, Normalizer, SyncOrchestrator, SyncUnit,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cfg = EngineConfig::from_env();

    eprintln!("📬 Seller Inbox v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", cfg.db_path);
    eprintln!("   Sync interval: {}s", cfg.sync.sync_interval.as_secs());
    eprintln!("   Sweep interval: {}s\n", cfg.sla.sweep_interval.as_secs());

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(Database::open(&cfg.db_path).unwrap_or_else(|e| {
        eprintln!("Error: Failed to open database at {}: {}", cfg.db_path, e);
        std::process::exit(1);
    }));

    // ── Connectors ───────────────────────────────────────────────────────
    // Marketplace integrations register their factories here; each
    // deployment ships its own connector crate set.
    let registry = ConnectorRegistry::new();
    if registry.is_empty() {
        tracing::warn!("No connectors registered, sync will idle until units are configured");
    } else {
        for (marketplace, channel) in registry.roster() {
            tracing::info!(marketplace = %marketplace, channel = channel.as_str(), "Connector registered");
        }
    }

    // ── Sync pipeline ────────────────────────────────────────────────────
    let normalizer = Normalizer::new(Arc::new(KeywordIntentClassifier::new()), cfg.sla.clone());
    let orchestrator = Arc::new(SyncOrchestrator::new(Arc::clone(&db), normalizer, &cfg));
    let units: Vec<SyncUnit> = Vec::new();
    let (sync_handle, sync_shutdown) = spawn_sync_scheduler(
        orchestrator,
        units,
        cfg.sync.sync_interval,
        cfg.sync.max_concurrent_syncs,
    );

    // ── Escalation sweep ─────────────────────────────────────────────────
    let sweep = Arc::new(EscalationSweep::new(Arc::clone(&db)));
    let (sweep_handle, sweep_shutdown) = spawn_sweep(sweep, cfg.sla.sweep_interval);

    tokio::signal::ctrl_c().await?;
    eprintln!("\nShutting down…");

    sync_shutdown.store(true, Ordering::Relaxed);
    sweep_shutdown.store(true, Ordering::Relaxed);
    let _ = sync_handle.await;
    let _ = sweep_handle.await;

    Ok(())
}
