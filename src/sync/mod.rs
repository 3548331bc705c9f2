//! Inbound sync pipeline: scheduler, per-pair orchestration, normalization.

pub mod normalize;
pub mod orchestrator;
pub mod scheduler;

pub use normalize::{IntentClassifier, KeywordIntentClassifier, NormalizeError, Normalizer};
pub use orchestrator::{SyncOrchestrator, SyncReport};
pub use scheduler::{spawn_sync_scheduler, SyncUnit};
