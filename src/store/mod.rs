//! Persistence layer — SQLite-backed storage for interactions, watermarks,
//! SLA rules, link candidates, and the event log.

pub mod db;
pub mod events;
pub mod interactions;
pub mod links;
pub mod sla_rules;
pub mod watermarks;

pub use db::Database;
pub use events::{EventStore, EventType, InteractionEvent};
pub use interactions::{InteractionStore, UpsertOutcome};
pub use links::{LinkCandidate, LinkMethod, LinkStore};
pub use sla_rules::{SlaRule, SlaRuleStore};
pub use watermarks::{SyncWatermark, WatermarkStore};
