//! Seller Inbox — multi-marketplace interaction ingestion, linking, and
//! safety-gated replies.

pub mod config;
pub mod connectors;
pub mod error;
pub mod guardrail;
pub mod linking;
pub mod metrics;
pub mod model;
pub mod outbound;
pub mod sla;
pub mod store;
pub mod sync;
