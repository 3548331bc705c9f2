//! Cross-channel linking: deterministic and probabilistic tiers plus the
//! auto-action policy.

pub mod engine;
pub mod policy;

pub use engine::LinkingEngine;
pub use policy::{is_auto_actionable, AUTO_ACTION_THRESHOLD};
