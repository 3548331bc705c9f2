//! Priority/SLA assignment and the periodic escalation sweep.

pub mod engine;
pub mod sweep;

pub use engine::{assign, AssignContext, Assignment};
pub use sweep::{spawn_sweep, EscalationSweep};
