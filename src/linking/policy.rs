//! Auto-action policy — the single gate deciding whether a link may drive
//! automated behavior.
//!
//! Every caller that lets a link influence behavior (duplicate-draft
//! suppression, prior-context surfacing) must go through
//! [`is_auto_actionable`]; the threshold is defined here and nowhere else.

use crate::store::LinkCandidate;

/// Fixed confidence for an exact order-id match.
pub const CONFIDENCE_ORDER_ID: f64 = 0.99;
/// Fixed confidence for an exact customer-id match.
pub const CONFIDENCE_CUSTOMER_ID: f64 = 0.95;
/// Fixed confidence for the same product id within the time window.
pub const CONFIDENCE_PRODUCT_EXACT: f64 = 0.82;
/// Fixed confidence for an article-level product match within the window.
pub const CONFIDENCE_PRODUCT_ARTICLE: f64 = 0.78;

/// Lowest deterministic confidence. Probabilistic scores must stay
/// strictly below this so the two tiers are never indistinguishable.
pub const DETERMINISTIC_FLOOR: f64 = CONFIDENCE_PRODUCT_ARTICLE;

/// Upper bound applied to every probabilistic score.
pub const PROBABILISTIC_CEILING: f64 = 0.75;

/// Minimum confidence for any automated action on a link.
pub const AUTO_ACTION_THRESHOLD: f64 = 0.85;

/// Whether automated behavior may be gated on this link.
///
/// Requires a deterministic method AND confidence at or above the
/// threshold; everything else is assist-only (visible to a human, never
/// acted on automatically).
pub fn is_auto_actionable(link: &LinkCandidate) -> bool {
    link.method.is_deterministic() && link.confidence >= AUTO_ACTION_THRESHOLD
}
