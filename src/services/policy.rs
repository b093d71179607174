//! Auto-apply policy: pure decision function, no I/O.

use crate::models::{ConfidenceLevel, MatchCandidate};

/// Numeric confidence threshold for a qualitative level.
pub fn threshold(level: ConfidenceLevel) -> f64 {
    match level {
        ConfidenceLevel::Low => 0.6,
        ConfidenceLevel::Medium => 0.75,
        ConfidenceLevel::High => 0.9,
        ConfidenceLevel::Exact => 1.0,
    }
}

/// Decide whether the top-ranked candidate qualifies for auto-apply.
///
/// `candidates` must be sorted descending by confidence, as returned by
/// the matching engine. Returns `None` when nothing qualifies, leaving
/// every candidate pending for manual review.
pub fn should_auto_apply(
    candidates: &[MatchCandidate],
    level: ConfidenceLevel,
) -> Option<&MatchCandidate> {
    let top = candidates.first()?;
    if top.confidence >= threshold(level) {
        Some(top)
    } else {
        None
    }
}
