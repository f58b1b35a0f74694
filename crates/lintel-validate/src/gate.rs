//! Multi-signal risk gating with a fatal-trigger bypass.
//!
//! Two tiers, intentionally separate:
//!
//! - **Soft disagreement**: several metrics drifting at once. Needs
//!   corroboration — a single borderline metric must not block a job,
//!   so the gate requires a configured minimum number of triggers.
//! - **Named invariant violated**: a fatal trigger (window removed,
//!   opening bricked up). Never needs corroboration; one is enough.

use std::collections::BTreeMap;

use crate::types::{ValidationMode, ValidationTrigger, metric_key};

/// Default minimum number of independent triggers for soft risk.
pub const DEFAULT_MIN_SIGNALS: usize = 2;

/// The aggregate gating decision procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskGate {
    /// Trigger count at which soft disagreement becomes risk.
    pub min_signals: usize,
}

impl Default for RiskGate {
    fn default() -> Self {
        Self {
            min_signals: DEFAULT_MIN_SIGNALS,
        }
    }
}

/// Outcome of gating one trigger set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// Any fatal trigger, or the trigger count met the gate.
    pub risk: bool,
    /// `!risk`, or the mode is `Log` (log mode never blocks).
    pub passed: bool,
}

impl RiskGate {
    /// Apply the decision procedure to a trigger set.
    #[must_use]
    pub fn decide(&self, triggers: &[ValidationTrigger], mode: ValidationMode) -> GateDecision {
        let has_fatal = triggers.iter().any(|t| t.fatal);
        let risk = has_fatal || triggers.len() >= self.min_signals;
        let passed = !risk || mode == ValidationMode::Log;
        GateDecision { risk, passed }
    }
}

/// Metric weights for the aggregate score.
const SCORE_WEIGHTS: [(&str, f64); 3] = [
    (metric_key::STRUCTURAL_MASK_IOU, 0.4),
    (metric_key::LINE_EDGE_IOU, 0.3),
    (metric_key::EDGE_IOU, 0.3),
];

/// Weighted average over whichever metrics were actually computed.
///
/// Weights renormalize over the present subset, so a run that skipped
/// a metric still produces a score — which also means scores from
/// runs with different metric subsets are not comparable. The score
/// is diagnostic-only and never feeds the gate.
#[must_use]
pub fn weighted_score(metrics: &BTreeMap<String, f64>) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (key, weight) in SCORE_WEIGHTS {
        if let Some(value) = metrics.get(key) {
            weighted_sum += value * weight;
            weight_total += weight;
        }
    }
    (weight_total > 0.0).then(|| weighted_sum / weight_total)
}
