//! Shared types for the structural validation engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference pixel
/// buffers without depending on `image` directly.
pub use image::GrayImage;

/// Identifier for one enhancement stage of the pipeline.
///
/// The stage determines which baseline the candidate is compared
/// against and which threshold set applies:
///
/// - [`Stage1A`](Self::Stage1A) (quality lift) is compared against the
///   original upload with tight tolerances.
/// - [`Stage1B`](Self::Stage1B) (declutter) and [`Stage2`](Self::Stage2)
///   (virtual staging) are compared against the Stage 1A output, where
///   some legitimate pixel drift from furniture changes is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageId {
    /// Quality lift: exposure, color, sharpness.
    #[serde(rename = "stage1A")]
    Stage1A,
    /// Declutter: removal of movable items.
    #[serde(rename = "stage1B")]
    Stage1B,
    /// Virtual staging: furniture insertion.
    #[serde(rename = "stage2")]
    Stage2,
}

impl StageId {
    /// All stages in pipeline order.
    pub const ALL: [Self; 3] = [Self::Stage1A, Self::Stage1B, Self::Stage2];

    /// Stable wire name, matching the serde representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stage1A => "stage1A",
            Self::Stage1B => "stage1B",
            Self::Stage2 => "stage2",
        }
    }

    /// Whether this stage compares against an already-enhanced baseline
    /// (rather than the original upload).
    #[must_use]
    pub const fn enhanced_baseline(self) -> bool {
        !matches!(self, Self::Stage1A)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a failed validation annotates the job (`Log`) or actually
/// fails it (`Block`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Record the summary for audit; never block the job.
    Log,
    /// Surface a risky summary as a job failure.
    Block,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Log => "log",
            Self::Block => "block",
        })
    }
}

/// Immutable per-stage numeric policy.
///
/// Stage 1A compares against the original upload, so its tolerances are
/// tight. Stage 1B/2 compare against an already-enhanced baseline where
/// staging and furniture changes cause legitimate pixel drift, so their
/// tolerances are looser.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageThresholds {
    /// Minimum structure-only IoU (edge agreement within the dilated
    /// structural mask).
    pub struct_iou_min: f64,
    /// Minimum global edge IoU.
    pub edge_iou_min: f64,
    /// Minimum fine-line edge IoU (region-restricted per stage).
    pub line_edge_min: f64,
    /// Minimum aggregate score. Diagnostic-only: recorded in `debug`
    /// when undershot, never gated on.
    pub unified_min: f64,
}

impl StageThresholds {
    /// Default thresholds for the given stage.
    #[must_use]
    pub const fn defaults_for(stage: StageId) -> Self {
        match stage {
            StageId::Stage1A => Self {
                struct_iou_min: 0.80,
                edge_iou_min: 0.60,
                line_edge_min: 0.55,
                unified_min: 0.70,
            },
            StageId::Stage1B => Self {
                struct_iou_min: 0.70,
                edge_iou_min: 0.45,
                line_edge_min: 0.40,
                unified_min: 0.60,
            },
            StageId::Stage2 => Self {
                struct_iou_min: 0.70,
                edge_iou_min: 0.40,
                line_edge_min: 0.35,
                unified_min: 0.55,
            },
        }
    }
}

/// Hard-fail switches: when set, a detected change of that kind becomes
/// a fatal trigger regardless of how many total triggers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardFailSwitches {
    /// A window appearing or disappearing is fatal.
    pub block_on_window_count_change: bool,
    /// A window moving is fatal.
    pub block_on_window_position_change: bool,
    /// A door or opening being created or closed is fatal.
    pub block_on_openings_delta: bool,
}

impl Default for HardFailSwitches {
    fn default() -> Self {
        Self {
            block_on_window_count_change: true,
            block_on_window_position_change: true,
            block_on_openings_delta: true,
        }
    }
}

/// Stable trigger identifiers.
///
/// These strings appear in persisted summaries and debug artifacts and
/// are consumed by offline tooling; treat them as a wire format.
pub mod trigger_id {
    /// Structure-only IoU under the stage minimum.
    pub const STRUCTURAL_MASK_IOU: &str = "structural_mask_iou";
    /// Global edge IoU under the stage minimum.
    pub const EDGE_IOU: &str = "edge_iou";
    /// Fine-line edge IoU under the stage minimum.
    pub const LINE_EDGE_IOU: &str = "line_edge_iou";
    /// Baseline and candidate dimensions differ.
    pub const DIMENSION_MISMATCH: &str = "dimension_mismatch";
    /// Image metadata could not be read.
    pub const METADATA_ERROR: &str = "metadata_error";
    /// Structural mask extraction failed.
    pub const MASK_ERROR: &str = "mask_error";
    /// Rendered window count changed.
    pub const WINDOW_COUNT_CHANGE: &str = "window_count_change";
    /// A window moved.
    pub const WINDOW_POSITION_CHANGE: &str = "window_position_change";
    /// A door or opening was created or closed.
    pub const OPENINGS_DELTA: &str = "openings_delta";
}

/// Metric keys used in [`ValidationSummary::metrics`].
pub mod metric_key {
    /// Structure-only IoU (dilated structural mask).
    pub const STRUCTURAL_MASK_IOU: &str = "structural_mask_iou";
    /// Global edge IoU.
    pub const EDGE_IOU: &str = "edge_iou";
    /// Fine-line edge IoU (region-restricted per stage).
    pub const LINE_EDGE_IOU: &str = "line_edge_iou";
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationTrigger {
    /// Stable identifier from [`trigger_id`].
    pub id: String,
    /// Human-readable description of what failed.
    pub message: String,
    /// Measured value, when the check is numeric.
    pub value: Option<f64>,
    /// Threshold the value was compared against.
    pub threshold: Option<f64>,
    /// Stage the check ran under.
    pub stage: StageId,
    /// Whether this trigger bypasses multi-signal gating.
    pub fatal: bool,
}

impl ValidationTrigger {
    /// Create a non-fatal trigger with no numeric payload.
    #[must_use]
    pub fn new(id: &str, stage: StageId, message: impl Into<String>) -> Self {
        Self {
            id: id.to_owned(),
            message: message.into(),
            value: None,
            threshold: None,
            stage,
            fatal: false,
        }
    }

    /// Attach the measured value and the threshold it failed against.
    #[must_use]
    pub const fn with_metric(mut self, value: f64, threshold: f64) -> Self {
        self.value = Some(value);
        self.threshold = Some(threshold);
        self
    }

    /// Mark the trigger fatal.
    #[must_use]
    pub const fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

/// Outcome of one validation run.
///
/// Created fresh per call and never mutated after return. Attached to
/// the job record for audit and optionally persisted as a debug
/// artifact when `risk` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Stage the run validated.
    pub stage: StageId,
    /// Mode the run resolved to.
    pub mode: ValidationMode,
    /// `true` when `!risk` or the mode is [`ValidationMode::Log`].
    pub passed: bool,
    /// `true` iff any trigger is fatal or the trigger count meets the
    /// minimum-signals gate.
    pub risk: bool,
    /// Weighted average of the computed metrics. `None` when no metric
    /// was computable. Diagnostic-only: the weights renormalize over
    /// whichever metrics were present, so scores from runs that
    /// computed different metric subsets are not comparable.
    pub score: Option<f64>,
    /// One entry per failed check.
    pub triggers: Vec<ValidationTrigger>,
    /// Computed metric values, keyed by [`metric_key`] names. Skipped
    /// metrics are absent, never coerced to a number.
    pub metrics: BTreeMap<String, f64>,
    /// Skip reasons, timings, and other non-numeric annotations.
    pub debug: BTreeMap<String, String>,
}

impl ValidationSummary {
    /// Whether any trigger carries the given id.
    #[must_use]
    pub fn has_trigger(&self, id: &str) -> bool {
        self.triggers.iter().any(|t| t.id == id)
    }
}

/// Errors surfaced by the pure engine.
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wire_names_are_stable() {
        assert_eq!(StageId::Stage1A.as_str(), "stage1A");
        assert_eq!(StageId::Stage1B.as_str(), "stage1B");
        assert_eq!(StageId::Stage2.as_str(), "stage2");
    }

    #[test]
    fn stage_serde_uses_wire_names() {
        let json = serde_json::to_string(&StageId::Stage1B).unwrap();
        assert_eq!(json, "\"stage1B\"");
        let back: StageId = serde_json::from_str("\"stage2\"").unwrap();
        assert_eq!(back, StageId::Stage2);
    }

    #[test]
    fn only_stage1a_uses_the_original_baseline() {
        assert!(!StageId::Stage1A.enhanced_baseline());
        assert!(StageId::Stage1B.enhanced_baseline());
        assert!(StageId::Stage2.enhanced_baseline());
    }

    #[test]
    fn mode_serde_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&ValidationMode::Block).unwrap(),
            "\"block\""
        );
        let back: ValidationMode = serde_json::from_str("\"log\"").unwrap();
        assert_eq!(back, ValidationMode::Log);
    }

    #[test]
    fn stage1a_thresholds_are_tightest() {
        let a = StageThresholds::defaults_for(StageId::Stage1A);
        let b = StageThresholds::defaults_for(StageId::Stage1B);
        let c = StageThresholds::defaults_for(StageId::Stage2);
        assert!(a.struct_iou_min > b.struct_iou_min);
        assert!(a.edge_iou_min > b.edge_iou_min);
        assert!(b.edge_iou_min >= c.edge_iou_min);
    }

    #[test]
    fn hard_fail_switches_default_on() {
        let s = HardFailSwitches::default();
        assert!(s.block_on_window_count_change);
        assert!(s.block_on_window_position_change);
        assert!(s.block_on_openings_delta);
    }

    #[test]
    fn trigger_builder_sets_fields() {
        let t = ValidationTrigger::new(trigger_id::EDGE_IOU, StageId::Stage1A, "edge IoU low")
            .with_metric(0.42, 0.60)
            .fatal();
        assert_eq!(t.id, "edge_iou");
        assert_eq!(t.value, Some(0.42));
        assert_eq!(t.threshold, Some(0.60));
        assert!(t.fatal);
    }

    #[test]
    fn summary_serde_round_trip() {
        let summary = ValidationSummary {
            stage: StageId::Stage1A,
            mode: ValidationMode::Block,
            passed: false,
            risk: true,
            score: Some(0.91),
            triggers: vec![ValidationTrigger::new(
                trigger_id::WINDOW_COUNT_CHANGE,
                StageId::Stage1A,
                "window count changed from 2 to 1",
            )
            .fatal()],
            metrics: [(metric_key::EDGE_IOU.to_owned(), 0.93)].into(),
            debug: [(String::from("scene"), String::from("interior"))].into(),
        };
        let json = serde_json::to_string(&summary).unwrap();
        let back: ValidationSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(summary, back);
    }
}
