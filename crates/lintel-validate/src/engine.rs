//! The validation engine: compare a baseline/candidate pair and
//! produce a [`ValidationSummary`].
//!
//! Pure and synchronous: pixels in, summary out. Image loading, mask
//! caching, config resolution, and artifact persistence all live in
//! the orchestration layer.

use std::collections::BTreeMap;

use image::GrayImage;

use crate::edge::sobel_binary;
use crate::gate::{RiskGate, weighted_score};
use crate::iou::{IouOutcome, exclude_lower_iou, global_iou, structure_only_iou};
use crate::mask::{MaskExtractor, StructuralMask};
use crate::signal::{DetectorRegistry, ValidationContext};
use crate::types::{
    HardFailSwitches, StageId, StageThresholds, ValidationMode, ValidationSummary,
    ValidationTrigger, metric_key, trigger_id,
};

/// Default Sobel threshold for the structural/global edge maps.
pub const DEFAULT_EDGE_THRESHOLD: f32 = 80.0;

/// Default Sobel threshold for the fine-line edge maps. Lower than the
/// structural threshold so faint trim and frame lines register.
pub const DEFAULT_LINE_EDGE_THRESHOLD: f32 = 40.0;

/// Default fraction of bottom rows excluded for enhanced-baseline
/// stages (furniture-heavy floor region).
pub const DEFAULT_EXCLUDE_LOWER_PCT: f64 = 0.30;

/// Minimum mask coverage (fraction of image area) for the structural
/// IoU to be statistically meaningful.
pub const DEFAULT_MIN_MASK_FRACTION: f64 = 0.005;

/// Per-run engine policy, resolved by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// Stage threshold set.
    pub thresholds: StageThresholds,
    /// Hard-fail switches for forwarded detector triggers.
    pub switches: HardFailSwitches,
    /// Multi-signal gate.
    pub gate: RiskGate,
    /// Sobel threshold for the structural/global edge maps.
    pub edge_threshold: f32,
    /// Sobel threshold for the fine-line edge maps.
    pub line_edge_threshold: f32,
    /// Bottom-row exclusion for enhanced-baseline stages.
    pub exclude_lower_pct: f64,
    /// Minimum meaningful mask coverage.
    pub min_mask_fraction: f64,
}

impl EngineOptions {
    /// Defaults for the given stage.
    #[must_use]
    pub fn for_stage(stage: StageId) -> Self {
        Self {
            thresholds: StageThresholds::defaults_for(stage),
            switches: HardFailSwitches::default(),
            gate: RiskGate::default(),
            edge_threshold: DEFAULT_EDGE_THRESHOLD,
            line_edge_threshold: DEFAULT_LINE_EDGE_THRESHOLD,
            exclude_lower_pct: DEFAULT_EXCLUDE_LOWER_PCT,
            min_mask_fraction: DEFAULT_MIN_MASK_FRACTION,
        }
    }
}

/// One validation call's inputs.
pub struct ValidationInput<'a> {
    /// Stage under validation.
    pub stage: StageId,
    /// Resolved mode.
    pub mode: ValidationMode,
    /// Baseline pixels (the image held constant for this stage).
    pub baseline: &'a GrayImage,
    /// Candidate pixels (the generated output being checked).
    pub candidate: &'a GrayImage,
    /// Cached baseline mask, if the caller has one.
    pub baseline_mask: Option<&'a StructuralMask>,
    /// Cached candidate mask, if the caller has one.
    pub candidate_mask: Option<&'a StructuralMask>,
    /// Scene label from the classifier, when known.
    pub scene: Option<&'a str>,
}

/// Run all checks for one baseline/candidate pair and gate the result.
///
/// Never fails: every error condition degrades to a trigger or a
/// `debug` annotation inside the returned summary, per the propagation
/// policy (only fatal triggers and the aggregate gate halt a job).
#[must_use]
pub fn validate_images(
    input: &ValidationInput<'_>,
    opts: &EngineOptions,
    extractor: &dyn MaskExtractor,
    registry: &DetectorRegistry,
) -> ValidationSummary {
    let mut triggers: Vec<ValidationTrigger> = Vec::new();
    let mut metrics: BTreeMap<String, f64> = BTreeMap::new();
    let mut debug: BTreeMap<String, String> = BTreeMap::new();

    let mut baseline_mask: Option<StructuralMask> = None;
    let mut candidate_mask: Option<StructuralMask> = None;

    let base_dims = input.baseline.dimensions();
    let cand_dims = input.candidate.dimensions();

    if base_dims == cand_dims {
        let (own_base, own_cand) = resolve_masks(input, extractor, &mut triggers, &mut debug);
        baseline_mask = own_base;
        candidate_mask = own_cand;

        compute_pixel_metrics(
            input,
            opts,
            input.baseline_mask.or(baseline_mask.as_ref()),
            input.candidate_mask.or(candidate_mask.as_ref()),
            &mut triggers,
            &mut metrics,
            &mut debug,
        );
    } else {
        // Never auto-resize: comparing against a distorted proxy would
        // manufacture agreement or disagreement that isn't in the
        // images. Record the mismatch and skip pixel metrics.
        triggers.push(
            ValidationTrigger::new(
                trigger_id::DIMENSION_MISMATCH,
                input.stage,
                format!(
                    "baseline is {}x{} but candidate is {}x{}",
                    base_dims.0, base_dims.1, cand_dims.0, cand_dims.1
                ),
            ),
        );
        debug.insert(
            "pixel_metrics".to_owned(),
            "skipped: dimension mismatch".to_owned(),
        );
    }

    // Semantic detectors run even when pixel metrics were skipped;
    // they do their own geometry handling.
    let ctx = ValidationContext {
        stage: input.stage,
        baseline: input.baseline,
        candidate: input.candidate,
        baseline_mask: input.baseline_mask.or(baseline_mask.as_ref()),
        candidate_mask: input.candidate_mask.or(candidate_mask.as_ref()),
        scene: input.scene,
    };
    let (detector_triggers, detector_errors) = registry.run(&ctx, opts.switches);
    triggers.extend(detector_triggers);
    for (id, message) in detector_errors {
        debug.insert(format!("detector_error:{id}"), message);
    }

    let score = weighted_score(&metrics);
    if let Some(s) = score {
        if s < opts.thresholds.unified_min {
            // Diagnostic annotation only: the aggregate score is not
            // comparable across runs with different metric subsets,
            // so it never feeds the gate.
            debug.insert(
                "unified_score".to_owned(),
                format!("{s:.4} below unified_min {:.4}", opts.thresholds.unified_min),
            );
        }
    }

    let decision = opts.gate.decide(&triggers, input.mode);

    ValidationSummary {
        stage: input.stage,
        mode: input.mode,
        passed: decision.passed,
        risk: decision.risk,
        score,
        triggers,
        metrics,
        debug,
    }
}

/// Compute masks for any side the caller did not supply.
fn resolve_masks(
    input: &ValidationInput<'_>,
    extractor: &dyn MaskExtractor,
    triggers: &mut Vec<ValidationTrigger>,
    debug: &mut BTreeMap<String, String>,
) -> (Option<StructuralMask>, Option<StructuralMask>) {
    let mut own_base = None;
    let mut own_cand = None;

    if input.baseline_mask.is_none() {
        match extractor.extract(input.baseline) {
            Ok(mask) => own_base = Some(mask),
            Err(err) => {
                triggers.push(ValidationTrigger::new(
                    trigger_id::MASK_ERROR,
                    input.stage,
                    format!("baseline mask extraction failed: {err}"),
                ));
                debug.insert(
                    metric_key::STRUCTURAL_MASK_IOU.to_owned(),
                    "skipped: baseline mask error".to_owned(),
                );
            }
        }
    }

    if input.candidate_mask.is_none() {
        match extractor.extract(input.candidate) {
            Ok(mask) => own_cand = Some(mask),
            Err(err) => {
                // The candidate mask only feeds semantic detectors;
                // its loss is an annotation, not a second trigger.
                debug.insert(
                    "candidate_mask".to_owned(),
                    format!("extraction failed: {err}"),
                );
            }
        }
    }

    (own_base, own_cand)
}

/// Compute the three IoU metrics and their threshold triggers.
#[allow(clippy::too_many_arguments)]
fn compute_pixel_metrics(
    input: &ValidationInput<'_>,
    opts: &EngineOptions,
    baseline_mask: Option<&StructuralMask>,
    candidate_mask: Option<&StructuralMask>,
    triggers: &mut Vec<ValidationTrigger>,
    metrics: &mut BTreeMap<String, f64>,
    debug: &mut BTreeMap<String, String>,
) {
    let edges_base = sobel_binary(input.baseline, opts.edge_threshold);
    let edges_cand = sobel_binary(input.candidate, opts.edge_threshold);
    let lines_base = sobel_binary(input.baseline, opts.line_edge_threshold);
    let lines_cand = sobel_binary(input.candidate, opts.line_edge_threshold);

    // Structure-only IoU: edge agreement within the dilated union of
    // both masks, so removed and invented structure are both seen.
    // Requires the baseline mask; the candidate mask alone would let
    // a candidate that erased all structure define the whole region.
    if let Some(base_mask) = baseline_mask {
        let mask = match candidate_mask {
            Some(cand_mask) => base_mask.union(cand_mask),
            None => base_mask.clone(),
        };
        let mask = &mask;
        if mask.area_fraction() < opts.min_mask_fraction {
            debug.insert(
                metric_key::STRUCTURAL_MASK_IOU.to_owned(),
                format!(
                    "skipped: mask_too_small ({:.4} of image area)",
                    mask.area_fraction()
                ),
            );
        } else {
            record_metric(
                metric_key::STRUCTURAL_MASK_IOU,
                trigger_id::STRUCTURAL_MASK_IOU,
                structure_only_iou(&edges_base, &edges_cand, mask),
                opts.thresholds.struct_iou_min,
                "structure-only IoU",
                input.stage,
                triggers,
                metrics,
                debug,
            );
        }
    }

    // Global edge IoU.
    record_metric(
        metric_key::EDGE_IOU,
        trigger_id::EDGE_IOU,
        global_iou(&edges_base, &edges_cand),
        opts.thresholds.edge_iou_min,
        "global edge IoU",
        input.stage,
        triggers,
        metrics,
        debug,
    );

    // Fine-line edge IoU, region-restricted per stage: Stage 1A
    // compares the full frame; enhanced-baseline stages ignore the
    // furniture-heavy lower rows.
    let line_outcome = if input.stage.enhanced_baseline() {
        let pct = scene_adjusted_exclude(opts.exclude_lower_pct, input.scene);
        debug.insert("exclude_lower_pct".to_owned(), format!("{pct:.2}"));
        exclude_lower_iou(&lines_base, &lines_cand, pct)
    } else {
        global_iou(&lines_base, &lines_cand)
    };
    record_metric(
        metric_key::LINE_EDGE_IOU,
        trigger_id::LINE_EDGE_IOU,
        line_outcome,
        opts.thresholds.line_edge_min,
        "fine-line edge IoU",
        input.stage,
        triggers,
        metrics,
        debug,
    );
}

/// Exterior scenes have less furniture-dominated floor area, so only
/// half the configured fraction is excluded.
fn scene_adjusted_exclude(configured: f64, scene: Option<&str>) -> f64 {
    match scene {
        Some("exterior") => configured / 2.0,
        _ => configured,
    }
}

/// Record one IoU outcome: metric on success, skip reason on empty
/// union, trigger on undershoot.
#[allow(clippy::too_many_arguments)]
fn record_metric(
    metric: &str,
    trigger: &str,
    outcome: IouOutcome,
    minimum: f64,
    label: &str,
    stage: StageId,
    triggers: &mut Vec<ValidationTrigger>,
    metrics: &mut BTreeMap<String, f64>,
    debug: &mut BTreeMap<String, String>,
) {
    match outcome.value {
        Some(value) => {
            metrics.insert(metric.to_owned(), value);
            if value < minimum {
                triggers.push(
                    ValidationTrigger::new(
                        trigger,
                        stage,
                        format!("{label} {value:.4} below stage minimum {minimum:.4}"),
                    )
                    .with_metric(value, minimum),
                );
            }
        }
        None => {
            debug.insert(metric.to_owned(), "skipped: empty_union".to_owned());
        }
    }
}
