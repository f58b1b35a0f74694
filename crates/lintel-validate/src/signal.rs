//! Change-detector signals: pluggable semantic analyzers.
//!
//! Window count/position and opening creation/closure are detected by
//! external services (typically model-backed). The engine consumes
//! them as a registry of [`ChangeDetector`] implementations so that
//! optional sub-validators compose through one seam instead of ad hoc
//! conditional wiring.
//!
//! A detector failure is never allowed to block a job: a secondary
//! signal's unavailability must not silently escalate to a rejection.
//! Errors are logged, recorded in the summary's `debug` map, and
//! otherwise ignored.

use image::GrayImage;

use crate::mask::StructuralMask;
use crate::types::{HardFailSwitches, StageId, ValidationTrigger, trigger_id};

/// Everything a detector may inspect for one validation call.
pub struct ValidationContext<'a> {
    /// Stage under validation.
    pub stage: StageId,
    /// Baseline grayscale pixels.
    pub baseline: &'a GrayImage,
    /// Candidate grayscale pixels.
    pub candidate: &'a GrayImage,
    /// Structural mask of the baseline, when available.
    pub baseline_mask: Option<&'a StructuralMask>,
    /// Structural mask of the candidate, when available.
    pub candidate_mask: Option<&'a StructuralMask>,
    /// Scene label from the classifier, when known.
    pub scene: Option<&'a str>,
}

/// A change detector could not produce a result.
#[derive(Debug, thiserror::Error)]
#[error("change detector failed: {0}")]
pub struct SignalError(pub String);

/// A semantic change detector.
///
/// Implementations return one trigger per detected change, using the
/// stable ids from [`trigger_id`]. The registry decides fatality from
/// the configured [`HardFailSwitches`]; detectors should not mark
/// their own triggers fatal.
pub trait ChangeDetector: Send + Sync {
    /// Stable identifier, used in logs and debug annotations.
    fn id(&self) -> &'static str;

    /// Inspect the baseline/candidate pair.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError`] when the detector cannot run; the
    /// registry downgrades this to a debug annotation.
    fn detect(&self, ctx: &ValidationContext<'_>) -> Result<Vec<ValidationTrigger>, SignalError>;
}

/// Composable set of change detectors.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn ChangeDetector>>,
}

impl DetectorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detector.
    pub fn register(&mut self, detector: Box<dyn ChangeDetector>) {
        self.detectors.push(detector);
    }

    /// Number of registered detectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Whether the registry has no detectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector, collecting triggers and per-detector errors.
    ///
    /// Triggers whose id matches an enabled hard-fail switch are
    /// marked fatal. Detector errors are returned as `(detector id,
    /// message)` pairs for the caller to record; they never abort the
    /// run.
    #[must_use]
    pub fn run(
        &self,
        ctx: &ValidationContext<'_>,
        switches: HardFailSwitches,
    ) -> (Vec<ValidationTrigger>, Vec<(String, String)>) {
        let mut triggers = Vec::new();
        let mut errors = Vec::new();

        for detector in &self.detectors {
            match detector.detect(ctx) {
                Ok(found) => {
                    for trigger in found {
                        triggers.push(apply_switches(trigger, switches));
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        detector = detector.id(),
                        error = %err,
                        "change detector failed; ignoring its signal"
                    );
                    errors.push((detector.id().to_owned(), err.to_string()));
                }
            }
        }

        (triggers, errors)
    }
}

/// Promote a trigger to fatal when its id matches an enabled switch.
fn apply_switches(mut trigger: ValidationTrigger, switches: HardFailSwitches) -> ValidationTrigger {
    let fatal = match trigger.id.as_str() {
        trigger_id::WINDOW_COUNT_CHANGE => switches.block_on_window_count_change,
        trigger_id::WINDOW_POSITION_CHANGE => switches.block_on_window_position_change,
        trigger_id::OPENINGS_DELTA => switches.block_on_openings_delta,
        _ => trigger.fatal,
    };
    trigger.fatal = fatal;
    trigger
}
