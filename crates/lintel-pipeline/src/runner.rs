//! The validation runner: paths in, summary out.
//!
//! Wraps the pure engine with everything it deliberately does not do:
//! reading image files, resolving per-stage config and mode, mask
//! caching, timing instrumentation, and risk artifact persistence.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::GrayImage;
use lintel_validate::engine::{ValidationInput, validate_images};
use lintel_validate::{
    DetectorRegistry, MaskError, MaskExtractor, MaskExtractorKind, StageId, StructuralMask,
    ValidationMode, ValidationSummary, ValidationTrigger, grayscale, trigger_id,
};

use crate::artifact::{ArtifactParams, write_artifact};
use crate::cache::{JobId, MaskCache, MaskKey, Side};
use crate::config::{StageAwareConfig, StageConfig};

/// Input to one validation run.
#[derive(Debug, Clone)]
pub struct ValidateParams {
    /// Stage whose policy applies.
    pub stage: StageId,
    /// Baseline image path.
    pub baseline: PathBuf,
    /// Candidate image path.
    pub candidate: PathBuf,
    /// Per-call mode override; beats every environment tier.
    pub mode: Option<ValidationMode>,
    /// Scene label, when known.
    pub scene: Option<String>,
    /// Job identity, used as the mask cache and artifact key. Without
    /// it masks are computed uncached and no artifact is written.
    pub job_id: Option<JobId>,
    /// Per-call stage config override; beats every environment tier.
    pub config: Option<StageConfig>,
}

impl ValidateParams {
    /// Minimal params: stage and the image pair.
    #[must_use]
    pub const fn new(stage: StageId, baseline: PathBuf, candidate: PathBuf) -> Self {
        Self {
            stage,
            baseline,
            candidate,
            mode: None,
            scene: None,
            job_id: None,
            config: None,
        }
    }
}

/// Stateful validation entry point shared by all workers.
pub struct ValidationRunner {
    config: Arc<StageAwareConfig>,
    cache: MaskCache,
    extractor: MaskExtractorKind,
    registry: DetectorRegistry,
}

impl ValidationRunner {
    /// Build a runner from resolved configuration.
    #[must_use]
    pub fn new(config: Arc<StageAwareConfig>) -> Self {
        let cache = MaskCache::new(config.mask_cache_capacity);
        Self {
            config,
            cache,
            extractor: MaskExtractorKind::default(),
            registry: DetectorRegistry::new(),
        }
    }

    /// Add a semantic change detector.
    pub fn register_detector(&mut self, detector: Box<dyn lintel_validate::ChangeDetector>) {
        self.registry.register(detector);
    }

    /// The shared mask cache.
    #[must_use]
    pub const fn cache(&self) -> &MaskCache {
        &self.cache
    }

    /// Run one validation.
    ///
    /// Never fails: file and decode problems degrade to a failed
    /// summary with a `metadata_error` trigger, bypassing all metric
    /// computation.
    #[must_use]
    pub fn validate(&self, params: &ValidateParams) -> ValidationSummary {
        let started = Instant::now();
        let stage_config = params
            .config
            .unwrap_or_else(|| *self.config.stage(params.stage));
        let mode = params.mode.unwrap_or(stage_config.mode);

        let baseline = match self.load_gray(&params.baseline) {
            Ok(img) => img,
            Err(reason) => return self.metadata_failure(params, mode, "baseline", &reason),
        };
        let candidate = match self.load_gray(&params.candidate) {
            Ok(img) => img,
            Err(reason) => return self.metadata_failure(params, mode, "candidate", &reason),
        };

        let mask_started = Instant::now();
        let (baseline_mask, candidate_mask, mask_failure) =
            self.resolve_masks(params, &baseline, &candidate);
        let mask_elapsed = mask_started.elapsed();

        let mut opts = self.config.engine_options(params.stage);
        if params.config.is_some() {
            opts.thresholds = stage_config.thresholds;
            opts.exclude_lower_pct = stage_config.exclude_lower_pct;
            opts.edge_threshold = stage_config.edge_threshold;
            opts.line_edge_threshold = stage_config.line_edge_threshold;
            opts.min_mask_fraction = stage_config.min_mask_fraction;
        }

        let engine_started = Instant::now();
        let input = ValidationInput {
            stage: params.stage,
            mode,
            baseline: &baseline,
            candidate: &candidate,
            baseline_mask: baseline_mask.as_deref(),
            candidate_mask: candidate_mask.as_deref(),
            scene: params.scene.as_deref(),
        };
        let mut summary = match &mask_failure {
            // Replay a cache-level extraction failure through the
            // engine's own error path so the trigger id matches.
            Some(err) => validate_images(&input, &opts, &ReplayError(err), &self.registry),
            None => validate_images(&input, &opts, &self.extractor, &self.registry),
        };

        summary.debug.insert(
            "timing_mask_ms".to_owned(),
            format!("{}", mask_elapsed.as_millis()),
        );
        summary.debug.insert(
            "timing_engine_ms".to_owned(),
            format!("{}", engine_started.elapsed().as_millis()),
        );
        summary.debug.insert(
            "timing_total_ms".to_owned(),
            format!("{}", started.elapsed().as_millis()),
        );
        if let Some(scene) = &params.scene {
            summary.debug.insert("scene".to_owned(), scene.clone());
        }

        self.maybe_write_artifact(params, &summary);
        summary
    }

    /// Read and grayscale one image, folding every failure mode into a
    /// display string for the metadata trigger.
    fn load_gray(&self, path: &std::path::Path) -> Result<GrayImage, String> {
        let bytes = fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
        grayscale::decode_and_grayscale(&bytes).map_err(|e| format!("{}: {e}", path.display()))
    }

    /// Resolve both masks, through the cache when a job id is present.
    ///
    /// The two extractions are independent; they run back to back
    /// inside this worker's slot, and cross-image parallelism comes
    /// from the pool, not from intra-job threads.
    fn resolve_masks(
        &self,
        params: &ValidateParams,
        baseline: &GrayImage,
        candidate: &GrayImage,
    ) -> (
        Option<Arc<StructuralMask>>,
        Option<Arc<StructuralMask>>,
        Option<MaskError>,
    ) {
        let Some(job_id) = &params.job_id else {
            // No cache key: let the engine extract uncached.
            return (None, None, None);
        };

        let mut failure = None;
        let mut side_mask = |side: Side, path: &std::path::Path, img: &GrayImage| {
            let key = MaskKey {
                job: job_id.clone(),
                side,
                path: path.to_path_buf(),
            };
            match self
                .cache
                .get_or_compute(&key, img.dimensions(), || self.extractor.extract(img))
            {
                Ok(mask) => Some(mask),
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                    None
                }
            }
        };

        let baseline_mask = side_mask(Side::Baseline, &params.baseline, baseline);
        let candidate_mask = side_mask(Side::Candidate, &params.candidate, candidate);
        (baseline_mask, candidate_mask, failure)
    }

    /// Immediate failed summary for unreadable images.
    fn metadata_failure(
        &self,
        params: &ValidateParams,
        mode: ValidationMode,
        side: &str,
        reason: &str,
    ) -> ValidationSummary {
        let summary = ValidationSummary {
            stage: params.stage,
            mode,
            passed: mode == ValidationMode::Log,
            risk: true,
            score: None,
            triggers: vec![ValidationTrigger::new(
                trigger_id::METADATA_ERROR,
                params.stage,
                format!("{side} image unreadable: {reason}"),
            )],
            metrics: BTreeMap::new(),
            debug: BTreeMap::from([(
                "metadata".to_owned(),
                format!("{side} unreadable; all metrics skipped"),
            )]),
        };
        self.maybe_write_artifact(params, &summary);
        summary
    }

    /// Persist a risk artifact when enabled. Best-effort by contract.
    fn maybe_write_artifact(&self, params: &ValidateParams, summary: &ValidationSummary) {
        if !summary.risk || !self.config.artifact_enabled {
            return;
        }
        let Some(job_id) = &params.job_id else {
            return;
        };
        let artifact_params = ArtifactParams {
            baseline: params.baseline.clone(),
            candidate: params.candidate.clone(),
            scene: params.scene.clone(),
        };
        match write_artifact(
            &self.config.artifact_dir,
            job_id,
            params.stage,
            artifact_params,
            summary,
        ) {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "wrote risk artifact");
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to write risk artifact; continuing");
            }
        }
    }
}

/// Extractor stub that replays a recorded cache failure, so the engine
/// produces its canonical `mask_error` trigger.
struct ReplayError<'a>(&'a MaskError);

impl MaskExtractor for ReplayError<'_> {
    fn extract(&self, _image: &GrayImage) -> Result<StructuralMask, MaskError> {
        Err(MaskError(self.0.0.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lintel_validate::metric_key;
    use std::path::Path;

    /// Write a synthetic interior PNG: wall seam plus window frame.
    fn write_room(path: &Path, width: u32, height: u32, with_blob: bool) {
        let img = GrayImage::from_fn(width, height, |x, y| {
            if y == 30 {
                return image::Luma([10]);
            }
            if (20..70).contains(&x) && (40..80).contains(&y) {
                return image::Luma([240]);
            }
            if with_blob && (50..68).contains(&x) && (100..112).contains(&y) {
                return image::Luma([60]);
            }
            image::Luma([130])
        });
        img.save(path).unwrap();
    }

    fn runner_with(vars: &[(&str, &str)]) -> ValidationRunner {
        let map: std::collections::HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let config = StageAwareConfig::from_lookup(|name| map.get(name).cloned());
        ValidationRunner::new(Arc::new(config))
    }

    #[test]
    fn identical_pair_passes_with_timings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.png");
        write_room(&path, 160, 160, false);

        let runner = runner_with(&[]);
        let summary = runner.validate(&ValidateParams::new(
            StageId::Stage1A,
            path.clone(),
            path,
        ));
        assert!(summary.passed);
        assert!(summary.metrics.contains_key(metric_key::EDGE_IOU));
        assert!(summary.debug.contains_key("timing_total_ms"));
        assert!(summary.debug.contains_key("timing_engine_ms"));
    }

    #[test]
    fn missing_file_is_a_metadata_failure() {
        let runner = runner_with(&[]);
        let summary = runner.validate(&ValidateParams::new(
            StageId::Stage1A,
            PathBuf::from("/nonexistent/base.png"),
            PathBuf::from("/nonexistent/cand.png"),
        ));
        assert!(summary.has_trigger(trigger_id::METADATA_ERROR));
        assert!(summary.risk);
        assert!(!summary.passed, "stage 1A defaults to block mode");
        assert!(summary.metrics.is_empty());
    }

    #[test]
    fn metadata_failure_passes_in_log_mode() {
        let runner = runner_with(&[("LINTEL_STAGE1A_MODE", "log")]);
        let summary = runner.validate(&ValidateParams::new(
            StageId::Stage1A,
            PathBuf::from("/nonexistent/base.png"),
            PathBuf::from("/nonexistent/cand.png"),
        ));
        assert!(summary.risk);
        assert!(summary.passed, "log mode never blocks");
    }

    #[test]
    fn per_call_mode_override_beats_environment() {
        let runner = runner_with(&[("LINTEL_STAGE1A_MODE", "block")]);
        let mut params = ValidateParams::new(
            StageId::Stage1A,
            PathBuf::from("/nonexistent/base.png"),
            PathBuf::from("/nonexistent/cand.png"),
        );
        params.mode = Some(ValidationMode::Log);
        let summary = runner.validate(&params);
        assert!(summary.passed);
    }

    #[test]
    fn job_id_populates_the_mask_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.png");
        write_room(&path, 160, 160, false);

        let runner = runner_with(&[]);
        let mut params =
            ValidateParams::new(StageId::Stage1A, path.clone(), path);
        params.job_id = Some(JobId::new("job-5"));

        assert!(runner.cache().is_empty());
        runner.validate(&params);
        assert_eq!(runner.cache().len(), 2, "baseline and candidate sides");
        // Second call reuses both entries rather than growing the cache.
        runner.validate(&params);
        assert_eq!(runner.cache().len(), 2);
    }

    #[test]
    fn risk_run_writes_artifact_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.png");
        let cand = dir.path().join("cand.png");
        write_room(&base, 160, 160, false);
        write_room(&cand, 160, 160, true);
        let artifacts = dir.path().join("artifacts");

        let runner = runner_with(&[
            ("LINTEL_ARTIFACTS", "true"),
            ("LINTEL_ARTIFACT_DIR", artifacts.to_str().unwrap()),
            // Impossible minimums: every metric undershoots, so the
            // soft gate trips on trigger count alone.
            ("LINTEL_STRUCT_IOU_MIN", "1.01"),
            ("LINTEL_EDGE_IOU_MIN", "1.01"),
            ("LINTEL_LINE_EDGE_MIN", "1.01"),
        ]);
        let mut params = ValidateParams::new(StageId::Stage1A, base, cand);
        params.job_id = Some(JobId::new("job-8"));

        let summary = runner.validate(&params);
        assert!(summary.risk);
        assert!(artifacts.join("job-8-stage1A.json").exists());
    }

    #[test]
    fn no_artifact_without_job_id() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        let runner = runner_with(&[
            ("LINTEL_ARTIFACTS", "true"),
            ("LINTEL_ARTIFACT_DIR", artifacts.to_str().unwrap()),
        ]);
        let summary = runner.validate(&ValidateParams::new(
            StageId::Stage1A,
            PathBuf::from("/nonexistent/a.png"),
            PathBuf::from("/nonexistent/b.png"),
        ));
        assert!(summary.risk);
        assert!(!artifacts.exists());
    }
}
