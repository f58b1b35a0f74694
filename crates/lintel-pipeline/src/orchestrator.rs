//! Drives an enhance job through its stages.
//!
//! State machine per job:
//! `queued → scene-detect → stage1A → stage1B? → stage2? → validated →
//! {complete | error}`. Stage 1B and Stage 2 are entered only when the
//! job requested them.
//!
//! Baseline selection is stage-dependent and is the part of this
//! module most worth reading twice:
//!
//! - **Stage 1A** validates against the **original** upload.
//! - **Stage 1B** validates against the **Stage 1A output**: declutter
//!   legitimately removes movable items, so only the enhanced
//!   baseline's fixed structure is held constant.
//! - **Stage 2** also validates against the **Stage 1A output**, not
//!   Stage 1B: staging adds furniture, so the furniture-stripped 1B
//!   state is the wrong comparison; 1A's "same furniture, just
//!   enhanced" state is the right one.

use std::path::PathBuf;
use std::sync::Arc;

use lintel_validate::StageId;
use tracing::{info, warn};

use crate::collab::{CandidateGenerator, SceneClassifier, SceneLabel};
use crate::config::StageAwareConfig;
use crate::job::{EnhanceJob, JobRecord, JobState, StageRecord};
use crate::runner::{ValidateParams, ValidationRunner};

/// Processes jobs one at a time; shared across the worker pool.
pub struct Orchestrator {
    runner: ValidationRunner,
    generator: Arc<dyn CandidateGenerator>,
    classifier: Arc<dyn SceneClassifier>,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        config: Arc<StageAwareConfig>,
        generator: Arc<dyn CandidateGenerator>,
        classifier: Arc<dyn SceneClassifier>,
    ) -> Self {
        Self {
            runner: ValidationRunner::new(config),
            generator,
            classifier,
        }
    }

    /// Wire an orchestrator around an existing runner (e.g. one with
    /// registered change detectors).
    #[must_use]
    pub const fn with_runner(
        runner: ValidationRunner,
        generator: Arc<dyn CandidateGenerator>,
        classifier: Arc<dyn SceneClassifier>,
    ) -> Self {
        Self {
            runner,
            generator,
            classifier,
        }
    }

    /// Process one job to completion.
    ///
    /// Synchronous and CPU-bound by design: the pool gives each job
    /// its own worker slot, and parallelism across jobs comes from the
    /// pool, not from threads inside a job.
    #[must_use]
    pub fn process_job(&self, job: &EnhanceJob) -> JobRecord {
        let mut record = JobRecord::begin(job.id.clone());

        record.state = JobState::SceneDetect;
        let scene = self.detect_scene(job, &mut record);

        // Stage 1A: mandatory quality lift, validated against the
        // original upload. Without a kept 1A output there is nothing
        // to fall back to, so a blocked candidate fails the job.
        record.state = JobState::Stage1A;
        let stage1a_output = match self.run_stage(
            job,
            StageId::Stage1A,
            &job.original,
            &job.original,
            scene.as_ref(),
            &mut record,
        ) {
            StageOutcome::Kept(path) => path,
            StageOutcome::Blocked => {
                return fail(record, "structural validation failed");
            }
            StageOutcome::GenerationFailed(reason) => {
                return fail(record, &reason);
            }
        };
        let mut current = stage1a_output.clone();

        // Stage 1B: optional declutter, validated against the 1A
        // output. A blocked or failed candidate falls back to the
        // prior kept output; the enhancement is still deliverable.
        if job.options.declutter {
            record.state = JobState::Stage1B;
            match self.run_stage(
                job,
                StageId::Stage1B,
                &current,
                &stage1a_output,
                scene.as_ref(),
                &mut record,
            ) {
                StageOutcome::Kept(path) => current = path,
                StageOutcome::Blocked => {
                    info!(job = %job.id, "stage1B candidate rejected; keeping stage1A output");
                }
                StageOutcome::GenerationFailed(reason) => {
                    warn!(job = %job.id, reason, "stage1B generation failed; keeping stage1A output");
                }
            }
        }

        // Stage 2: optional staging. Generation starts from the
        // current output, but validation always compares against the
        // 1A baseline.
        if job.options.virtual_stage {
            record.state = JobState::Stage2;
            match self.run_stage(
                job,
                StageId::Stage2,
                &current,
                &stage1a_output,
                scene.as_ref(),
                &mut record,
            ) {
                StageOutcome::Kept(path) => current = path,
                StageOutcome::Blocked => {
                    info!(job = %job.id, "stage2 candidate rejected; keeping prior output");
                }
                StageOutcome::GenerationFailed(reason) => {
                    warn!(job = %job.id, reason, "stage2 generation failed; keeping prior output");
                }
            }
        }

        record.state = JobState::Validated;
        info!(job = %job.id, stages = record.stages.len(), "all requested stages validated");
        record.final_output = Some(current);
        record.state = JobState::Complete;
        // This job's masks will not be needed again.
        self.runner.cache().evict_job(&job.id);
        record
    }

    /// Classify the scene, falling back to the job's hint.
    fn detect_scene(&self, job: &EnhanceJob, record: &mut JobRecord) -> Option<SceneLabel> {
        let scene = match self.classifier.classify(&job.original) {
            Ok(label) => Some(label),
            Err(err) => {
                // Scene knowledge only tunes region exclusion; its
                // absence must not fail the job.
                warn!(job = %job.id, error = %err, "scene classification unavailable");
                job.scene_hint.clone().map(|label| SceneLabel {
                    label,
                    confidence: 0.0,
                })
            }
        };
        record.scene = scene.clone();
        scene
    }

    /// Generate and validate one stage's candidate.
    fn run_stage(
        &self,
        job: &EnhanceJob,
        stage: StageId,
        generation_input: &PathBuf,
        baseline: &PathBuf,
        scene: Option<&SceneLabel>,
        record: &mut JobRecord,
    ) -> StageOutcome {
        let candidate = match self.generator.generate(job, stage, generation_input) {
            Ok(path) => path,
            Err(err) => return StageOutcome::GenerationFailed(err.to_string()),
        };

        let params = ValidateParams {
            stage,
            baseline: baseline.clone(),
            candidate: candidate.clone(),
            mode: None,
            scene: scene.map(|s| s.label.clone()),
            job_id: Some(job.id.clone()),
            config: None,
        };
        let summary = self.runner.validate(&params);
        let kept = summary.passed;

        info!(
            job = %job.id,
            stage = %stage,
            passed = summary.passed,
            risk = summary.risk,
            triggers = summary.triggers.len(),
            "stage validated"
        );
        record.stages.push(StageRecord {
            stage,
            candidate: candidate.clone(),
            kept,
            summary,
        });

        if kept {
            StageOutcome::Kept(candidate)
        } else {
            StageOutcome::Blocked
        }
    }
}

enum StageOutcome {
    Kept(PathBuf),
    Blocked,
    GenerationFailed(String),
}

fn fail(mut record: JobRecord, reason: &str) -> JobRecord {
    record.state = JobState::Error;
    record.failure = Some(reason.to_owned());
    record
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::JobId;
    use crate::collab::CollabError;
    use crate::config::StageAwareConfig;
    use crate::job::JobOptions;
    use image::GrayImage;
    use std::path::Path;

    struct FixedScene(&'static str);

    impl SceneClassifier for FixedScene {
        fn classify(&self, _path: &Path) -> Result<SceneLabel, CollabError> {
            Ok(SceneLabel {
                label: self.0.to_owned(),
                confidence: 0.97,
            })
        }
    }

    fn write_room(path: &Path, sofa: bool, staged: bool) {
        let img = GrayImage::from_fn(160, 160, |x, y| {
            if y == 30 {
                return image::Luma([10]);
            }
            if (20..70).contains(&x) && (40..80).contains(&y) {
                return image::Luma([240]);
            }
            if sofa && (50..68).contains(&x) && (130..142).contains(&y) {
                return image::Luma([60]);
            }
            if staged && (100..115).contains(&x) && (132..144).contains(&y) {
                return image::Luma([200]);
            }
            image::Luma([130])
        });
        img.save(path).unwrap();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        job: EnhanceJob,
        orchestrator: Orchestrator,
    }

    /// Full three-stage fixture: original with a sofa, 1A identical
    /// lift, 1B decluttered, stage 2 restaged.
    fn fixture(config: StageAwareConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("original.png");
        let lifted = dir.path().join("stage1a.png");
        let decluttered = dir.path().join("stage1b.png");
        let staged = dir.path().join("stage2.png");
        write_room(&original, true, false);
        write_room(&lifted, true, false);
        write_room(&decluttered, false, false);
        write_room(&staged, true, true);

        let job = EnhanceJob {
            id: JobId::new("job-1"),
            original,
            options: JobOptions {
                declutter: true,
                virtual_stage: true,
            },
            scene_hint: None,
        };

        let mut generator = crate::collab::PrecomputedGenerator::new();
        generator.insert(job.id.clone(), StageId::Stage1A, lifted);
        generator.insert(job.id.clone(), StageId::Stage1B, decluttered);
        generator.insert(job.id.clone(), StageId::Stage2, staged);

        let orchestrator = Orchestrator::new(
            Arc::new(config),
            Arc::new(generator),
            Arc::new(FixedScene("interior")),
        );
        Fixture {
            _dir: dir,
            job,
            orchestrator,
        }
    }

    fn default_config() -> StageAwareConfig {
        StageAwareConfig::from_lookup(|_| None)
    }

    #[test]
    fn full_pipeline_completes_and_keeps_every_stage() {
        let f = fixture(default_config());
        let record = f.orchestrator.process_job(&f.job);
        assert_eq!(record.state, JobState::Complete, "{:?}", record.failure);
        assert_eq!(record.stages.len(), 3);
        assert!(record.stages.iter().all(|s| s.kept), "{:?}", record.stages);
        assert_eq!(record.scene.as_ref().unwrap().label, "interior");
        // Final output is the stage 2 candidate.
        let stage2 = record.stage(StageId::Stage2).unwrap();
        assert_eq!(record.final_output.as_ref(), Some(&stage2.candidate));
    }

    #[test]
    fn stage_baselines_follow_the_policy() {
        let f = fixture(default_config());
        let record = f.orchestrator.process_job(&f.job);

        let s1b = record.stage(StageId::Stage1B).unwrap();
        let s2 = record.stage(StageId::Stage2).unwrap();
        // Both 1B and 2 validated against the 1A output, never against
        // each other or the original: the 1B summary for the
        // decluttered room shows no structural trigger even though the
        // sofa is gone.
        assert!(
            !s1b.summary
                .has_trigger(lintel_validate::trigger_id::STRUCTURAL_MASK_IOU)
        );
        assert!(s1b.kept);
        assert!(s2.kept);
    }

    #[test]
    fn stage1a_block_fails_the_job() {
        // Impossible thresholds in block mode: stage 1A candidate is
        // rejected and there is no prior output to fall back to.
        let config = StageAwareConfig::from_lookup(|name| match name {
            "LINTEL_STAGE1A_STRUCT_IOU_MIN"
            | "LINTEL_STAGE1A_EDGE_IOU_MIN"
            | "LINTEL_STAGE1A_LINE_EDGE_MIN" => Some("1.01".to_owned()),
            _ => None,
        });
        let f = fixture(config);
        let record = f.orchestrator.process_job(&f.job);
        assert_eq!(record.state, JobState::Error);
        assert_eq!(record.failure.as_deref(), Some("structural validation failed"));
        assert!(record.final_output.is_none());
        assert_eq!(record.stages.len(), 1, "later stages never ran");
    }

    #[test]
    fn blocked_stage2_falls_back_to_prior_output() {
        // Stage 2 thresholds impossible and mode forced to block; the
        // job still completes with the stage 1B output.
        let config = StageAwareConfig::from_lookup(|name| match name {
            "LINTEL_STAGE2_STRUCT_IOU_MIN"
            | "LINTEL_STAGE2_EDGE_IOU_MIN"
            | "LINTEL_STAGE2_LINE_EDGE_MIN" => Some("1.01".to_owned()),
            "LINTEL_STAGE2_MODE" => Some("block".to_owned()),
            _ => None,
        });
        let f = fixture(config);
        let record = f.orchestrator.process_job(&f.job);
        assert_eq!(record.state, JobState::Complete);

        let s2 = record.stage(StageId::Stage2).unwrap();
        assert!(!s2.kept);
        assert!(s2.summary.risk);
        let s1b = record.stage(StageId::Stage1B).unwrap();
        assert_eq!(record.final_output.as_ref(), Some(&s1b.candidate));
    }

    #[test]
    fn log_mode_keeps_risky_candidates() {
        // Same impossible stage 2 thresholds, but log mode (the
        // default for stage 2): risky, yet kept and completed.
        let config = StageAwareConfig::from_lookup(|name| match name {
            "LINTEL_STAGE2_STRUCT_IOU_MIN"
            | "LINTEL_STAGE2_EDGE_IOU_MIN"
            | "LINTEL_STAGE2_LINE_EDGE_MIN" => Some("1.01".to_owned()),
            _ => None,
        });
        let f = fixture(config);
        let record = f.orchestrator.process_job(&f.job);
        assert_eq!(record.state, JobState::Complete);
        let s2 = record.stage(StageId::Stage2).unwrap();
        assert!(s2.summary.risk);
        assert!(s2.kept, "log mode annotates without rejecting");
        assert_eq!(record.final_output.as_ref(), Some(&s2.candidate));
    }

    #[test]
    fn generation_failure_on_stage1a_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("original.png");
        write_room(&original, false, false);

        let job = EnhanceJob {
            id: JobId::new("job-2"),
            original,
            options: JobOptions::default(),
            scene_hint: None,
        };
        // Empty generator: every generate call fails.
        let orchestrator = Orchestrator::new(
            Arc::new(default_config()),
            Arc::new(crate::collab::PrecomputedGenerator::new()),
            Arc::new(FixedScene("interior")),
        );
        let record = orchestrator.process_job(&job);
        assert_eq!(record.state, JobState::Error);
        assert!(record.failure.unwrap().contains("generation failed"));
    }

    #[test]
    fn classifier_failure_falls_back_to_hint() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("original.png");
        let lifted = dir.path().join("stage1a.png");
        write_room(&original, false, false);
        write_room(&lifted, false, false);

        let job = EnhanceJob {
            id: JobId::new("job-3"),
            original,
            options: JobOptions::default(),
            scene_hint: Some("exterior".to_owned()),
        };
        let mut generator = crate::collab::PrecomputedGenerator::new();
        generator.insert(job.id.clone(), StageId::Stage1A, lifted);

        let orchestrator = Orchestrator::new(
            Arc::new(default_config()),
            Arc::new(generator),
            Arc::new(crate::collab::HintClassifier),
        );
        let record = orchestrator.process_job(&job);
        assert_eq!(record.state, JobState::Complete);
        let scene = record.scene.unwrap();
        assert_eq!(scene.label, "exterior");
        assert!((scene.confidence - 0.0).abs() < f64::EPSILON);
    }
}
