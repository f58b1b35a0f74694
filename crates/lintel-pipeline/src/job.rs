//! Enhance jobs and their lifecycle records.

use std::path::PathBuf;

use lintel_validate::{StageId, ValidationSummary};
use serde::{Deserialize, Serialize};

use crate::cache::JobId;
use crate::collab::SceneLabel;

/// Which optional stages a job requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Run Stage 1B (declutter).
    #[serde(default)]
    pub declutter: bool,
    /// Run Stage 2 (virtual staging).
    #[serde(default)]
    pub virtual_stage: bool,
}

/// One enhance job pulled from the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhanceJob {
    /// Stable job identity; also the mask cache and artifact key.
    pub id: JobId,
    /// The original upload.
    pub original: PathBuf,
    /// Requested optional stages.
    #[serde(default)]
    pub options: JobOptions,
    /// Caller-supplied scene hint, used when the classifier is
    /// unavailable.
    #[serde(default)]
    pub scene_hint: Option<String>,
}

/// Lifecycle states of an enhance job.
///
/// `Stage1B` and `Stage2` are entered only when the corresponding
/// [`JobOptions`] flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Waiting for a worker slot.
    Queued,
    /// Classifying the scene.
    SceneDetect,
    /// Generating/validating the quality lift.
    #[serde(rename = "stage1A")]
    Stage1A,
    /// Generating/validating the declutter pass.
    #[serde(rename = "stage1B")]
    Stage1B,
    /// Generating/validating the staging pass.
    #[serde(rename = "stage2")]
    Stage2,
    /// All requested stages validated.
    Validated,
    /// Finished with a deliverable output.
    Complete,
    /// Failed; see [`JobRecord::failure`].
    Error,
}

/// What happened at one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage.
    pub stage: StageId,
    /// The generated candidate image.
    pub candidate: PathBuf,
    /// Whether the candidate was kept as the running output
    /// (`false` means the job fell back to the prior kept output).
    pub kept: bool,
    /// The validation summary, retained for audit.
    pub summary: ValidationSummary,
}

/// Full audit record of one processed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identity.
    pub id: JobId,
    /// Final state: [`JobState::Complete`] or [`JobState::Error`].
    pub state: JobState,
    /// Scene classification, when it succeeded.
    pub scene: Option<SceneLabel>,
    /// Per-stage outcomes in execution order.
    pub stages: Vec<StageRecord>,
    /// The deliverable image, when the job completed.
    pub final_output: Option<PathBuf>,
    /// Failure reason, when the job errored.
    pub failure: Option<String>,
}

impl JobRecord {
    /// Start an empty record for a job.
    #[must_use]
    pub const fn begin(id: JobId) -> Self {
        Self {
            id,
            state: JobState::Queued,
            scene: None,
            stages: Vec::new(),
            final_output: None,
            failure: None,
        }
    }

    /// The record for a given stage, if that stage ran.
    #[must_use]
    pub fn stage(&self, stage: StageId) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}
