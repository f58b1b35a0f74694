//! External collaborator seams.
//!
//! The generative model that produces candidates and the scene
//! classifier are remote services owned by other teams. The
//! orchestrator consumes them through these traits; the
//! implementations here are the deterministic ones used by the CLI
//! and tests. Production deployments plug in model-backed
//! implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lintel_validate::StageId;
use serde::{Deserialize, Serialize};

use crate::cache::JobId;
use crate::job::EnhanceJob;

/// A collaborator call failed.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    /// The generator could not produce a candidate for this stage.
    #[error("candidate generation failed for {stage}: {reason}")]
    Generation {
        /// Stage whose candidate was requested.
        stage: StageId,
        /// Collaborator-reported reason.
        reason: String,
    },
    /// The scene classifier could not label the image.
    #[error("scene classification failed: {0}")]
    Classification(String),
}

/// Black-box scene classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneLabel {
    /// Label such as `interior` or `exterior`.
    pub label: String,
    /// Classifier confidence in `0.0..=1.0`.
    pub confidence: f64,
}

/// Produces the enhanced candidate image for a stage.
pub trait CandidateGenerator: Send + Sync {
    /// Generate the candidate for `stage`, enhancing `input`.
    ///
    /// Returns the path of the generated image.
    ///
    /// # Errors
    ///
    /// Returns [`CollabError::Generation`] when no candidate could be
    /// produced; the orchestrator fails the job.
    fn generate(
        &self,
        job: &EnhanceJob,
        stage: StageId,
        input: &Path,
    ) -> Result<PathBuf, CollabError>;
}

/// Labels the scene of the original upload.
pub trait SceneClassifier: Send + Sync {
    /// Classify the image at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CollabError::Classification`] when no label could be
    /// produced; the orchestrator proceeds without a scene.
    fn classify(&self, path: &Path) -> Result<SceneLabel, CollabError>;
}

/// Generator backed by pre-rendered outputs.
///
/// Validation workers typically run behind the generation fleet: the
/// model outputs already sit in object storage, and the worker's only
/// task is to validate them. This generator resolves candidates from
/// a `(job, stage)` table built out of the job manifest.
#[derive(Debug, Default)]
pub struct PrecomputedGenerator {
    outputs: HashMap<(JobId, StageId), PathBuf>,
}

impl PrecomputedGenerator {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the pre-rendered candidate for `(job, stage)`.
    pub fn insert(&mut self, job: JobId, stage: StageId, path: PathBuf) {
        self.outputs.insert((job, stage), path);
    }
}

impl CandidateGenerator for PrecomputedGenerator {
    fn generate(
        &self,
        job: &EnhanceJob,
        stage: StageId,
        _input: &Path,
    ) -> Result<PathBuf, CollabError> {
        self.outputs
            .get(&(job.id.clone(), stage))
            .cloned()
            .ok_or_else(|| CollabError::Generation {
                stage,
                reason: format!("no pre-rendered output for job {}", job.id),
            })
    }
}

/// Classifier that trusts the job's scene hint.
///
/// Used when the real classifier is unreachable or for offline
/// validation runs where the scene is already known.
#[derive(Debug, Clone, Copy, Default)]
pub struct HintClassifier;

impl SceneClassifier for HintClassifier {
    fn classify(&self, _path: &Path) -> Result<SceneLabel, CollabError> {
        Err(CollabError::Classification(
            "hint classifier has no model; supply a scene hint on the job".to_owned(),
        ))
    }
}
