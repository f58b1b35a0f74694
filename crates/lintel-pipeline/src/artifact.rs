//! Risk debug artifacts.
//!
//! When a validation run is flagged risky and artifact logging is
//! enabled, the full decision context is persisted as a JSON file
//! named by job id and stage. Offline debugging tooling consumes these
//! files, so the shape is a stable external contract: any change must
//! bump [`ARTIFACT_VERSION`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lintel_validate::{StageId, ValidationSummary};
use serde::{Deserialize, Serialize};

use crate::cache::JobId;

/// Format marker for the artifact JSON shape.
pub const ARTIFACT_VERSION: u32 = 1;

/// Parameters echoed into the artifact so a run can be reproduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactParams {
    /// Baseline image path.
    pub baseline: PathBuf,
    /// Candidate image path.
    pub candidate: PathBuf,
    /// Scene label, when known.
    pub scene: Option<String>,
}

/// The persisted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugArtifact {
    /// Format marker. Bumped on any shape change.
    pub version: u32,
    /// Job the run belonged to.
    pub job_id: String,
    /// The run parameters.
    pub params: ArtifactParams,
    /// The full summary: triggers, metrics, debug, risk, passed, score.
    #[serde(flatten)]
    pub summary: ValidationSummary,
}

/// Write a risk artifact under `dir`, named `{job_id}-{stage}.json`.
///
/// Creates `dir` if needed. Callers treat failures as best-effort: a
/// missing artifact must never fail the job that produced it.
///
/// # Errors
///
/// Returns the underlying I/O error so the caller can log it.
pub fn write_artifact(
    dir: &Path,
    job_id: &JobId,
    stage: StageId,
    params: ArtifactParams,
    summary: &ValidationSummary,
) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let artifact = DebugArtifact {
        version: ARTIFACT_VERSION,
        job_id: job_id.as_str().to_owned(),
        params,
        summary: summary.clone(),
    };
    let path = dir.join(format!("{job_id}-{stage}.json"));
    let json = serde_json::to_string_pretty(&artifact)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(&path, json)?;
    Ok(path)
}
