//! lintel-pipeline: enhance-job orchestration around the validation
//! engine.
//!
//! Owns everything `lintel-validate` deliberately does not: image
//! loading, environment-driven stage configuration, the typed mask
//! cache, stage policy (which baseline each stage compares against),
//! risk debug artifacts, and the worker pool that processes jobs
//! pulled from an external queue.
//!
//! The generative model, scene classifier, and queue transport are
//! external collaborators consumed through the traits in [`collab`]
//! and [`queue`].

pub mod artifact;
pub mod cache;
pub mod collab;
pub mod config;
pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod runner;
pub mod worker;

pub use artifact::{ARTIFACT_VERSION, ArtifactParams, DebugArtifact, write_artifact};
pub use cache::{JobId, MaskCache, MaskKey, Side};
pub use collab::{
    CandidateGenerator, CollabError, HintClassifier, PrecomputedGenerator, SceneClassifier,
    SceneLabel,
};
pub use config::{StageAwareConfig, StageConfig};
pub use job::{EnhanceJob, JobOptions, JobRecord, JobState, StageRecord};
pub use orchestrator::Orchestrator;
pub use queue::{InMemorySource, JobSource};
pub use runner::{ValidateParams, ValidationRunner};
pub use worker::WorkerPool;
