//! lintel-validate: structural validation engine (sans-IO).
//!
//! Detects silent alterations to a building's fixed structure — walls,
//! window count and position, door and opening geometry — between a
//! baseline photo and an AI-enhanced candidate:
//! grayscale -> Sobel edge maps -> structural mask -> IoU under
//! several masking strategies -> multi-signal risk gate.
//!
//! This crate has **no I/O dependencies** — it operates on in-memory
//! pixel buffers and returns structured data. Image loading, mask
//! caching, environment config, and job orchestration live in
//! `lintel-pipeline`.

pub mod bitmap;
pub mod edge;
pub mod engine;
pub mod gate;
pub mod grayscale;
pub mod iou;
pub mod mask;
pub mod signal;
pub mod types;

pub use bitmap::BitMap;
pub use engine::{EngineOptions, ValidationInput, validate_images};
pub use gate::{GateDecision, RiskGate, weighted_score};
pub use iou::{IouOutcome, exclude_lower_iou, global_iou, masked_iou, structure_only_iou};
pub use mask::{MaskError, MaskExtractor, MaskExtractorKind, StructuralMask};
pub use signal::{ChangeDetector, DetectorRegistry, SignalError, ValidationContext};
pub use types::{
    GrayImage, HardFailSwitches, StageId, StageThresholds, ValidateError, ValidationMode,
    ValidationSummary, ValidationTrigger, metric_key, trigger_id,
};
