//! Stage-aware configuration with environment-driven overrides.
//!
//! All knobs resolve through one explicit precedence chain, built once
//! at startup into an immutable [`StageAwareConfig`] and injected into
//! the orchestrator — no scattered `std::env` reads, no hidden global
//! mutable state:
//!
//! 1. explicit per-call override (handled by the caller)
//! 2. stage-specific variable: `LINTEL_STAGE1A_EDGE_IOU_MIN`
//! 3. global variable: `LINTEL_EDGE_IOU_MIN`
//! 4. legacy catch-all: `STRUCT_VALIDATE_EDGE_IOU_MIN`
//! 5. hard-coded default
//!
//! Malformed values fall through to the next tier rather than erroring.
//! Legacy names that were actually honored are recorded and logged
//! exactly once per process, so silent behavior changes stay visible
//! during migration off the old names.

use std::path::PathBuf;
use std::sync::OnceLock;

use lintel_validate::engine::{
    DEFAULT_EDGE_THRESHOLD, DEFAULT_EXCLUDE_LOWER_PCT, DEFAULT_LINE_EDGE_THRESHOLD,
    DEFAULT_MIN_MASK_FRACTION,
};
use lintel_validate::gate::DEFAULT_MIN_SIGNALS;
use lintel_validate::{
    EngineOptions, HardFailSwitches, RiskGate, StageId, StageThresholds, ValidationMode,
};

/// Current-generation variable prefix.
const PREFIX: &str = "LINTEL";

/// Deprecated catch-all prefix, honored for existing deployments.
const LEGACY_PREFIX: &str = "STRUCT_VALIDATE";

/// Resolved per-stage policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageConfig {
    /// Metric minimums for this stage.
    pub thresholds: StageThresholds,
    /// Log or block on risk.
    pub mode: ValidationMode,
    /// Bottom-row exclusion for enhanced-baseline stages.
    pub exclude_lower_pct: f64,
    /// Sobel threshold for the structural/global edge maps.
    pub edge_threshold: f32,
    /// Sobel threshold for the fine-line edge maps.
    pub line_edge_threshold: f32,
    /// Minimum meaningful mask coverage.
    pub min_mask_fraction: f64,
}

/// The full resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StageAwareConfig {
    stage1a: StageConfig,
    stage1b: StageConfig,
    stage2: StageConfig,
    /// Trigger count at which soft disagreement becomes risk.
    pub gate_min_signals: usize,
    /// Hard-fail switches applied to forwarded detector triggers.
    pub switches: HardFailSwitches,
    /// Worker pool size.
    pub worker_count: usize,
    /// Per-job timeout in seconds.
    pub job_timeout_secs: u64,
    /// Directory for risk debug artifacts.
    pub artifact_dir: PathBuf,
    /// Whether risk artifacts are written at all.
    pub artifact_enabled: bool,
    /// Mask cache entry capacity.
    pub mask_cache_capacity: usize,
    /// Legacy variable names that were actually honored.
    pub legacy_honored: Vec<String>,
}

impl StageAwareConfig {
    /// Resolve from process environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve from an arbitrary lookup function.
    ///
    /// The injection point that makes the precedence chain testable
    /// without mutating process environment.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut resolver = Resolver {
            lookup,
            legacy_honored: Vec::new(),
        };

        let stage1a = resolver.stage_config(StageId::Stage1A, ValidationMode::Block);
        let stage1b = resolver.stage_config(StageId::Stage1B, ValidationMode::Log);
        let stage2 = resolver.stage_config(StageId::Stage2, ValidationMode::Log);

        let gate_min_signals = resolver.global_usize("GATE_MIN_SIGNALS", DEFAULT_MIN_SIGNALS);
        let switches = HardFailSwitches {
            block_on_window_count_change: resolver
                .global_bool("BLOCK_ON_WINDOW_COUNT_CHANGE", true),
            block_on_window_position_change: resolver
                .global_bool("BLOCK_ON_WINDOW_POSITION_CHANGE", true),
            block_on_openings_delta: resolver.global_bool("BLOCK_ON_OPENINGS_DELTA", true),
        };

        let worker_count = resolver.global_usize("WORKERS", 2).max(1);
        let job_timeout_secs = resolver.global_u64("JOB_TIMEOUT_SECS", 120);
        let artifact_dir =
            PathBuf::from(resolver.global_string("ARTIFACT_DIR", "lintel-artifacts"));
        let artifact_enabled = resolver.global_bool("ARTIFACTS", false);
        let mask_cache_capacity = resolver.global_usize("MASK_CACHE_CAPACITY", 32).max(2);

        Self {
            stage1a,
            stage1b,
            stage2,
            gate_min_signals,
            switches,
            worker_count,
            job_timeout_secs,
            artifact_dir,
            artifact_enabled,
            mask_cache_capacity,
            legacy_honored: resolver.legacy_honored,
        }
    }

    /// Process-wide memoized configuration.
    ///
    /// Resolved on first use; honored legacy names are logged exactly
    /// once, here.
    pub fn global() -> &'static Self {
        static CONFIG: OnceLock<StageAwareConfig> = OnceLock::new();
        CONFIG.get_or_init(|| {
            let config = Self::from_env();
            if config.legacy_honored.is_empty() {
                tracing::debug!("config resolved; no legacy variable names in use");
            } else {
                tracing::warn!(
                    names = ?config.legacy_honored,
                    "config resolved via deprecated STRUCT_VALIDATE_* names; \
                     migrate to the LINTEL_* equivalents"
                );
            }
            config
        })
    }

    /// Per-stage policy.
    #[must_use]
    pub const fn stage(&self, stage: StageId) -> &StageConfig {
        match stage {
            StageId::Stage1A => &self.stage1a,
            StageId::Stage1B => &self.stage1b,
            StageId::Stage2 => &self.stage2,
        }
    }

    /// Engine options for one stage, combining stage policy with the
    /// global gate and switches.
    #[must_use]
    pub fn engine_options(&self, stage: StageId) -> EngineOptions {
        let sc = self.stage(stage);
        EngineOptions {
            thresholds: sc.thresholds,
            switches: self.switches,
            gate: RiskGate {
                min_signals: self.gate_min_signals,
            },
            edge_threshold: sc.edge_threshold,
            line_edge_threshold: sc.line_edge_threshold,
            exclude_lower_pct: sc.exclude_lower_pct,
            min_mask_fraction: sc.min_mask_fraction,
        }
    }
}

/// Walks the precedence chain for each knob, recording honored legacy
/// names as it goes.
struct Resolver<F: Fn(&str) -> Option<String>> {
    lookup: F,
    legacy_honored: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> Resolver<F> {
    fn stage_config(&mut self, stage: StageId, default_mode: ValidationMode) -> StageConfig {
        let defaults = StageThresholds::defaults_for(stage);
        StageConfig {
            thresholds: StageThresholds {
                struct_iou_min: self.stage_f64(stage, "STRUCT_IOU_MIN", defaults.struct_iou_min),
                edge_iou_min: self.stage_f64(stage, "EDGE_IOU_MIN", defaults.edge_iou_min),
                line_edge_min: self.stage_f64(stage, "LINE_EDGE_MIN", defaults.line_edge_min),
                unified_min: self.stage_f64(stage, "UNIFIED_MIN", defaults.unified_min),
            },
            mode: self.stage_mode(stage, default_mode),
            exclude_lower_pct: self
                .stage_f64(stage, "EXCLUDE_LOWER_PCT", DEFAULT_EXCLUDE_LOWER_PCT),
            edge_threshold: self.stage_f32(stage, "EDGE_THRESHOLD", DEFAULT_EDGE_THRESHOLD),
            line_edge_threshold: self
                .stage_f32(stage, "LINE_EDGE_THRESHOLD", DEFAULT_LINE_EDGE_THRESHOLD),
            min_mask_fraction: self
                .stage_f64(stage, "MIN_MASK_FRACTION", DEFAULT_MIN_MASK_FRACTION),
        }
    }

    /// Stage-specific > global > legacy, returning the first value the
    /// parser accepts. A present-but-malformed value falls through.
    fn stage_chain<T>(
        &mut self,
        stage: StageId,
        knob: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        let stage_token = stage.as_str().to_uppercase();
        let candidates = [
            (format!("{PREFIX}_{stage_token}_{knob}"), false),
            (format!("{PREFIX}_{knob}"), false),
            (format!("{LEGACY_PREFIX}_{knob}"), true),
        ];
        for (name, is_legacy) in candidates {
            if let Some(raw) = (self.lookup)(&name) {
                if let Some(value) = parse(raw.trim()) {
                    if is_legacy {
                        self.legacy_honored.push(name);
                    }
                    return Some(value);
                }
                tracing::warn!(name = %name, raw = %raw, "ignoring malformed config value");
            }
        }
        None
    }

    fn global_chain<T>(&mut self, knob: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let candidates = [
            (format!("{PREFIX}_{knob}"), false),
            (format!("{LEGACY_PREFIX}_{knob}"), true),
        ];
        for (name, is_legacy) in candidates {
            if let Some(raw) = (self.lookup)(&name) {
                if let Some(value) = parse(raw.trim()) {
                    if is_legacy {
                        self.legacy_honored.push(name);
                    }
                    return Some(value);
                }
                tracing::warn!(name = %name, raw = %raw, "ignoring malformed config value");
            }
        }
        None
    }

    fn stage_f64(&mut self, stage: StageId, knob: &str, default: f64) -> f64 {
        self.stage_chain(stage, knob, |s| s.parse().ok())
            .unwrap_or(default)
    }

    fn stage_f32(&mut self, stage: StageId, knob: &str, default: f32) -> f32 {
        self.stage_chain(stage, knob, |s| s.parse().ok())
            .unwrap_or(default)
    }

    fn stage_mode(&mut self, stage: StageId, default: ValidationMode) -> ValidationMode {
        self.stage_chain(stage, "MODE", parse_mode).unwrap_or(default)
    }

    fn global_usize(&mut self, knob: &str, default: usize) -> usize {
        self.global_chain(knob, |s| s.parse().ok()).unwrap_or(default)
    }

    fn global_u64(&mut self, knob: &str, default: u64) -> u64 {
        self.global_chain(knob, |s| s.parse().ok()).unwrap_or(default)
    }

    fn global_bool(&mut self, knob: &str, default: bool) -> bool {
        self.global_chain(knob, parse_bool).unwrap_or(default)
    }

    fn global_string(&mut self, knob: &str, default: &str) -> String {
        self.global_chain(knob, |s| Some(s.to_owned()))
            .unwrap_or_else(|| default.to_owned())
    }
}

fn parse_mode(raw: &str) -> Option<ValidationMode> {
    match raw.to_ascii_lowercase().as_str() {
        "log" => Some(ValidationMode::Log),
        "block" => Some(ValidationMode::Block),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> StageAwareConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        StageAwareConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn empty_env_yields_documented_defaults() {
        let config = config_with(&[]);
        assert_eq!(config.gate_min_signals, 2);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.stage(StageId::Stage1A).mode, ValidationMode::Block);
        assert_eq!(config.stage(StageId::Stage1B).mode, ValidationMode::Log);
        assert_eq!(config.stage(StageId::Stage2).mode, ValidationMode::Log);
        assert!(config.legacy_honored.is_empty());
        assert!(!config.artifact_enabled);
        let expected = StageThresholds::defaults_for(StageId::Stage1A);
        assert!(
            (config.stage(StageId::Stage1A).thresholds.struct_iou_min
                - expected.struct_iou_min)
                .abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn stage_specific_beats_global() {
        let config = config_with(&[
            ("LINTEL_STAGE1B_EDGE_IOU_MIN", "0.11"),
            ("LINTEL_EDGE_IOU_MIN", "0.22"),
        ]);
        let thresholds = |s: StageId| config.stage(s).thresholds;
        assert!((thresholds(StageId::Stage1B).edge_iou_min - 0.11).abs() < f64::EPSILON);
        // Other stages fall back to the global value.
        assert!((thresholds(StageId::Stage1A).edge_iou_min - 0.22).abs() < f64::EPSILON);
        assert!((thresholds(StageId::Stage2).edge_iou_min - 0.22).abs() < f64::EPSILON);
    }

    #[test]
    fn global_beats_legacy() {
        let config = config_with(&[
            ("LINTEL_MODE", "log"),
            ("STRUCT_VALIDATE_MODE", "block"),
        ]);
        assert_eq!(config.stage(StageId::Stage1A).mode, ValidationMode::Log);
        assert!(config.legacy_honored.is_empty());
    }

    #[test]
    fn legacy_name_is_honored_and_recorded() {
        let config = config_with(&[("STRUCT_VALIDATE_MODE", "block")]);
        assert_eq!(config.stage(StageId::Stage2).mode, ValidationMode::Block);
        assert!(
            config
                .legacy_honored
                .iter()
                .any(|n| n == "STRUCT_VALIDATE_MODE"),
            "honored legacy names must be recorded: {:?}",
            config.legacy_honored
        );
    }

    #[test]
    fn malformed_value_falls_through_to_next_tier() {
        let config = config_with(&[
            ("LINTEL_STAGE2_STRUCT_IOU_MIN", "not-a-number"),
            ("LINTEL_STRUCT_IOU_MIN", "0.33"),
        ]);
        assert!(
            (config.stage(StageId::Stage2).thresholds.struct_iou_min - 0.33).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn malformed_everything_falls_back_to_default() {
        let config = config_with(&[
            ("LINTEL_GATE_MIN_SIGNALS", "lots"),
            ("STRUCT_VALIDATE_GATE_MIN_SIGNALS", "-3"),
        ]);
        assert_eq!(config.gate_min_signals, 2);
    }

    #[test]
    fn mode_parse_is_case_insensitive() {
        let config = config_with(&[("LINTEL_STAGE1A_MODE", "LOG")]);
        assert_eq!(config.stage(StageId::Stage1A).mode, ValidationMode::Log);
    }

    #[test]
    fn switch_can_be_disabled() {
        let config = config_with(&[("LINTEL_BLOCK_ON_OPENINGS_DELTA", "false")]);
        assert!(!config.switches.block_on_openings_delta);
        assert!(config.switches.block_on_window_count_change);
    }

    #[test]
    fn worker_count_is_clamped_to_at_least_one() {
        let config = config_with(&[("LINTEL_WORKERS", "0")]);
        assert_eq!(config.worker_count, 1);
    }

    #[test]
    fn engine_options_combine_stage_and_global_policy() {
        let config = config_with(&[
            ("LINTEL_GATE_MIN_SIGNALS", "3"),
            ("LINTEL_STAGE2_EXCLUDE_LOWER_PCT", "0.5"),
        ]);
        let opts = config.engine_options(StageId::Stage2);
        assert_eq!(opts.gate.min_signals, 3);
        assert!((opts.exclude_lower_pct - 0.5).abs() < f64::EPSILON);
        assert!(opts.switches.block_on_window_count_change);
    }

    #[test]
    fn artifact_knobs_resolve() {
        let config = config_with(&[
            ("LINTEL_ARTIFACTS", "true"),
            ("LINTEL_ARTIFACT_DIR", "/tmp/lintel-debug"),
        ]);
        assert!(config.artifact_enabled);
        assert_eq!(config.artifact_dir, PathBuf::from("/tmp/lintel-debug"));
    }
}
