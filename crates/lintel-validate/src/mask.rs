//! Structural masks: which pixels belong to fixed architecture.
//!
//! A structural mask marks walls, window frames, door frames, and
//! other openings — the geometry an enhancement must never move. Mask
//! extraction is a pluggable strategy behind the [`MaskExtractor`]
//! trait so a learned segmentation model can replace the shipped
//! heuristic without touching the engine.

use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;

use crate::bitmap::BitMap;
use crate::edge::sobel_binary;

/// A binary map marking fixed-structure pixels for one image.
///
/// Invariant: dimensions equal the source image dimensions. The mask
/// cache treats a dimension mismatch as a stale entry and recomputes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StructuralMask {
    bits: BitMap,
}

impl StructuralMask {
    /// Wrap a bitmap as a structural mask.
    #[must_use]
    pub const fn new(bits: BitMap) -> Self {
        Self { bits }
    }

    /// The underlying bitmap.
    #[must_use]
    pub const fn bits(&self) -> &BitMap {
        &self.bits
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.bits.width()
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.bits.height()
    }

    /// `(width, height)` pair.
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        self.bits.dimensions()
    }

    /// Union with another mask of the same dimensions.
    ///
    /// The structural comparison evaluates edges under the union of
    /// the baseline and candidate masks: structure removed from the
    /// baseline and structure invented in the candidate both land
    /// inside the evaluated region.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.bits.or(&other.bits))
    }

    /// Fraction of the image area covered by the mask, in `0.0..=1.0`.
    ///
    /// Callers compare this against a minimum before trusting masked
    /// metrics: a mask covering a handful of pixels says nothing
    /// statistically useful about structural agreement.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn area_fraction(&self) -> f64 {
        if self.bits.is_empty() {
            return 0.0;
        }
        self.bits.count_ones() as f64 / self.bits.len() as f64
    }
}

/// Mask extraction failed.
///
/// The shipped heuristic cannot fail, but model-backed extractors can
/// (inference backend unavailable, incompatible input). The engine
/// maps this to a `mask_error` trigger, distinguishable from a genuine
/// structural violation.
#[derive(Debug, thiserror::Error)]
#[error("structural mask extraction failed: {0}")]
pub struct MaskError(pub String);

/// Trait for structural mask extraction strategies.
pub trait MaskExtractor {
    /// Produce a structural mask for the image.
    ///
    /// # Errors
    ///
    /// Returns [`MaskError`] when the strategy cannot produce a mask.
    fn extract(&self, image: &GrayImage) -> Result<StructuralMask, MaskError>;
}

/// Selects which mask extraction strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskExtractorKind {
    /// Long-run gradient heuristic: keep edge pixels that belong to
    /// long straight horizontal or vertical runs, then thicken.
    #[default]
    GradientHeuristic,
}

impl MaskExtractor for MaskExtractorKind {
    fn extract(&self, image: &GrayImage) -> Result<StructuralMask, MaskError> {
        match *self {
            Self::GradientHeuristic => Ok(gradient_heuristic(image)),
        }
    }
}

/// Sobel threshold for the mask's edge pass. Lower than the
/// comparison edge maps: faint wall seams still count as structure.
const MASK_SOBEL_THRESHOLD: f32 = 60.0;

/// Pre-blur sigma. Suppresses texture (carpet, brick grain) that
/// would otherwise produce long accidental runs.
const MASK_BLUR_SIGMA: f32 = 1.0;

/// A run must span at least this fraction of the image dimension to
/// count as structural.
const MIN_RUN_DIVISOR: u32 = 8;

/// Absolute floor on run length, for small images.
const MIN_RUN_FLOOR: u32 = 12;

/// Long-run gradient heuristic.
///
/// Architectural boundaries photograph as long straight gradient
/// lines: wall/ceiling seams and floor lines run horizontally, wall
/// corners and window/door frames run vertically. Furniture and decor
/// produce short, curved, or fragmented edges. So: blur lightly,
/// threshold the Sobel magnitude, keep pixels that belong to
/// horizontal or vertical runs at least 1/8 of the corresponding
/// image dimension long, and dilate once to thicken the kept lines.
fn gradient_heuristic(image: &GrayImage) -> StructuralMask {
    let (width, height) = image.dimensions();
    let blurred = gaussian_blur_f32(image, MASK_BLUR_SIGMA);
    let edges = sobel_binary(&blurred, MASK_SOBEL_THRESHOLD);

    let min_run_h = (width / MIN_RUN_DIVISOR).max(MIN_RUN_FLOOR);
    let min_run_v = (height / MIN_RUN_DIVISOR).max(MIN_RUN_FLOOR);

    let mut kept = BitMap::new(width, height);

    // Horizontal runs.
    for y in 0..height {
        let mut run_start = 0u32;
        let mut run_len = 0u32;
        for x in 0..=width {
            if x < width && edges.get(x, y) {
                if run_len == 0 {
                    run_start = x;
                }
                run_len += 1;
            } else {
                if run_len >= min_run_h {
                    for rx in run_start..run_start + run_len {
                        kept.set(rx, y);
                    }
                }
                run_len = 0;
            }
        }
    }

    // Vertical runs.
    for x in 0..width {
        let mut run_start = 0u32;
        let mut run_len = 0u32;
        for y in 0..=height {
            if y < height && edges.get(x, y) {
                if run_len == 0 {
                    run_start = y;
                }
                run_len += 1;
            } else {
                if run_len >= min_run_v {
                    for ry in run_start..run_start + run_len {
                        kept.set(x, ry);
                    }
                }
                run_len = 0;
            }
        }
    }

    StructuralMask::new(kept.dilate3())
}
