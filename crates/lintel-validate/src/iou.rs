//! Intersection-over-union between binary edge maps.
//!
//! Four interchangeable masking strategies share one contract: the
//! returned [`IouOutcome::value`] is `None` when the union is empty.
//! Returning `0.0` there would incorrectly signal total disagreement,
//! when in fact there was nothing to compare — two blank walls agree
//! perfectly.

use crate::bitmap::BitMap;
use crate::mask::StructuralMask;

/// Result of one IoU computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IouOutcome {
    /// `intersection / union`, or `None` when the union is empty.
    pub value: Option<f64>,
    /// Count of bits set in both maps (within the evaluated region).
    pub intersection: u64,
    /// Count of bits set in either map (within the evaluated region).
    pub union: u64,
    /// Count of evaluated pixels, for masked strategies. Callers use
    /// this to detect a mask too small to be statistically meaningful.
    pub mask_pixels: Option<u64>,
}

impl IouOutcome {
    #[allow(clippy::cast_precision_loss)]
    fn from_counts(intersection: u64, union: u64, mask_pixels: Option<u64>) -> Self {
        Self {
            value: (union > 0).then(|| intersection as f64 / union as f64),
            intersection,
            union,
            mask_pixels,
        }
    }
}

/// IoU over the full bitmap.
#[must_use]
pub fn global_iou(a: &BitMap, b: &BitMap) -> IouOutcome {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    IouOutcome::from_counts(a.and_count(b), a.or_count(b), None)
}

/// IoU restricted to pixels where the structural mask is set.
///
/// Also reports the number of mask pixels evaluated, so callers can
/// skip the metric when the mask is too small to be meaningful.
#[must_use]
pub fn masked_iou(a: &BitMap, b: &BitMap, mask: &StructuralMask) -> IouOutcome {
    debug_assert_eq!(a.dimensions(), mask.dimensions());
    let bits = mask.bits();
    IouOutcome::from_counts(
        a.and_count_masked(b, bits),
        a.or_count_masked(b, bits),
        Some(bits.count_ones()),
    )
}

/// Global IoU excluding the bottom `exclude_pct` fraction of rows.
///
/// Staging comparisons use this to ignore the furniture-heavy floor
/// region: sofas come and go, the ceiling line does not.
///
/// `exclude_pct` is clamped to `0.0..=1.0`.
#[must_use]
pub fn exclude_lower_iou(a: &BitMap, b: &BitMap, exclude_pct: f64) -> IouOutcome {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let (width, height) = a.dimensions();
    let pct = exclude_pct.clamp(0.0, 1.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let kept_rows = (f64::from(height) * (1.0 - pct)).round() as u32;
    let limit = u64::from(kept_rows.min(height)) * u64::from(width);
    IouOutcome::from_counts(
        a.and_count_prefix(b, limit),
        a.or_count_prefix(b, limit),
        None,
    )
}

/// Masked IoU against a 3×3-dilated copy of the structural mask.
///
/// Dilation pulls in edges immediately adjacent to structural
/// elements, so a wall edge rendered one pixel off in the candidate
/// still lands inside the evaluated region instead of being half
/// clipped out of it.
#[must_use]
pub fn structure_only_iou(a: &BitMap, b: &BitMap, mask: &StructuralMask) -> IouOutcome {
    debug_assert_eq!(a.dimensions(), mask.dimensions());
    let dilated = mask.bits().dilate3();
    IouOutcome::from_counts(
        a.and_count_masked(b, &dilated),
        a.or_count_masked(b, &dilated),
        Some(dilated.count_ones()),
    )
}
