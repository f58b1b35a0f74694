//! Binary Sobel edge detection.
//!
//! Unlike a full Canny pass (blur, non-maximum suppression,
//! hysteresis), structural comparison only needs a stable, cheap edge
//! map that two images can be diffed on. A thresholded Sobel gradient
//! magnitude is deterministic and has no data-dependent control flow,
//! which keeps baseline/candidate maps directly comparable.

use image::GrayImage;

use crate::bitmap::BitMap;

/// Compute a binary edge map via 3×3 Sobel gradient magnitude.
///
/// For each interior pixel, the horizontal and vertical gradients are
/// computed with the standard 3×3 Sobel kernels, and the output bit is
/// set when `sqrt(gx² + gy²)` exceeds `threshold`.
///
/// The 1-pixel border is always unset. This is a deliberate policy:
/// border gradients would need a padding convention, and any choice
/// (clamp, wrap, zero) produces edge artifacts that differ between
/// otherwise-identical images with different borders. Keeping the
/// border unconditionally empty makes outputs reproducible.
#[must_use = "returns the binary edge map"]
pub fn sobel_binary(image: &GrayImage, threshold: f32) -> BitMap {
    let (width, height) = image.dimensions();
    let mut out = BitMap::new(width, height);
    if width < 3 || height < 3 {
        return out;
    }

    let px = |x: u32, y: u32| -> i32 { i32::from(image.get_pixel(x, y).0[0]) };

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let tl = px(x - 1, y - 1);
            let tc = px(x, y - 1);
            let tr = px(x + 1, y - 1);
            let ml = px(x - 1, y);
            let mr = px(x + 1, y);
            let bl = px(x - 1, y + 1);
            let bc = px(x, y + 1);
            let br = px(x + 1, y + 1);

            let gx = (tr + 2 * mr + br) - (tl + 2 * ml + bl);
            let gy = (bl + 2 * bc + br) - (tl + 2 * tc + tr);

            #[allow(clippy::cast_precision_loss)]
            let magnitude = (gx as f32).hypot(gy as f32);
            if magnitude > threshold {
                out.set(x, y);
            }
        }
    }
    out
}
