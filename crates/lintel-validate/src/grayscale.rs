//! Image decoding and grayscale conversion.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces a
//! single-channel grayscale image for the validation engine. This is
//! the only place the engine touches encoded image data; everything
//! downstream operates on `GrayImage` buffers and bit maps.

use image::GrayImage;

use crate::types::ValidateError;

/// Decode raw image bytes and convert to grayscale.
///
/// Supports whatever the `image` crate can decode with the enabled
/// format features. The standard luminance formula is used for
/// RGB-to-gray conversion: `0.299*R + 0.587*G + 0.114*B`.
///
/// # Errors
///
/// Returns [`ValidateError::EmptyInput`] if `bytes` is empty.
/// Returns [`ValidateError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_and_grayscale(bytes: &[u8]) -> Result<GrayImage, ValidateError> {
    if bytes.is_empty() {
        return Err(ValidateError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_luma8())
}
