//! Must-convert input normalization.
//!
//! TIFF is the camera-native encoding browsers cannot render; it is
//! re-encoded to the canonical JPEG before any resizing. Normalization is
//! fail-soft: if conversion fails, processing continues on the original
//! bytes rather than aborting the whole request.

use image::{ImageFormat, ImageReader};
use std::io::Cursor;

/// Quality used for the normalization re-encode. High, because downstream
/// variants re-compress from this intermediate.
const NORMALIZE_QUALITY: u8 = 95;

/// Re-encode must-convert inputs to JPEG; pass everything else through.
///
/// Returns the working bytes and whether a conversion happened.
pub fn normalize_input(data: &[u8]) -> (Vec<u8>, bool) {
    if !matches!(image::guess_format(data), Ok(ImageFormat::Tiff)) {
        return (data.to_vec(), false);
    }

    match convert_to_jpeg(data) {
        Ok(converted) => {
            tracing::debug!(
                source_bytes = data.len(),
                converted_bytes = converted.len(),
                "Normalized TIFF input to JPEG"
            );
            (converted, true)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "TIFF normalization failed, continuing on original bytes"
            );
            (data.to_vec(), false)
        }
    }
}

fn convert_to_jpeg(data: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;

    let mut buffer = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, NORMALIZE_QUALITY);
    image::DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
    Ok(buffer)
}
