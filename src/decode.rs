use image::RgbImage;

use crate::errors::{Result, VisionError};

/// Decodes an encoded image (any enabled format) into an 8-bit RGB buffer.
///
/// Alpha is dropped and other color types are converted, so models always see three
/// channels in RGB order.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(VisionError::validation("image", "is empty"));
    }

    let image = image::load_from_memory(bytes)
        .map_err(|e| VisionError::validation("image", format!("could not be decoded: {e}")))?;
    Ok(image.into_rgb8())
}
