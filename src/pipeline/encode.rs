//! Image encoding: rendered pages → stored PNG → base64 `ImageData`.
//!
//! PNG is chosen over JPEG because it is lossless — text crispness matters
//! far more than file size when a vision model has to read dense pages.
//! Stored page objects are plain PNG bytes; the base64 wrapping happens at
//! analysis time, per request.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use tracing::debug;

use crate::error::LectureError;

/// PNG-encode a rendered page for storage.
pub fn encode_png(img: &DynamicImage, page: usize) -> Result<Vec<u8>, LectureError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| LectureError::RasterisationFailed {
            page,
            detail: format!("PNG encode failed: {e}"),
        })?;
    Ok(buf)
}

/// Wrap stored PNG bytes as a base64 image attachment for the VLM API.
///
/// ## Why `detail: "high"`?
/// OpenAI's tiling algorithm divides images into 512 px tiles. `detail:
/// "high"` enables up to 10 tiles, so fine print, small tables and math
/// notation stay legible. `detail: "low"` forces a single overview tile and
/// loses all fine structure.
pub fn to_image_data(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
