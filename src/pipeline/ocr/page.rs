//! Per-page image preparation: blank detection, downscaling, PNG encoding.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageOutputFormat};

use super::OcrError;

/// Pages with fewer non-white pixels than this are treated as blank.
pub const BLANK_PIXEL_THRESHOLD: usize = 5;

/// True when the page is essentially pure white.
///
/// Counts grayscale pixels below 255; the histogram mass outside pure white.
pub fn is_blank(image: &DynamicImage) -> bool {
    let gray = image.to_luma8();
    gray.pixels().filter(|p| p.0[0] != 255).take(BLANK_PIXEL_THRESHOLD).count()
        < BLANK_PIXEL_THRESHOLD
}

/// Shrink so the longest edge is at most `max_side`. Smaller images are kept.
pub fn downscale(image: &DynamicImage, max_side: u32) -> DynamicImage {
    let (w, h) = image.dimensions();
    if w.max(h) <= max_side {
        return image.clone();
    }
    image.thumbnail(max_side, max_side)
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, OcrError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| OcrError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}
