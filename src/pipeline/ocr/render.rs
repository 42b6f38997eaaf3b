//! Turn a downloaded Paperless original into page images.
//!
//! PDFs are rendered page by page through Google PDFium. TIFF scans yield one
//! page per frame. Anything else is decoded as a single image.
//!
//! `PdfiumRasterizer` is stateless (`Send + Sync`). Each call loads a fresh
//! `Pdfium` handle because the upstream type is `!Send`; the OS caches the
//! library load, so repeat loads are cheap.

use std::io::{Cursor, Read, Seek};

use image::{DynamicImage, GrayImage, ImageBuffer, LumaA, RgbImage, RgbaImage};
use pdfium_render::prelude::*;
use tiff::decoder::{Decoder as TiffDecoder, DecodingResult};
use tiff::ColorType as TiffColor;
use tracing::{debug, warn};

use super::OcrError;

/// Maximum rendered width or height, whatever the DPI asks for.
const MAX_DIMENSION_PX: u32 = 6000;

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Converts original document bytes into one image per page.
pub trait DocumentRasterizer: Send + Sync {
    fn rasterize(&self, bytes: &[u8], content_type: &str) -> Result<Vec<DynamicImage>, OcrError>;
}

pub fn is_pdf(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("pdf")
}

/// TIFF by content type, or by byte-order magic when the type is generic.
pub fn is_tiff(content_type: &str, bytes: &[u8]) -> bool {
    content_type.to_ascii_lowercase().contains("tiff")
        || bytes.starts_with(b"II*\0")
        || bytes.starts_with(b"MM\0*")
}

pub struct PdfiumRasterizer {
    dpi: u32,
}

impl PdfiumRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi: dpi.max(1) }
    }

    /// Fail fast when the PDFium library cannot be found.
    pub fn check_library(&self) -> Result<(), OcrError> {
        load_pdfium().map(|_| ())
    }

    fn render_pdf(&self, bytes: &[u8]) -> Result<Vec<DynamicImage>, OcrError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(map_load_error)?;

        let mut images = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let (target_w, target_h) =
                compute_render_dimensions(page.width().value, page.height().value, self.dpi);
            let config = PdfRenderConfig::new()
                .set_target_width(target_w as i32)
                .set_maximum_height(target_h as i32);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| OcrError::PdfRendering {
                    page: index + 1,
                    reason: format!("Rendering failed: {e}"),
                })?;
            debug!(page = index + 1, width = target_w, height = target_h, "Rendered PDF page");
            images.push(bitmap.as_image());
        }
        Ok(images)
    }
}

impl DocumentRasterizer for PdfiumRasterizer {
    fn rasterize(&self, bytes: &[u8], content_type: &str) -> Result<Vec<DynamicImage>, OcrError> {
        let unsupported = |reason: String| OcrError::UnsupportedContent {
            content_type: content_type.to_string(),
            reason,
        };
        if is_pdf(content_type) {
            return self.render_pdf(bytes);
        }
        if is_tiff(content_type, bytes) {
            let frames = decode_tiff_frames(bytes).map_err(unsupported)?;
            debug!(frames = frames.len(), "Decoded TIFF frames");
            return Ok(frames);
        }
        let image = image::load_from_memory(bytes).map_err(|e| unsupported(e.to_string()))?;
        Ok(vec![image])
    }
}

// ──────────────────────────────────────────────
// TIFF
// ──────────────────────────────────────────────

/// Every frame of a TIFF file, in file order.
fn decode_tiff_frames(bytes: &[u8]) -> Result<Vec<DynamicImage>, String> {
    let mut decoder = TiffDecoder::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut frames = Vec::new();
    loop {
        let frame = decode_tiff_frame(&mut decoder)
            .map_err(|reason| format!("frame {}: {reason}", frames.len() + 1))?;
        frames.push(frame);
        if !decoder.more_images() {
            return Ok(frames);
        }
        decoder.next_image().map_err(|e| e.to_string())?;
    }
}

/// Current frame as an 8-bit image. 16-bit samples keep their high byte.
fn decode_tiff_frame<R: Read + Seek>(decoder: &mut TiffDecoder<R>) -> Result<DynamicImage, String> {
    let (width, height) = decoder.dimensions().map_err(|e| e.to_string())?;
    let color = decoder.colortype().map_err(|e| e.to_string())?;
    let samples: Vec<u8> = match decoder.read_image().map_err(|e| e.to_string())? {
        DecodingResult::U8(data) => data,
        DecodingResult::U16(data) => data.into_iter().map(|s| (s >> 8) as u8).collect(),
        _ => return Err(format!("unsupported sample format for {color:?}")),
    };

    let image = match color {
        TiffColor::Gray(8 | 16) => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
        TiffColor::GrayA(8 | 16) => ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, samples)
            .map(DynamicImage::ImageLumaA8),
        TiffColor::RGB(8 | 16) => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
        TiffColor::RGBA(8 | 16) => RgbaImage::from_raw(width, height, samples).map(DynamicImage::ImageRgba8),
        TiffColor::CMYK(8) => RgbImage::from_raw(width, height, cmyk_to_rgb(&samples))
            .map(DynamicImage::ImageRgb8),
        other => return Err(format!("unsupported colour type {other:?}")),
    };
    image.ok_or_else(|| format!("{width}x{height} frame has a short pixel buffer"))
}

fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    samples
        .chunks_exact(4)
        .flat_map(|px| {
            let k = 255 - u16::from(px[3]);
            let channel = |c: u8| ((255 - u16::from(c)) * k / 255) as u8;
            [channel(px[0]), channel(px[1]), channel(px[2])]
        })
        .collect()
}

// ──────────────────────────────────────────────
// PDFium
// ──────────────────────────────────────────────

/// Bind to PDFium. An explicit `PDFIUM_DYNAMIC_LIB_PATH` wins; otherwise the
/// binary's own directory (and its `lib/`) is tried before the system loader.
fn load_pdfium() -> Result<Pdfium, OcrError> {
    let not_loaded = |reason: String| OcrError::PdfRendering { page: 0, reason };

    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Binding PDFium from PDFIUM_DYNAMIC_LIB_PATH");
        return Pdfium::bind_to_library(&path)
            .map(Pdfium::new)
            .map_err(|e| not_loaded(format!("Cannot bind PDFium at {path}: {e}")));
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.to_path_buf()));
    for dir in exe_dir.iter().flat_map(|d| [d.clone(), d.join("lib")]) {
        let candidate = Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&candidate) {
            debug!(dir = %dir.display(), "Bound PDFium next to the binary");
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library().map(Pdfium::new).map_err(|e| {
        not_loaded(format!(
            "No PDFium library found; set PDFIUM_DYNAMIC_LIB_PATH to the shared library: {e}"
        ))
    })
}

fn map_load_error(e: PdfiumError) -> OcrError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        return OcrError::PdfEncrypted;
    }
    OcrError::PdfRendering {
        page: 0,
        reason: format!("Cannot open PDF: {message}"),
    }
}

/// Render size in pixels for a page measured in points. The longer side never
/// exceeds `MAX_DIMENSION_PX` and neither side drops below one pixel.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let width = (width_points * scale).max(1.0);
    let height = (height_points * scale).max(1.0);

    let longest = width.max(height);
    if longest <= MAX_DIMENSION_PX as f32 {
        return (width as u32, height as u32);
    }
    let shrink = MAX_DIMENSION_PX as f32 / longest;
    let capped = |side: f32| ((side * shrink) as u32).clamp(1, MAX_DIMENSION_PX);
    let (w, h) = (capped(width), capped(height));
    warn!(dpi, width = w, height = h, "Page render size capped");
    (w, h)
}

// ── Mock for testing ──────────────────────────────────────

/// Rasterizer returning a fixed list of page images.
pub struct StaticRasterizer {
    pages: Vec<DynamicImage>,
}

impl StaticRasterizer {
    pub fn new(pages: Vec<DynamicImage>) -> Self {
        Self { pages }
    }
}

impl DocumentRasterizer for StaticRasterizer {
    fn rasterize(&self, _bytes: &[u8], _content_type: &str) -> Result<Vec<DynamicImage>, OcrError> {
        Ok(self.pages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::page::encode_png;
    use image::{GenericImageView, GrayImage, Luma};

    #[test]
    fn a4_at_300dpi() {
        let (w, h) = compute_render_dimensions(595.0, 842.0, 300);
        assert_eq!((w, h), (2479, 3508));
    }

    #[test]
    fn oversized_page_is_capped_with_aspect_ratio() {
        let (w, h) = compute_render_dimensions(2000.0, 1000.0, 300);
        assert!(w <= MAX_DIMENSION_PX && w >= MAX_DIMENSION_PX - 1);
        assert!((h as i64 - (MAX_DIMENSION_PX / 2) as i64).abs() <= 1);
    }

    #[test]
    fn zero_points_clamped_to_one() {
        assert_eq!(compute_render_dimensions(0.0, 0.0, 300), (1, 1));
    }

    #[test]
    fn pdf_detection_is_case_insensitive() {
        assert!(is_pdf("application/pdf"));
        assert!(is_pdf("Application/PDF"));
        assert!(!is_pdf("image/png"));
    }

    #[test]
    fn non_pdf_is_decoded_as_single_image() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 3, Luma([0])));
        let png = encode_png(&img).unwrap();
        let pages = PdfiumRasterizer::new(300).rasterize(&png, "image/png").unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!((pages[0].width(), pages[0].height()), (4, 3));
    }

    fn two_frame_tiff() -> Vec<u8> {
        use tiff::encoder::{colortype, TiffEncoder};

        let mut buf = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut buf).unwrap();
        encoder.write_image::<colortype::Gray8>(4, 3, &[0u8; 12]).unwrap();
        encoder.write_image::<colortype::RGB8>(5, 2, &[255u8; 30]).unwrap();
        drop(encoder);
        buf.into_inner()
    }

    #[test]
    fn every_tiff_frame_becomes_a_page() {
        let pages = PdfiumRasterizer::new(300)
            .rasterize(&two_frame_tiff(), "image/tiff")
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!((pages[0].width(), pages[0].height()), (4, 3));
        assert_eq!((pages[1].width(), pages[1].height()), (5, 2));
    }

    #[test]
    fn tiff_detected_by_magic_without_content_type() {
        let bytes = two_frame_tiff();
        assert!(is_tiff("application/octet-stream", &bytes));
        let pages = PdfiumRasterizer::new(300)
            .rasterize(&bytes, "application/octet-stream")
            .unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn truncated_tiff_is_unsupported() {
        let bytes = two_frame_tiff();
        let err = PdfiumRasterizer::new(300)
            .rasterize(&bytes[..12], "image/tiff")
            .unwrap_err();
        assert!(matches!(err, OcrError::UnsupportedContent { .. }));
    }

    #[test]
    fn cmyk_black_and_white() {
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 0, 0, 0, 0, 255]), vec![255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn garbage_image_is_unsupported() {
        let err = PdfiumRasterizer::new(300)
            .rasterize(b"not an image", "image/jpeg")
            .unwrap_err();
        assert!(matches!(err, OcrError::UnsupportedContent { .. }));
    }
}
