//! Vision payload preparation
//!
//! Turns a scanned raster into the JPEG bytes every provider receives.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;

/// Maximum image dimension (width or height) sent to a provider
const MAX_DIMENSION: u32 = 2000;

/// Fixed JPEG quality for provider payloads
pub const JPEG_QUALITY: u8 = 75;

/// Encode a scan as JPEG for a vision request
///
/// - Scales down scans whose long edge exceeds [`MAX_DIMENSION`]
/// - Drops alpha (JPEG has no alpha channel)
pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let rgb = resize_if_needed(image).to_rgb8();

    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)?;

    Ok(buffer.into_inner())
}

/// Resize image if it exceeds maximum dimensions
fn resize_if_needed(img: &DynamicImage) -> DynamicImage {
    let (width, height) = (img.width(), img.height());

    if width <= MAX_DIMENSION && height <= MAX_DIMENSION {
        return img.clone();
    }

    let scale = MAX_DIMENSION as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * scale) as u32).max(1);
    let new_height = ((height as f32 * scale) as u32).max(1);

    img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
}
