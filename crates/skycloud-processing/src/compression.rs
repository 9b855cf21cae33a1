use anyhow::{Context, Result};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;

/// Mimetype of every compressed image.
pub const COMPRESSED_MIMETYPE: &str = "image/jpeg";

/// Whether `compress_image` can handle this content type.
///
/// Animated and vector formats are stored untouched.
pub fn is_compressible(mimetype: &str) -> bool {
    matches!(
        mimetype,
        "image/jpeg" | "image/jpg" | "image/png" | "image/webp" | "image/bmp" | "image/tiff"
    )
}

/// JPEG quality for a compression percent: 0 keeps full quality, 100 compresses hardest.
pub fn jpeg_quality(percent: u8) -> u8 {
    100u8.saturating_sub(percent.min(100)).max(1)
}

/// Re-encode an image as JPEG.
///
/// CPU bound; call from `spawn_blocking` on async paths.
pub fn compress_image(data: &[u8], percent: u8) -> Result<Bytes> {
    let img = image::load_from_memory(data).context("Failed to decode image for compression")?;
    encode_jpeg(&img, jpeg_quality(percent))
}

pub(crate) fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Bytes> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    rgb.write_with_encoder(encoder)
        .context("Failed to encode JPEG")?;

    Ok(Bytes::from(buffer.into_inner()))
}
