//! Thumbnail rendering for images and videos.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use tokio::process::Command;

pub const THUMBNAIL_MIMETYPE: &str = "image/jpeg";
const THUMBNAIL_QUALITY: u8 = 80;

/// Renders a JPEG thumbnail from stored file contents.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    async fn generate(&self, data: Bytes, mimetype: &str) -> Result<Bytes>;
}

/// Decodes images in-process and extracts the first video frame with FFmpeg.
#[derive(Debug, Clone)]
pub struct MediaThumbnailer {
    ffmpeg_path: String,
    max_dimension: u32,
}

impl MediaThumbnailer {
    pub fn new(ffmpeg_path: impl Into<String>, max_dimension: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            max_dimension: max_dimension.max(1),
        }
    }

    #[cfg(feature = "image")]
    async fn image_thumbnail(&self, data: Bytes) -> Result<Bytes> {
        let max = self.max_dimension;
        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&data).context("Failed to decode image")?;
            let thumb = if img.width() > max || img.height() > max {
                img.thumbnail(max, max)
            } else {
                img
            };
            crate::compression::encode_jpeg(&thumb, THUMBNAIL_QUALITY)
        })
        .await
        .context("Thumbnail task panicked")?
    }

    #[cfg(not(feature = "image"))]
    async fn image_thumbnail(&self, _data: Bytes) -> Result<Bytes> {
        bail!("Image support is not enabled")
    }

    #[cfg(feature = "video")]
    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn video_thumbnail(&self, data: Bytes) -> Result<Bytes> {
        let input = tempfile::Builder::new()
            .prefix("skycloud-thumb-")
            .tempfile()
            .context("Failed to create temp file for video")?;
        tokio::fs::write(input.path(), &data)
            .await
            .context("Failed to write video to temp file")?;

        let scale = format!(
            "scale={0}:{0}:force_original_aspect_ratio=decrease",
            self.max_dimension
        );
        let input_path = input.path().to_string_lossy().to_string();
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            input_path.as_str(),
            "-frames:v",
            "1",
            "-vf",
            scale.as_str(),
            "-f",
            "image2pipe",
            "-c:v",
            "mjpeg",
            "pipe:1",
        ];

        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to execute ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("FFmpeg failed: {}", stderr));
        }
        if output.stdout.is_empty() {
            bail!("FFmpeg produced no frame");
        }

        Ok(Bytes::from(output.stdout))
    }

    #[cfg(not(feature = "video"))]
    async fn video_thumbnail(&self, _data: Bytes) -> Result<Bytes> {
        bail!("Video support is not enabled")
    }
}

#[async_trait]
impl ThumbnailGenerator for MediaThumbnailer {
    async fn generate(&self, data: Bytes, mimetype: &str) -> Result<Bytes> {
        if mimetype.starts_with("image/") {
            self.image_thumbnail(data).await
        } else if mimetype.starts_with("video/") {
            self.video_thumbnail(data).await
        } else {
            bail!("Cannot render a thumbnail for {}", mimetype)
        }
    }
}

#[cfg(all(test, feature = "image"))]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Bytes {
        let img = RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    #[tokio::test]
    async fn large_images_are_downscaled() {
        let thumbnailer = MediaThumbnailer::new("ffmpeg", 64);
        let out = thumbnailer.generate(png(400, 200), "image/png").await.unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 32);
    }

    #[tokio::test]
    async fn small_images_keep_their_size() {
        let thumbnailer = MediaThumbnailer::new("ffmpeg", 64);
        let out = thumbnailer.generate(png(20, 10), "image/png").await.unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }

    #[tokio::test]
    async fn unsupported_types_fail() {
        let thumbnailer = MediaThumbnailer::new("ffmpeg", 64);
        assert!(thumbnailer
            .generate(Bytes::from_static(b"hello"), "text/plain")
            .await
            .is_err());
        assert!(thumbnailer
            .generate(Bytes::from_static(b"garbage"), "image/png")
            .await
            .is_err());
    }

    #[cfg(feature = "video")]
    #[tokio::test]
    async fn missing_ffmpeg_is_an_error() {
        let thumbnailer = MediaThumbnailer::new("/nonexistent/skycloud-ffmpeg", 64);
        let err = thumbnailer
            .generate(Bytes::from_static(b"not really a video"), "video/mp4")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to execute ffmpeg"));
    }
}
