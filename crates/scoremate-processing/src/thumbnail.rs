use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;

pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// Bounding box and JPEG quality for score thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSpec {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self {
            width: 300,
            height: 400,
            quality: 85,
        }
    }
}

impl ThumbnailSpec {
    /// Decode a rendered page, scale it to fit the box (aspect ratio kept,
    /// never upscaled) and encode it as JPEG.
    pub fn fit_to_jpeg(&self, rendered: &[u8]) -> Result<Vec<u8>> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("Thumbnail dimensions must be non-zero"));
        }

        let page = image::load_from_memory(rendered).context("Failed to decode rendered page")?;
        let fitted = if page.width() > self.width || page.height() > self.height {
            page.thumbnail(self.width, self.height)
        } else {
            page
        };

        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(fitted.to_rgb8());

        let mut out = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut out, self.quality.clamp(1, 100));
        rgb.write_with_encoder(encoder)
            .context("Failed to encode JPEG thumbnail")?;

        tracing::debug!(
            width = rgb.width(),
            height = rgb.height(),
            size_bytes = out.get_ref().len(),
            "Thumbnail encoded"
        );

        Ok(out.into_inner())
    }
}
