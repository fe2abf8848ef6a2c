//! services/api/src/adapters/jpeg.rs
//!
//! Implements the `ImageNormalizer` port with the `image` crate: whatever the
//! upload format, the model always receives a JPEG.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use plantai_core::domain::NormalizedImage;
use plantai_core::ports::{ImageNormalizer, PortError, PortResult};
use tracing::error;

/// Decodes any supported raster format and re-encodes it as JPEG at the
/// original dimensions.
#[derive(Clone, Debug)]
pub struct JpegNormalizer {
    quality: u8,
}

impl JpegNormalizer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

fn reencode(raw: &[u8], quality: u8) -> PortResult<NormalizedImage> {
    let decoded = image::load_from_memory(raw)
        .map_err(|e| PortError::InvalidInput(format!("Failed to load image for conversion: {}", e)))?;

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let mut bytes = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
        .map_err(|e| PortError::Unexpected(format!("JPEG encoding failed: {}", e)))?;

    Ok(NormalizedImage::jpeg(bytes))
}

#[async_trait]
impl ImageNormalizer for JpegNormalizer {
    async fn normalize(&self, raw: &[u8]) -> PortResult<NormalizedImage> {
        // Decoding a large photo is CPU-bound; keep it off the async workers.
        let raw = raw.to_vec();
        let quality = self.quality;
        tokio::task::spawn_blocking(move || reencode(&raw, quality))
            .await
            .map_err(|e| {
                error!("Image conversion task failed: {}", e);
                PortError::Unexpected(format!("Image conversion task failed: {}", e))
            })?
    }
}
