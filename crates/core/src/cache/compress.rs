//! Re-encoding of fetched images before they are persisted.
//!
//! Images with an alpha channel are stored as PNG so transparency survives
//! bit-exact and no background colour is introduced. Everything else is
//! flattened to RGB and stored as JPEG at a fixed quality.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::DynamicImage;

use super::types::BlobFormat;
use crate::Error;

/// Default JPEG quality for opaque images.
pub const DEFAULT_QUALITY: u8 = 70;

#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    quality: u8,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl Compressor {
    pub fn new(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Decode `raw` and re-encode it in the format its transparency calls for.
    pub fn encode(&self, raw: &[u8]) -> Result<(Bytes, BlobFormat), Error> {
        let img = image::load_from_memory(raw).map_err(|e| Error::Encode(e.to_string()))?;
        let mut out = Vec::new();

        let format = if img.color().has_alpha() {
            // PNG has no float variant.
            let img = match img {
                DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgba16(img.to_rgba16()),
                other => other,
            };
            img.write_with_encoder(PngEncoder::new(&mut out))
                .map_err(|e| Error::Encode(format!("png: {e}")))?;
            BlobFormat::Lossless
        } else {
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.quality))
                .map_err(|e| Error::Encode(format!("jpeg: {e}")))?;
            BlobFormat::Lossy
        };

        tracing::debug!(input = raw.len(), output = out.len(), format = format.as_str(), "re-encoded image");
        Ok((Bytes::from(out), format))
    }

    /// Run `encode` on the blocking pool.
    pub async fn encode_blocking(&self, raw: Bytes) -> Result<(Bytes, BlobFormat), Error> {
        let compressor = *self;
        tokio::task::spawn_blocking(move || compressor.encode(&raw))
            .await
            .map_err(|e| Error::Encode(format!("encoder task failed: {e}")))?
    }
}
