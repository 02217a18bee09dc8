//! JPEG encoder for the sampling surface
//!
//! Encodes an [`RgbSurface`] into a baseline JPEG at a configurable quality.
//! The output buffer is reused between calls; each frame is handed out as an
//! owned [`Bytes`].

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ExtendedColorType;

use crate::error::{AppError, Result};
use crate::video::convert::RgbSurface;

/// Smallest buffer accepted as a usable JPEG
const MIN_JPEG_SIZE: usize = 128;

/// JPEG encoder
pub struct JpegEncoder {
    quality: u8,
    /// Scratch output, grown to the largest frame seen
    output: Vec<u8>,
}

impl JpegEncoder {
    /// Create an encoder with quality clamped to 1-100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            output: Vec::new(),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode the surface to JPEG
    pub fn encode(&mut self, surface: &RgbSurface) -> Result<Bytes> {
        let resolution = surface.resolution();
        if resolution.is_empty() {
            return Err(AppError::Encoding("surface has zero dimensions".to_string()));
        }

        self.output.clear();
        ImageJpegEncoder::new_with_quality(&mut self.output, self.quality)
            .encode(
                surface.as_bytes(),
                resolution.width,
                resolution.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| AppError::Encoding(format!("JPEG compression failed: {}", e)))?;

        if self.output.len() < MIN_JPEG_SIZE {
            return Err(AppError::Encoding(format!(
                "JPEG output too small: {} bytes",
                self.output.len()
            )));
        }

        Ok(Bytes::copy_from_slice(&self.output))
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}
