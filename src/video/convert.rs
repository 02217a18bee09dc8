//! Pixel format conversion into the RGB encoding surface
//!
//! Capture sources deliver MJPEG, YUYV or RGB24. The sampler copies every raw
//! frame into a fixed-size RGB24 surface matching the source dimensions
//! before handing it to the JPEG encoder.

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::RawFrame;

/// RGB24 buffer sized for one resolution
pub struct RgbSurface {
    data: Vec<u8>,
    resolution: Resolution,
}

impl RgbSurface {
    /// Create a zeroed surface for the given resolution
    pub fn new(resolution: Resolution) -> Self {
        Self {
            data: vec![0u8; rgb_buffer_size(resolution)],
            resolution,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reallocate when the source changes dimensions; no-op otherwise
    pub fn ensure(&mut self, resolution: Resolution) {
        if self.resolution != resolution {
            self.resolution = resolution;
            self.data = vec![0u8; rgb_buffer_size(resolution)];
        }
    }

    /// Copy a raw frame into the surface, converting as needed
    pub fn fill_from(&mut self, frame: &RawFrame) -> Result<()> {
        if frame.resolution != self.resolution {
            return Err(AppError::Encoding(format!(
                "frame {} does not match surface {}",
                frame.resolution, self.resolution
            )));
        }

        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;

        match frame.format {
            PixelFormat::Rgb24 => copy_rgb24(frame.data(), frame.stride as usize, &mut self.data, width, height),
            PixelFormat::Yuyv => yuyv_to_rgb24(frame.data(), frame.stride as usize, &mut self.data, width, height),
            PixelFormat::Mjpeg => {
                let decoded = image::load_from_memory_with_format(frame.data(), image::ImageFormat::Jpeg)
                    .map_err(|e| AppError::Encoding(format!("MJPEG decode failed: {}", e)))?
                    .to_rgb8();
                if decoded.width() != self.resolution.width || decoded.height() != self.resolution.height {
                    return Err(AppError::Encoding(format!(
                        "MJPEG frame is {}x{}, expected {}",
                        decoded.width(),
                        decoded.height(),
                        self.resolution
                    )));
                }
                self.data.copy_from_slice(decoded.as_raw());
                Ok(())
            }
        }
    }
}

/// Size of an RGB24 buffer for a resolution
pub fn rgb_buffer_size(resolution: Resolution) -> usize {
    resolution.pixels() as usize * 3
}

fn copy_rgb24(src: &[u8], stride: usize, dst: &mut [u8], width: usize, height: usize) -> Result<()> {
    let row = width * 3;
    let stride = if stride == 0 { row } else { stride };
    let needed = stride * (height - 1) + row;
    if src.len() < needed {
        return Err(AppError::Encoding(format!(
            "RGB24 data too small: {} < {}",
            src.len(),
            needed
        )));
    }

    for y in 0..height {
        let line = &src[y * stride..y * stride + row];
        dst[y * row..(y + 1) * row].copy_from_slice(line);
    }
    Ok(())
}

/// YUYV (YUV 4:2:2) to RGB24, BT.601 limited range
fn yuyv_to_rgb24(src: &[u8], stride: usize, dst: &mut [u8], width: usize, height: usize) -> Result<()> {
    let row = width * 2;
    let stride = if stride == 0 { row } else { stride };
    let needed = stride * (height - 1) + row;
    if src.len() < needed {
        return Err(AppError::Encoding(format!(
            "YUYV data too small: {} < {}",
            src.len(),
            needed
        )));
    }

    for y in 0..height {
        let line = &src[y * stride..y * stride + row];
        let out = &mut dst[y * width * 3..(y + 1) * width * 3];
        for (pair, px) in line.chunks_exact(4).zip(out.chunks_exact_mut(6)) {
            let u = pair[1] as i32 - 128;
            let v = pair[3] as i32 - 128;
            write_rgb(pair[0], u, v, &mut px[0..3]);
            write_rgb(pair[2], u, v, &mut px[3..6]);
        }
    }
    Ok(())
}

#[inline]
fn write_rgb(y: u8, u: i32, v: i32, out: &mut [u8]) {
    let c = (y as i32 - 16).max(0) * 298;
    out[0] = clamp((c + 409 * v + 128) >> 8);
    out[1] = clamp((c - 100 * u - 208 * v + 128) >> 8);
    out[2] = clamp((c + 516 * u + 128) >> 8);
}

#[inline]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
