//! Frame data structures
//!
//! Three buffers travel through the pipeline:
//! - [`RawFrame`]: the latest image pulled from the capture source
//! - [`SampledFrame`]: a JPEG produced by the sampler, owned by the dispatcher
//!   until it is moved into a network request or dropped
//! - [`ProcessedFrame`]: the image returned by the detection endpoint, owned by
//!   the renderer

use bytes::Bytes;
use std::time::{Duration, Instant};

use super::format::{PixelFormat, Resolution};

/// A raw frame as produced by a capture source
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Pixel data
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Stride (bytes per line, 0 for compressed formats)
    pub stride: u32,
    /// Timestamp when frame was captured
    pub capture_ts: Instant,
}

impl RawFrame {
    /// Create a new raw frame
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, stride: u32) -> Self {
        Self {
            data,
            resolution,
            format,
            stride,
            capture_ts: Instant::now(),
        }
    }

    /// Create a frame from a Vec<u8>
    pub fn from_vec(data: Vec<u8>, resolution: Resolution, format: PixelFormat, stride: u32) -> Self {
        Self::new(Bytes::from(data), resolution, format, stride)
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }
}

/// An encoded frame waiting for (or travelling in) a dispatch
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// JPEG data
    pub data: Bytes,
    /// Resolution of the encoding surface
    pub resolution: Resolution,
    /// Monotonic sequence number, never reused across sessions
    pub sequence: u64,
    /// When the capture source produced the pixels
    pub captured_at: Instant,
}

impl SampledFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An image returned by the detection endpoint
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    /// Encoded image data as returned by the endpoint
    pub data: Bytes,
    /// Sequence number of the sampled frame this answers
    pub sequence: u64,
    /// Time between dispatch and response
    pub round_trip: Duration,
}

impl ProcessedFrame {
    pub fn new(data: Bytes, sequence: u64, round_trip: Duration) -> Self {
        Self {
            data,
            sequence,
            round_trip,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check JPEG start/end markers
    pub fn is_jpeg(&self) -> bool {
        is_valid_jpeg(&self.data)
    }
}

/// Validate JPEG framing (SOI marker, EOI or padded tail)
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }

    let start_marker = ((data[0] as u16) << 8) | data[1] as u16;
    if start_marker != 0xFFD8 {
        return false;
    }

    let end = data.len();
    let end_marker = ((data[end - 2] as u16) << 8) | data[end - 1] as u16;

    // Valid end markers: 0xFFD9, 0xD900, 0x0000 (padded)
    matches!(end_marker, 0xFFD9 | 0xD900 | 0x0000)
}
