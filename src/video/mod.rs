//! Frame buffers, pixel formats and JPEG encoding
//!
//! This module holds the image types that flow through the relay pipeline.

pub mod convert;
pub mod encoder;
pub mod format;
pub mod frame;

pub use convert::RgbSurface;
pub use encoder::JpegEncoder;
pub use format::{PixelFormat, Resolution};
pub use frame::{ProcessedFrame, RawFrame, SampledFrame};
