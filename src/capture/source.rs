//! Capture backend traits
//!
//! A [`FrameSource`] knows how to open a device; the [`CaptureStream`] it
//! returns represents the acquired resource. Streams are pull-based: they keep
//! only the newest frame and hand out a copy on demand.

use async_trait::async_trait;

use crate::error::Result;
use crate::video::{RawFrame, Resolution};

/// Factory for capture streams (camera, test pattern, ...)
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Human readable source name for logs
    fn name(&self) -> String;

    /// Acquire the device.
    ///
    /// Resolves once the stream knows its dimensions and has produced a frame.
    /// Fails with [`AppError::Acquisition`](crate::error::AppError::Acquisition)
    /// when the device cannot be opened, or
    /// [`AppError::Playback`](crate::error::AppError::Playback) when it opened
    /// but never delivered a frame.
    async fn open(&self) -> Result<Box<dyn CaptureStream>>;
}

/// An acquired capture resource
#[async_trait]
pub trait CaptureStream: Send {
    /// Native dimensions of the stream
    fn resolution(&self) -> Resolution;

    /// Latest frame, if one has been captured
    fn current_frame(&self) -> Option<RawFrame>;

    /// Fatal stream error (device lost, capture thread exited)
    fn failure(&self) -> Option<String>;

    /// Stop the underlying hardware stream. Resolves once the device is free
    /// to be opened again. Must be idempotent.
    async fn close(&mut self);
}
