//! Capture source management
//!
//! The [`CaptureManager`] acquires and releases the local video resource and
//! exposes its readiness; backends implement [`FrameSource`].

pub mod manager;
pub mod pattern;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use manager::{CaptureManager, CaptureSnapshot, CaptureStatus};
pub use pattern::{PatternConfig, PatternSource};
pub use source::{CaptureStream, FrameSource};
#[cfg(feature = "v4l2")]
pub use v4l2::{list_devices, V4l2Config, V4l2Source};
