//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

/// System event enumeration
///
/// Serialized as:
/// ```json
/// {
///   "event": "pipeline.state_changed",
///   "data": { "state": "running", "error": null }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// Pipeline lifecycle state changed
    #[serde(rename = "pipeline.state_changed")]
    PipelineStateChanged {
        /// "idle", "starting", "running", "stopping", "error"
        state: String,
        /// Error detail when entering the error state
        error: Option<String>,
    },

    /// Capture source status changed
    #[serde(rename = "capture.state_changed")]
    CaptureStateChanged {
        /// "unacquired", "acquiring", "ready", "failed"
        status: String,
        width: u32,
        height: u32,
        error: Option<String>,
    },

    /// A processed frame was presented
    #[serde(rename = "frame.processed")]
    FrameProcessed {
        sequence: u64,
        /// Round trip of the request in milliseconds
        latency_ms: u64,
        /// Response size in bytes
        size: usize,
    },

    /// A dispatched frame failed in transport (non-fatal)
    #[serde(rename = "frame.failed")]
    FrameFailed { sequence: u64, reason: String },

    /// Fatal pipeline error (acquisition, playback, device lost)
    #[serde(rename = "pipeline.error")]
    PipelineError { message: String },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::PipelineStateChanged { .. } => "pipeline.state_changed",
            Self::CaptureStateChanged { .. } => "capture.state_changed",
            Self::FrameProcessed { .. } => "frame.processed",
            Self::FrameFailed { .. } => "frame.failed",
            Self::PipelineError { .. } => "pipeline.error",
        }
    }
}
