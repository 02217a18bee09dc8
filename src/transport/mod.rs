//! Remote detection endpoint boundary
//!
//! The pipeline only knows "submit a buffer, receive a buffer or a failure".
//! [`HttpFrameProcessor`] speaks the detection backend's HTTP API; tests plug
//! in scripted processors.

pub mod http;

pub use http::{HttpFrameProcessor, HttpProcessorConfig};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::video::SampledFrame;

/// Failure of a single in-flight request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request timed out")]
    TimedOut,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Failure class, used as a log throttling key
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Network(_) => "transport_network",
            TransportError::Status { .. } => "transport_status",
            TransportError::TimedOut => "transport_timeout",
            TransportError::InvalidResponse(_) => "transport_invalid",
        }
    }
}

/// Remote frame processor
#[async_trait]
pub trait FrameProcessor: Send + Sync {
    /// Submit one encoded frame and wait for the processed image
    async fn process(&self, frame: SampledFrame) -> Result<Bytes, TransportError>;
}
