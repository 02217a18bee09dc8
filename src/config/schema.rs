use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::pipeline::PipelineConfig;
use crate::sampler::SamplerConfig;
use crate::transport::HttpProcessorConfig;
use crate::video::{PixelFormat, Resolution};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture source settings
    pub capture: CaptureConfig,
    /// Sampling cadence and encoding
    pub sampler: SamplingConfig,
    /// Detection endpoint settings
    pub endpoint: EndpointConfig,
}

impl AppConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sampler.interval_ms == 0 {
            return Err(AppError::Config(
                "sampler.interval_ms must be greater than zero".to_string(),
            ));
        }
        if !(1..=100).contains(&self.sampler.jpeg_quality) {
            return Err(AppError::Config(format!(
                "sampler.jpeg_quality must be within 1-100, got {}",
                self.sampler.jpeg_quality
            )));
        }
        if self.endpoint.url.trim().is_empty() {
            return Err(AppError::Config("endpoint.url must not be empty".to_string()));
        }
        if self.endpoint.request_timeout_ms == Some(0) {
            return Err(AppError::Config(
                "endpoint.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.capture.acquire_timeout_ms == 0 {
            return Err(AppError::Config(
                "capture.acquire_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(AppError::Config(format!(
                "capture resolution {}x{} is empty",
                self.capture.width, self.capture.height
            )));
        }
        self.capture.pixel_format()?;
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sampler: SamplerConfig {
                interval: Duration::from_millis(self.sampler.interval_ms),
                jpeg_quality: self.sampler.jpeg_quality,
            },
            request_timeout: self.endpoint.request_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn http_config(&self) -> HttpProcessorConfig {
        HttpProcessorConfig {
            endpoint: self.endpoint.url.clone(),
            connect_timeout: Duration::from_millis(self.endpoint.connect_timeout_ms),
        }
    }
}

/// Capture backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Synthetic moving test pattern
    #[default]
    Pattern,
    /// V4L2 camera (requires the `v4l2` feature)
    V4l2,
}

/// Capture source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Video device path (e.g., /dev/video0)
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Pixel format requested from the device ("mjpeg", "yuyv", "rgb24")
    pub format: String,
    pub fps: u32,
    /// Give up acquiring after this long
    pub acquire_timeout_ms: u64,
    /// Frames discarded while the camera adjusts exposure
    pub warmup_frames: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Pattern,
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            format: "mjpeg".to_string(),
            fps: 30,
            acquire_timeout_ms: 10_000,
            warmup_frames: 5,
        }
    }
}

impl CaptureConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn pixel_format(&self) -> Result<PixelFormat> {
        self.format.parse().map_err(AppError::Config)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Time between samples
    pub interval_ms: u64,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            jpeg_quality: 80,
        }
    }
}

/// Detection endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL of the detection backend
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Per-request limit; unset waits for the endpoint indefinitely
    pub request_timeout_ms: Option<u64>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: None,
        }
    }
}
