//! Synthetic test pattern source
//!
//! Generates a moving RGB24 gradient. Used when no camera is present and as a
//! deterministic source in tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, Instant};

use super::source::{CaptureStream, FrameSource};
use crate::error::{AppError, Result};
use crate::video::{PixelFormat, RawFrame, Resolution};

/// Pattern source configuration
#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Frame dimensions
    pub resolution: Resolution,
    /// Pixels the pattern scrolls per second
    pub speed: u32,
    /// Delay before the source reports ready (simulates device warm-up)
    pub startup_delay: Duration,
    /// Fail acquisition with this reason (simulates a denied device)
    pub fail_with: Option<String>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::VGA,
            speed: 120,
            startup_delay: Duration::ZERO,
            fail_with: None,
        }
    }
}

/// Test pattern frame source
pub struct PatternSource {
    config: PatternConfig,
}

impl PatternSource {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl FrameSource for PatternSource {
    fn name(&self) -> String {
        format!("pattern:{}", self.config.resolution)
    }

    async fn open(&self) -> Result<Box<dyn CaptureStream>> {
        if !self.config.startup_delay.is_zero() {
            tokio::time::sleep(self.config.startup_delay).await;
        }
        if let Some(ref reason) = self.config.fail_with {
            return Err(AppError::Acquisition(reason.clone()));
        }

        Ok(Box::new(PatternStream {
            resolution: self.config.resolution,
            speed: self.config.speed,
            started: Instant::now(),
            open: true,
        }))
    }
}

struct PatternStream {
    resolution: Resolution,
    speed: u32,
    started: Instant,
    open: bool,
}

impl PatternStream {
    fn render(&self) -> Vec<u8> {
        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;
        let offset = (self.started.elapsed().as_secs_f64() * self.speed as f64) as usize;

        let mut data = vec![0u8; width * height * 3];
        for (y, row) in data.chunks_exact_mut(width * 3).enumerate() {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                px[0] = ((x + offset) % 256) as u8;
                px[1] = (y % 256) as u8;
                px[2] = (((x + y) / 2 + offset) % 256) as u8;
            }
        }
        data
    }
}

#[async_trait]
impl CaptureStream for PatternStream {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn current_frame(&self) -> Option<RawFrame> {
        if !self.open || self.resolution.is_empty() {
            return None;
        }
        Some(RawFrame::new(
            Bytes::from(self.render()),
            self.resolution,
            PixelFormat::Rgb24,
            self.resolution.width * 3,
        ))
    }

    fn failure(&self) -> Option<String> {
        None
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pattern_frame_size() {
        let source = PatternSource::new(PatternConfig {
            resolution: Resolution::new(32, 16),
            ..Default::default()
        });
        let stream = source.open().await.unwrap();
        let frame = stream.current_frame().unwrap();
        assert_eq!(frame.len(), 32 * 16 * 3);
        assert_eq!(frame.format, PixelFormat::Rgb24);
    }

    #[tokio::test]
    async fn test_closed_stream_has_no_frames() {
        let source = PatternSource::new(PatternConfig::default());
        let mut stream = source.open().await.unwrap();
        stream.close().await;
        assert!(stream.current_frame().is_none());
    }

    #[tokio::test]
    async fn test_configured_failure() {
        let source = PatternSource::new(PatternConfig {
            fail_with: Some("device busy".to_string()),
            ..Default::default()
        });
        assert!(matches!(source.open().await, Err(AppError::Acquisition(_))));
    }
}
