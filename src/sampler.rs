//! Frame sampler
//!
//! Pulls the current raw frame from the capture manager on a fixed cadence,
//! copies it into an RGB surface matching the source dimensions and encodes
//! it to JPEG. Sampling is purely local; it never waits on the network.

use bytes::Bytes;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::trace;

use crate::capture::CaptureManager;
use crate::error::{AppError, Result};
use crate::video::{JpegEncoder, Resolution, RgbSurface, SampledFrame};

/// Sampler configuration
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between sampling attempts
    pub interval: Duration,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl SamplerConfig {
    /// The timer cannot run with a zero period
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(AppError::Config(
                "sampling interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            jpeg_quality: 80,
        }
    }
}

/// Frame sampler
pub struct FrameSampler {
    interval: Duration,
    surface: RgbSurface,
    encoder: JpegEncoder,
    next_sequence: u64,
}

impl FrameSampler {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            interval: config.interval,
            surface: RgbSurface::new(Resolution::default()),
            encoder: JpegEncoder::new(config.jpeg_quality),
            next_sequence: 1,
        }
    }

    /// Continue numbering from `sequence` (sequences never repeat across sessions)
    pub fn starting_at(mut self, sequence: u64) -> Self {
        self.next_sequence = sequence.max(1);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sequence number the next sampled frame will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Create the sampling timer.
    ///
    /// The first tick completes immediately. Ticks missed while the runtime
    /// was busy are skipped rather than fired in a burst.
    pub fn arm(&self) -> Interval {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    }

    /// Sample one frame.
    ///
    /// Returns `Ok(None)` when the source is not ready, has zero dimensions
    /// or has not produced a frame yet; those are expected startup transients.
    /// Encoding problems surface as [`AppError::Encoding`](crate::error::AppError::Encoding).
    pub fn sample_once(&mut self, capture: &CaptureManager) -> Result<Option<SampledFrame>> {
        let Some(raw) = capture.current_frame() else {
            return Ok(None);
        };
        if raw.resolution.is_empty() {
            return Ok(None);
        }

        let captured_at = raw.capture_ts;
        self.surface.ensure(raw.resolution);
        self.surface.fill_from(&raw)?;
        drop(raw);

        let data: Bytes = self.encoder.encode(&self.surface)?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        trace!("Sampled frame #{} ({} bytes)", sequence, data.len());

        Ok(Some(SampledFrame {
            data,
            resolution: self.surface.resolution(),
            sequence,
            captured_at,
        }))
    }
}
