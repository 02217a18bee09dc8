//! Session driver
//!
//! One task per running session owns the sampler timer, the dispatch
//! controller and the in-flight request, and multiplexes them with the stop
//! token. Nothing here is shared, so none of it is locked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::stats::PipelineStats;
use super::{PipelineState, Shared};
use crate::capture::CaptureManager;
use crate::dispatch::{Completion, DispatchController, InFlightRequest};
use crate::events::SystemEvent;
use crate::renderer::ResultRenderer;
use crate::sampler::FrameSampler;
use crate::utils::LogThrottler;
use crate::video::ProcessedFrame;

pub(super) struct SessionDriver {
    pub(super) shared: Arc<Shared>,
    pub(super) capture: Arc<CaptureManager>,
    pub(super) renderer: Arc<ResultRenderer>,
    pub(super) stats: Arc<PipelineStats>,
    pub(super) sampler: FrameSampler,
    pub(super) dispatcher: DispatchController,
    pub(super) next_sequence: Arc<AtomicU64>,
    pub(super) cancel: CancellationToken,
    pub(super) throttler: LogThrottler,
}

/// Wait for the in-flight request, or forever when there is none
async fn next_completion(in_flight: &mut Option<InFlightRequest>) -> Completion {
    match in_flight {
        Some(request) => request.await,
        None => std::future::pending().await,
    }
}

impl SessionDriver {
    pub(super) async fn run(mut self) {
        let mut timer = self.sampler.arm();
        let mut in_flight: Option<InFlightRequest> = None;

        debug!(
            "Session driver started (interval {}ms, first sequence #{})",
            self.sampler.interval().as_millis(),
            self.sampler.next_sequence()
        );

        let failure = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break None,

                completion = next_completion(&mut in_flight) => {
                    in_flight = None;
                    self.complete(completion, true);
                }

                _ = timer.tick() => {
                    if let Err(reason) = self.on_tick(&mut in_flight) {
                        break Some(reason);
                    }
                }
            }
        };

        drop(timer);

        if let Some(ref reason) = failure {
            self.shared.set_state(PipelineState::Stopping, None);
            warn!("Stopping pipeline after capture failure: {}", reason);
        }

        if let Some(request) = in_flight.take() {
            debug!("Waiting for in-flight frame #{}", request.sequence());
            let completion = request.await;
            self.complete(completion, false);
        }

        self.capture.release().await;
        self.renderer.clear();

        match failure {
            Some(reason) => {
                self.shared.publish(SystemEvent::PipelineError {
                    message: reason.clone(),
                });
                self.shared.set_state(PipelineState::Error, Some(reason));
            }
            None => {
                self.shared.set_state(PipelineState::Idle, None);
                info!("Pipeline stopped");
            }
        }
    }

    /// Handle one sampler tick. Returns the failure reason when the capture
    /// source was lost.
    fn on_tick(&mut self, in_flight: &mut Option<InFlightRequest>) -> Result<(), String> {
        self.stats.record_tick();

        if !self.capture.check_health() {
            let reason = self
                .capture
                .snapshot()
                .error
                .unwrap_or_else(|| "capture source failed".to_string());
            return Err(reason);
        }

        let Some(slot) = self.dispatcher.try_reserve() else {
            self.stats.record_skipped();
            trace!("Tick skipped: request in flight");
            return Ok(());
        };

        match self.sampler.sample_once(&self.capture) {
            Ok(Some(frame)) => {
                self.stats.record_sampled();
                self.stats.record_sent();
                self.next_sequence
                    .store(self.sampler.next_sequence(), Ordering::SeqCst);
                *in_flight = Some(self.dispatcher.dispatch(slot, frame));
            }
            Ok(None) => trace!("Tick ignored: no frame available"),
            Err(e) => {
                self.stats.record_sampled();
                self.stats.record_encode_failure();
                crate::warn_throttled!(self.throttler, "encode", "Failed to encode frame: {}", e);
            }
        }
        Ok(())
    }

    /// Apply a finished request. Results arriving while stopping are counted
    /// but not presented.
    fn complete(&self, completion: Completion, present: bool) {
        let Completion {
            sequence,
            round_trip,
            result,
        } = completion;

        if !self.dispatcher.is_current(sequence) {
            debug!("Discarding stale result for frame #{}", sequence);
            return;
        }

        match result {
            Ok(data) => {
                self.stats.record_processed(round_trip);
                self.throttler.clear_all();
                if !present {
                    debug!("Frame #{} finished during shutdown, not presented", sequence);
                    return;
                }
                let size = data.len();
                self.renderer
                    .present(ProcessedFrame::new(data, sequence, round_trip));
                self.shared.publish(SystemEvent::FrameProcessed {
                    sequence,
                    latency_ms: round_trip.as_millis() as u64,
                    size,
                });
            }
            Err(e) => {
                self.stats.record_failed(round_trip);
                crate::warn_throttled!(
                    self.throttler,
                    e.kind(),
                    "Frame #{} failed after {}ms: {}",
                    sequence,
                    round_trip.as_millis(),
                    e
                );
                self.shared.publish(SystemEvent::FrameFailed {
                    sequence,
                    reason: e.to_string(),
                });
            }
        }
    }
}
