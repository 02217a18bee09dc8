//! Pipeline lifecycle
//!
//! `Idle → Starting → Running → Stopping → Idle`, with `Error` reachable from
//! `Starting` (acquisition failed), from `Stopping` (capture source lost
//! while running) and from `Running` if the session task dies. `Error` ends
//! the session; a later `start()` begins a new one.
//!
//! `start()` and `stop()` are serialized: when `stop().await` returns the
//! state is already `Idle`, the capture source is released and the displayed
//! output is cleared.

mod driver;
pub mod stats;

pub use stats::{PipelineStats, StatsSnapshot};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::capture::CaptureManager;
use crate::dispatch::DispatchController;
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};
use crate::renderer::ResultRenderer;
use crate::sampler::{FrameSampler, SamplerConfig};
use crate::transport::FrameProcessor;
use crate::utils::LogThrottler;
use driver::SessionDriver;

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Starting => write!(f, "starting"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Stopping => write!(f, "stopping"),
            PipelineState::Error => write!(f, "error"),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub sampler: SamplerConfig,
    /// Upper bound for one request; `None` waits as long as the endpoint takes
    pub request_timeout: Option<Duration>,
}

/// State shared between the pipeline handle and its session driver
pub(crate) struct Shared {
    state: watch::Sender<PipelineState>,
    last_error: RwLock<Option<String>>,
    event_bus: RwLock<Option<Arc<EventBus>>>,
}

impl Shared {
    fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    fn set_state(&self, state: PipelineState, error: Option<String>) {
        if error.is_some() {
            *self.last_error.write() = error.clone();
        }
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Pipeline state: {} -> {}", previous, state);
            self.publish(SystemEvent::PipelineStateChanged {
                state: state.to_string(),
                error,
            });
        }
    }

    fn publish(&self, event: SystemEvent) {
        if let Some(ref bus) = *self.event_bus.read() {
            bus.publish(event);
        }
    }
}

/// Frame capture and dispatch pipeline
pub struct FramePipeline {
    config: PipelineConfig,
    capture: Arc<CaptureManager>,
    processor: Arc<dyn FrameProcessor>,
    renderer: Arc<ResultRenderer>,
    stats: Arc<PipelineStats>,
    shared: Arc<Shared>,
    /// Sequence the next session starts from
    next_sequence: Arc<AtomicU64>,
    lifecycle: tokio::sync::Mutex<()>,
    cancel: Mutex<Option<CancellationToken>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl FramePipeline {
    pub fn new(
        config: PipelineConfig,
        capture: Arc<CaptureManager>,
        processor: Arc<dyn FrameProcessor>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            config,
            capture,
            processor,
            renderer: Arc::new(ResultRenderer::new()),
            stats: Arc::new(PipelineStats::new()),
            shared: Arc::new(Shared {
                state,
                last_error: RwLock::new(None),
                event_bus: RwLock::new(None),
            }),
            next_sequence: Arc::new(AtomicU64::new(1)),
            lifecycle: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(None),
            driver: Mutex::new(None),
        }
    }

    /// Set event bus for lifecycle and per-frame events.
    ///
    /// Also wires the capture manager to the same bus.
    pub fn set_event_bus(&self, event_bus: Arc<EventBus>) {
        self.capture.set_event_bus(event_bus.clone());
        *self.shared.event_bus.write() = Some(event_bus);
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    /// Subscribe to lifecycle changes
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.shared.state.subscribe()
    }

    /// Error that ended the last failed session
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.read().clone()
    }

    pub fn renderer(&self) -> Arc<ResultRenderer> {
        self.renderer.clone()
    }

    pub fn capture(&self) -> Arc<CaptureManager> {
        self.capture.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a session.
    ///
    /// No-op while starting or running. Suspends until the capture source is
    /// ready; an acquisition or playback failure moves the pipeline to
    /// `Error` and is returned.
    pub async fn start(&self) -> Result<()> {
        let _lock = self.lifecycle.lock().await;

        let state = self.state();
        if matches!(state, PipelineState::Starting | PipelineState::Running) {
            debug!("Pipeline already {}, ignoring start", state);
            return Ok(());
        }
        self.config.sampler.validate()?;

        // A session that failed on its own may still be tearing down
        self.join_driver().await;

        self.shared.set_state(PipelineState::Starting, None);
        self.renderer.clear();
        info!("Starting pipeline");

        if let Err(e) = self.capture.acquire().await {
            error!("Pipeline start failed: {}", e);
            self.shared.publish(SystemEvent::PipelineError {
                message: e.to_string(),
            });
            self.shared
                .set_state(PipelineState::Error, Some(e.to_string()));
            return Err(e);
        }

        let first_sequence = self
            .next_sequence
            .load(std::sync::atomic::Ordering::SeqCst);
        let sampler = FrameSampler::new(&self.config.sampler).starting_at(first_sequence);
        let dispatcher = DispatchController::new(
            self.processor.clone(),
            self.config.request_timeout,
            first_sequence,
        );
        let cancel = CancellationToken::new();

        self.stats.reset();
        *self.shared.last_error.write() = None;
        self.shared.set_state(PipelineState::Running, None);

        let session = SessionDriver {
            shared: self.shared.clone(),
            capture: self.capture.clone(),
            renderer: self.renderer.clone(),
            stats: self.stats.clone(),
            sampler,
            dispatcher,
            next_sequence: self.next_sequence.clone(),
            cancel: cancel.clone(),
            throttler: LogThrottler::with_secs(5),
        };
        let session = tokio::spawn(session.run());
        *self.cancel.lock() = Some(cancel);
        *self.driver.lock() = Some(tokio::spawn(supervise(
            session,
            self.shared.clone(),
            self.capture.clone(),
            self.renderer.clone(),
        )));

        info!(
            "Pipeline running (interval {}ms)",
            self.config.sampler.interval.as_millis()
        );
        Ok(())
    }

    /// Stop the current session.
    ///
    /// No-op while idle. Disarms the sampler, waits for the in-flight
    /// request, then releases the capture source and clears the output.
    /// Stopping from `Error` returns the pipeline to `Idle`.
    pub async fn stop(&self) -> Result<()> {
        let _lock = self.lifecycle.lock().await;

        let state = self.state();
        if state == PipelineState::Idle {
            debug!("Pipeline idle, ignoring stop");
            return Ok(());
        }

        if state == PipelineState::Running {
            info!("Stopping pipeline");
            self.shared.set_state(PipelineState::Stopping, None);
        }

        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        self.join_driver().await;

        self.capture.release().await;
        self.renderer.clear();
        self.shared.set_state(PipelineState::Idle, None);
        Ok(())
    }

    async fn join_driver(&self) {
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Pipeline session task failed: {}", e);
            }
        }
    }
}

/// Await a session task. A session that died without its own teardown
/// leaves the pipeline in `Error` with the capture released.
async fn supervise(
    session: JoinHandle<()>,
    shared: Arc<Shared>,
    capture: Arc<CaptureManager>,
    renderer: Arc<ResultRenderer>,
) {
    let Err(e) = session.await else {
        return;
    };

    let reason = if e.is_panic() {
        "session task panicked".to_string()
    } else {
        format!("session task failed: {}", e)
    };
    error!("Pipeline {}", reason);

    capture.release().await;
    renderer.clear();
    shared.publish(SystemEvent::PipelineError {
        message: reason.clone(),
    });
    shared.set_state(PipelineState::Error, Some(reason));
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PatternConfig, PatternSource};
    use crate::error::AppError;
    use crate::transport::TransportError;
    use crate::video::{Resolution, SampledFrame};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct Echo;

    #[async_trait]
    impl FrameProcessor for Echo {
        async fn process(
            &self,
            frame: SampledFrame,
        ) -> std::result::Result<Bytes, TransportError> {
            Ok(frame.data)
        }
    }

    fn pipeline(pattern: PatternConfig) -> FramePipeline {
        let capture = CaptureManager::new(
            Arc::new(PatternSource::new(pattern)),
            Duration::from_secs(1),
        );
        FramePipeline::new(
            PipelineConfig {
                sampler: SamplerConfig {
                    interval: Duration::from_millis(100),
                    jpeg_quality: 70,
                },
                request_timeout: None,
            },
            Arc::new(capture),
            Arc::new(Echo),
        )
    }

    fn small() -> PatternConfig {
        PatternConfig {
            resolution: Resolution::new(64, 48),
            ..Default::default()
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_string(&PipelineState::Error).unwrap(),
            "\"error\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop() {
        let pipeline = pipeline(small());
        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert!(pipeline.capture().is_ready());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(pipeline.renderer().has_content());

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!pipeline.capture().is_ready());
        assert!(!pipeline.renderer().has_content());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let pipeline = pipeline(small());
        pipeline.start().await.unwrap();
        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_rejected_before_acquire() {
        let capture = CaptureManager::new(
            Arc::new(PatternSource::new(small())),
            Duration::from_secs(1),
        );
        let pipeline = FramePipeline::new(
            PipelineConfig {
                sampler: SamplerConfig {
                    interval: Duration::ZERO,
                    jpeg_quality: 70,
                },
                request_timeout: None,
            },
            Arc::new(capture),
            Arc::new(Echo),
        );
        let rx = pipeline.subscribe_state();

        let err = pipeline.start().await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!rx.has_changed().unwrap());
        assert!(!pipeline.capture().is_ready());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let pipeline = pipeline(small());
        let rx = pipeline.subscribe_state();
        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_acquisition_failure() {
        let pipeline = pipeline(PatternConfig {
            fail_with: Some("permission denied".to_string()),
            ..small()
        });

        let err = pipeline.start().await.unwrap_err();
        assert!(matches!(err, AppError::Acquisition(_)));
        assert_eq!(pipeline.state(), PipelineState::Error);
        assert!(pipeline.last_error().unwrap().contains("permission denied"));
        assert_eq!(pipeline.stats().sampled, 0);

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequences_continue_across_sessions() {
        let pipeline = pipeline(small());

        pipeline.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        pipeline.stop().await.unwrap();
        let first_session = pipeline.stats().sent;
        assert!(first_session > 0);

        pipeline.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let shown = pipeline.renderer().latest().unwrap();
        assert_eq!(shown.sequence, first_session + 1);
        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_published() {
        let pipeline = pipeline(small());
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        pipeline.set_event_bus(bus);

        pipeline.start().await.unwrap();
        pipeline.stop().await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SystemEvent::PipelineStateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(states, vec!["starting", "running", "stopping", "idle"]);
    }
}
