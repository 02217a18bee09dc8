//! Capture source manager
//!
//! Owns the acquired [`CaptureStream`] and publishes its lifecycle
//! (`Unacquired → Acquiring → Ready | Failed`) on a watch channel.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::source::{CaptureStream, FrameSource};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::video::{RawFrame, Resolution};

/// Capture resource status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    /// No device held
    Unacquired,
    /// Waiting for the device to open and deliver a frame
    Acquiring,
    /// Producing frames
    Ready,
    /// Acquisition failed or the device was lost
    Failed,
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureStatus::Unacquired => write!(f, "unacquired"),
            CaptureStatus::Acquiring => write!(f, "acquiring"),
            CaptureStatus::Ready => write!(f, "ready"),
            CaptureStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Observable view of the capture resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSnapshot {
    pub status: CaptureStatus,
    /// Native dimensions, non-zero whenever status is `Ready`
    pub resolution: Resolution,
    /// Error detail when status is `Failed`
    pub error: Option<String>,
}

impl CaptureSnapshot {
    fn unacquired() -> Self {
        Self {
            status: CaptureStatus::Unacquired,
            resolution: Resolution::default(),
            error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == CaptureStatus::Ready
    }
}

/// Capture source manager
pub struct CaptureManager {
    source: Arc<dyn FrameSource>,
    acquire_timeout: Duration,
    stream: Mutex<Option<Box<dyn CaptureStream>>>,
    state: watch::Sender<CaptureSnapshot>,
    event_bus: RwLock<Option<Arc<EventBus>>>,
}

impl CaptureManager {
    /// Create a manager for a source
    pub fn new(source: Arc<dyn FrameSource>, acquire_timeout: Duration) -> Self {
        let (state, _) = watch::channel(CaptureSnapshot::unacquired());
        Self {
            source,
            acquire_timeout,
            stream: Mutex::new(None),
            state,
            event_bus: RwLock::new(None),
        }
    }

    /// Set event bus for publishing capture events
    pub fn set_event_bus(&self, event_bus: Arc<EventBus>) {
        *self.event_bus.write() = Some(event_bus);
    }

    /// Current snapshot
    pub fn snapshot(&self) -> CaptureSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> CaptureStatus {
        self.state.borrow().status
    }

    pub fn is_ready(&self) -> bool {
        self.status() == CaptureStatus::Ready
    }

    /// Subscribe to readiness changes
    pub fn subscribe(&self) -> watch::Receiver<CaptureSnapshot> {
        self.state.subscribe()
    }

    /// Acquire the capture resource.
    ///
    /// Suspends until the source reports its dimensions and produces frames.
    /// A previously held stream is released first. No retry on failure.
    pub async fn acquire(&self) -> Result<Resolution> {
        self.release_stream().await;
        self.publish(CaptureSnapshot {
            status: CaptureStatus::Acquiring,
            resolution: Resolution::default(),
            error: None,
        });

        info!("Acquiring capture source {}", self.source.name());

        let opened = match tokio::time::timeout(self.acquire_timeout, self.source.open()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Acquisition(format!(
                "{} did not become ready within {}ms",
                self.source.name(),
                self.acquire_timeout.as_millis()
            ))),
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(e)),
        };

        let resolution = stream.resolution();
        if resolution.is_empty() {
            stream.close().await;
            return Err(self.fail(AppError::Playback(format!(
                "{} reported zero dimensions ({})",
                self.source.name(),
                resolution
            ))));
        }

        *self.stream.lock() = Some(stream);
        self.publish(CaptureSnapshot {
            status: CaptureStatus::Ready,
            resolution,
            error: None,
        });
        info!("Capture source ready at {}", resolution);
        Ok(resolution)
    }

    /// Release the capture resource. Idempotent, safe from any state.
    ///
    /// Returns once the backend has stopped its hardware stream.
    pub async fn release(&self) {
        let had_stream = self.release_stream().await;
        if had_stream {
            info!("Capture source released");
        }
        if self.status() != CaptureStatus::Unacquired {
            self.publish(CaptureSnapshot::unacquired());
        }
    }

    /// Latest raw frame; `None` unless the source is ready
    pub fn current_frame(&self) -> Option<RawFrame> {
        if !self.is_ready() {
            return None;
        }
        self.stream.lock().as_ref().and_then(|s| s.current_frame())
    }

    /// Poll the stream for a fatal error.
    ///
    /// Returns `false` and moves to `Failed` when the device was lost. The
    /// dead stream stays held until [`release`](Self::release).
    pub fn check_health(&self) -> bool {
        if !self.is_ready() {
            return self.status() != CaptureStatus::Failed;
        }

        let failure = self.stream.lock().as_ref().and_then(|s| s.failure());
        match failure {
            Some(reason) => {
                error!("Capture source lost: {}", reason);
                self.publish(CaptureSnapshot {
                    status: CaptureStatus::Failed,
                    resolution: Resolution::default(),
                    error: Some(reason),
                });
                false
            }
            None => true,
        }
    }

    async fn release_stream(&self) -> bool {
        let stream = self.stream.lock().take();
        match stream {
            Some(mut stream) => {
                stream.close().await;
                true
            }
            None => false,
        }
    }

    fn fail(&self, err: AppError) -> AppError {
        warn!("Capture acquisition failed: {}", err);
        self.publish(CaptureSnapshot {
            status: CaptureStatus::Failed,
            resolution: Resolution::default(),
            error: Some(err.to_string()),
        });
        err
    }

    fn publish(&self, snapshot: CaptureSnapshot) {
        debug!("Capture status -> {}", snapshot.status);
        if let Some(ref bus) = *self.event_bus.read() {
            bus.publish(SystemEvent::CaptureStateChanged {
                status: snapshot.status.to_string(),
                width: snapshot.resolution.width,
                height: snapshot.resolution.height,
                error: snapshot.error.clone(),
            });
        }
        self.state.send_replace(snapshot);
    }
}
