//! Dispatch controller (backpressure)
//!
//! At most one frame is in flight to the detection endpoint. Dispatch is
//! guarded by a binary semaphore: the single permit moves into the
//! [`InFlightRequest`] and comes back when the request resolves, whatever
//! the outcome. A tick that finds the permit taken is dropped, never queued,
//! so throughput settles at `min(cadence, 1 / round_trip)` with bounded
//! latency and memory.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::transport::{FrameProcessor, TransportError};
use crate::video::SampledFrame;

/// Exclusive right to start one request
pub struct DispatchSlot {
    permit: OwnedSemaphorePermit,
}

/// The single outstanding request
pub struct InFlightRequest {
    sequence: u64,
    started_at: Instant,
    permit: Option<OwnedSemaphorePermit>,
    response: BoxFuture<'static, Result<Bytes, TransportError>>,
}

impl InFlightRequest {
    /// Sequence of the frame being carried
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Future for InFlightRequest {
    type Output = Completion;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Completion> {
        let this = self.get_mut();
        let result = ready!(this.response.as_mut().poll(cx));
        // Release the dispatch permit before anyone observes the outcome
        this.permit.take();
        Poll::Ready(Completion {
            sequence: this.sequence,
            round_trip: this.started_at.elapsed(),
            result,
        })
    }
}

/// Outcome of an in-flight request
#[derive(Debug)]
pub struct Completion {
    pub sequence: u64,
    pub round_trip: Duration,
    pub result: Result<Bytes, TransportError>,
}

/// Dispatch controller for one pipeline session
pub struct DispatchController {
    permit: Arc<Semaphore>,
    processor: Arc<dyn FrameProcessor>,
    request_timeout: Option<Duration>,
    /// First sequence number sampled in this session
    session_floor: u64,
}

impl DispatchController {
    pub fn new(
        processor: Arc<dyn FrameProcessor>,
        request_timeout: Option<Duration>,
        session_floor: u64,
    ) -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            processor,
            request_timeout,
            session_floor,
        }
    }

    /// Whether a request is in flight
    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Take the dispatch permit if it is free
    pub fn try_reserve(&self) -> Option<DispatchSlot> {
        self.permit
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| DispatchSlot { permit })
    }

    /// Start sending `frame`, consuming the reserved slot
    pub fn dispatch(&self, slot: DispatchSlot, frame: SampledFrame) -> InFlightRequest {
        let sequence = frame.sequence;
        let processor = self.processor.clone();
        let timeout = self.request_timeout;

        debug!(
            "Dispatching frame #{} ({} bytes, captured {}ms ago)",
            sequence,
            frame.len(),
            frame.captured_at.elapsed().as_millis()
        );

        let response = async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, processor.process(frame)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::TimedOut),
                },
                None => processor.process(frame).await,
            }
        }
        .boxed();

        InFlightRequest {
            sequence,
            started_at: Instant::now(),
            permit: Some(slot.permit),
            response,
        }
    }

    /// Whether a completion belongs to this session
    pub fn is_current(&self, sequence: u64) -> bool {
        sequence >= self.session_floor
    }
}
