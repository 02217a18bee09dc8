//! Pipeline counters
//!
//! Updated by the session driver, read by anyone holding the pipeline.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Number of completions in the rolling latency window
const LATENCY_WINDOW: usize = 30;

/// Live pipeline counters
pub struct PipelineStats {
    ticks: AtomicU64,
    sampled: AtomicU64,
    sent: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    encode_failures: AtomicU64,
    round_trips: Mutex<VecDeque<Duration>>,
    session: Mutex<Option<(DateTime<Utc>, Instant)>>,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Sampler timer ticks
    pub ticks: u64,
    /// Frames pulled from the capture source, whether or not they encoded
    pub sampled: u64,
    /// Frames handed to the endpoint
    pub sent: u64,
    /// Successful responses
    pub processed: u64,
    /// Ticks dropped because a request was in flight
    pub skipped: u64,
    /// Requests that failed in transport
    pub failed: u64,
    pub encode_failures: u64,
    /// Mean round trip over the last completions, in milliseconds
    pub avg_round_trip_ms: f64,
    /// Processed frames per second since the session started
    pub fps: f64,
    pub session_start: Option<DateTime<Utc>>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            sampled: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            round_trips: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            session: Mutex::new(None),
        }
    }

    /// Zero every counter and start a new session clock
    pub fn reset(&self) {
        for counter in [
            &self.ticks,
            &self.sampled,
            &self.sent,
            &self.processed,
            &self.skipped,
            &self.failed,
            &self.encode_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.round_trips.lock().clear();
        *self.session.lock() = Some((Utc::now(), Instant::now()));
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A raw frame was taken from the capture source
    pub fn record_sampled(&self) {
        self.sampled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, round_trip: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.push_round_trip(round_trip);
    }

    pub fn record_failed(&self, round_trip: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.push_round_trip(round_trip);
    }

    fn push_round_trip(&self, round_trip: Duration) {
        let mut window = self.round_trips.lock();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(round_trip);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);

        let avg_round_trip_ms = {
            let window = self.round_trips.lock();
            if window.is_empty() {
                0.0
            } else {
                let total: Duration = window.iter().sum();
                total.as_secs_f64() * 1000.0 / window.len() as f64
            }
        };

        let session = *self.session.lock();
        let fps = match session {
            Some((_, started)) => {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    processed as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            sampled: self.sampled.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            processed,
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            avg_round_trip_ms,
            fps,
            session_start: session.map(|(wall, _)| wall),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
