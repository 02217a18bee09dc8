//! Log throttling utility
//!
//! Per-frame failures (dead endpoint, flaky camera) repeat at the sampling
//! cadence. The throttler lets the first occurrence of a failure class through
//! and then at most one line per interval, counting what it swallowed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Log throttler keyed by failure class
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    /// Create a throttler that logs each key at most once per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Create a throttler with interval specified in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Decide whether `key` may be logged now.
    ///
    /// Returns `Some(n)` when the caller should log, where `n` is the number
    /// of occurrences swallowed since the last logged one; `None` otherwise.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed = entry.suppressed.saturating_add(1);
                None
            }
            Some(entry) => {
                let suppressed = std::mem::take(&mut entry.suppressed);
                entry.last_logged = now;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget every key after a recovery, so the next failure of any class
    /// is logged immediately
    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`. The first line after a quiet period reports
/// how many occurrences were swallowed.
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            let message = format!($($arg)*);
            if suppressed > 0 {
                tracing::warn!("{} ({} suppressed)", message, suppressed);
            } else {
                tracing::warn!("{}", message);
            }
        }
    };
}

/// Throttled `tracing::error!`
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            let message = format!($($arg)*);
            if suppressed > 0 {
                tracing::error!("{} ({} suppressed)", message, suppressed);
            } else {
                tracing::error!("{}", message);
            }
        }
    };
}
