//! Result renderer
//!
//! Holds the most recently processed image. Presenting a new image replaces
//! the previous one in a single step and releases the old buffer; observers
//! watching the channel always see either the old or the new frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

use crate::video::ProcessedFrame;

/// Displayed processed frame, shared with observers
pub type DisplayFrame = Option<Arc<ProcessedFrame>>;

/// Result renderer
pub struct ResultRenderer {
    current: watch::Sender<DisplayFrame>,
    presented: AtomicU64,
    released: AtomicU64,
}

impl ResultRenderer {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current,
            presented: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Replace the displayed image.
    ///
    /// The renderer's reference to the previous image is dropped before
    /// this returns.
    pub fn present(&self, frame: ProcessedFrame) {
        let sequence = frame.sequence;
        let previous = self.current.send_replace(Some(Arc::new(frame)));
        self.presented.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
        drop(previous);
        trace!("Presented frame #{}", sequence);
    }

    /// Remove the displayed image
    pub fn clear(&self) {
        let previous = self.current.send_replace(None);
        if previous.is_some() {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Currently displayed image
    pub fn latest(&self) -> DisplayFrame {
        self.current.borrow().clone()
    }

    pub fn has_content(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Subscribe to display changes
    pub fn subscribe(&self) -> watch::Receiver<DisplayFrame> {
        self.current.subscribe()
    }

    /// Number of images presented so far
    pub fn presented_count(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// Number of images replaced or cleared
    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl Default for ResultRenderer {
    fn default() -> Self {
        Self::new()
    }
}
