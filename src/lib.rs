//! frame-relay - live frame capture and dispatch pipeline
//!
//! Captures frames from a local video source on a fixed cadence, sends them
//! to a remote detection endpoint with at most one request in flight, and
//! exposes the latest processed image for display.

pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod renderer;
pub mod sampler;
pub mod transport;
pub mod utils;
pub mod video;

pub use error::{AppError, Result};
