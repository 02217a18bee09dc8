//! V4L2 camera source
//!
//! Opens a V4L2 device with memory-mapped buffers and runs a blocking capture
//! loop that keeps only the newest frame. The sampler pulls that frame on its
//! own cadence; nothing is queued.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream as _;
use v4l::prelude::MmapStream;
use v4l::video::Capture;

use super::source::{CaptureStream, FrameSource};
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;
use crate::video::{PixelFormat, RawFrame, Resolution};

/// Number of mmap capture buffers
const BUFFER_COUNT: u32 = 2;
/// Minimum valid frame size (bytes)
const MIN_FRAME_SIZE: usize = 128;
/// Poll timeout for a single dequeue
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// V4L2 source configuration
#[derive(Debug, Clone)]
pub struct V4l2Config {
    /// Device path
    pub device_path: PathBuf,
    /// Desired resolution (the driver may pick another)
    pub resolution: Resolution,
    /// Desired pixel format
    pub format: PixelFormat,
    /// Desired frame rate (0 = driver default)
    pub fps: u32,
    /// Frames discarded after stream-on before the source reports ready
    pub warmup_frames: u32,
    /// How long to wait for the first usable frame
    pub first_frame_timeout: Duration,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/video0"),
            resolution: Resolution::VGA,
            format: PixelFormat::Mjpeg,
            fps: 30,
            warmup_frames: 5,
            first_frame_timeout: Duration::from_secs(3),
        }
    }
}

/// State shared between the capture thread and the stream handle
#[derive(Default)]
struct Shared {
    latest: Mutex<Option<RawFrame>>,
    failure: Mutex<Option<String>>,
    stop: AtomicBool,
}

/// Sets the stop flag when dropped unless disarmed
struct StopGuard(Option<Arc<Shared>>);

impl StopGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.0.take() {
            shared.stop.store(true, Ordering::SeqCst);
        }
    }
}

/// V4L2 camera source
pub struct V4l2Source {
    config: V4l2Config,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl FrameSource for V4l2Source {
    fn name(&self) -> String {
        self.config.device_path.display().to_string()
    }

    async fn open(&self) -> Result<Box<dyn CaptureStream>> {
        let shared = Arc::new(Shared::default());
        let (ready_tx, ready_rx) = oneshot::channel();
        let guard = StopGuard(Some(shared.clone()));

        let config = self.config.clone();
        let thread_shared = shared.clone();
        let capture = tokio::task::spawn_blocking(move || capture_loop(config, thread_shared, ready_tx));

        let startup = match tokio::time::timeout(self.config.first_frame_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AppError::Acquisition(format!(
                "capture thread for {} exited during startup",
                self.name()
            ))),
            Err(_) => Err(AppError::Playback(format!(
                "{} opened but produced no frame within {}ms",
                self.name(),
                self.config.first_frame_timeout.as_millis()
            ))),
        };

        let resolution = match startup {
            Ok(resolution) => resolution,
            Err(e) => {
                // The device must be closed before the failure is reported
                shared.stop.store(true, Ordering::SeqCst);
                let _ = capture.await;
                return Err(e);
            }
        };

        guard.disarm();
        Ok(Box::new(V4l2Stream {
            name: self.name(),
            shared,
            resolution,
            capture: Some(capture),
        }))
    }
}

struct V4l2Stream {
    name: String,
    shared: Arc<Shared>,
    resolution: Resolution,
    /// Capture thread; it owns the device fd and the mmap buffers
    capture: Option<JoinHandle<()>>,
}

#[async_trait]
impl CaptureStream for V4l2Stream {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn current_frame(&self) -> Option<RawFrame> {
        self.shared.latest.lock().clone()
    }

    fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    async fn close(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.latest.lock().take();

        // The thread notices the stop flag within one dequeue timeout
        if let Some(capture) = self.capture.take() {
            if let Err(e) = capture.await {
                warn!("Capture thread for {} ended abnormally: {}", self.name, e);
            }
            debug!("Capture thread for {} joined", self.name);
        }
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

/// Blocking capture loop. Reports readiness (or the open error) through
/// `ready_tx` exactly once.
fn capture_loop(config: V4l2Config, shared: Arc<Shared>, ready_tx: oneshot::Sender<Result<Resolution>>) {
    let mut ready_tx = Some(ready_tx);
    let result = run_capture(&config, &shared, &mut ready_tx);

    if let Err(e) = result {
        match ready_tx.take() {
            Some(tx) => {
                let _ = tx.send(Err(e));
            }
            None => {
                error!("Capture error on {:?}: {}", config.device_path, e);
                *shared.failure.lock() = Some(e.to_string());
            }
        }
    }
    shared.latest.lock().take();
    info!("Capture stopped on {:?}", config.device_path);
}

fn run_capture(
    config: &V4l2Config,
    shared: &Shared,
    ready_tx: &mut Option<oneshot::Sender<Result<Resolution>>>,
) -> Result<()> {
    let device = v4l::Device::with_path(&config.device_path).map_err(|e| {
        AppError::Acquisition(format!("Failed to open device {:?}: {}", config.device_path, e))
    })?;

    let mut format = device
        .format()
        .map_err(|e| AppError::Acquisition(format!("Failed to read format: {}", e)))?;
    format.width = config.resolution.width;
    format.height = config.resolution.height;
    format.fourcc = config.format.to_fourcc();

    let format = match device.set_format(&format) {
        Ok(format) => format,
        Err(e) => {
            warn!("Failed to set format on {:?}: {}", config.device_path, e);
            device
                .format()
                .map_err(|e| AppError::Acquisition(format!("Failed to read format: {}", e)))?
        }
    };

    let pixel_format = PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| {
        AppError::Acquisition(format!("Unsupported pixel format {}", format.fourcc))
    })?;
    let resolution = Resolution::new(format.width, format.height);
    let stride = if pixel_format.is_compressed() { 0 } else { format.stride };

    if config.fps > 0 {
        let params = v4l::video::capture::Parameters::with_fps(config.fps);
        if let Err(e) = device.set_params(&params) {
            warn!("Failed to set fps on {:?}: {}", config.device_path, e);
        }
    }

    let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
        .map_err(|e| AppError::Acquisition(format!("Failed to create buffer stream: {}", e)))?;
    stream.set_timeout(DEQUEUE_TIMEOUT);

    info!(
        "Capture format: {} {} stride={} on {:?}",
        resolution, pixel_format, stride, config.device_path
    );

    let error_throttler = LogThrottler::with_secs(5);
    let mut warmup_left = config.warmup_frames;

    while !shared.stop.load(Ordering::Relaxed) {
        let (buf, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                crate::warn_throttled!(error_throttler, "capture_timeout", "Capture timeout - no signal?");
                continue;
            }
            Err(e) if is_device_lost(&e) => {
                return Err(AppError::Acquisition(format!(
                    "device {:?} lost: {}",
                    config.device_path, e
                )));
            }
            Err(e) => {
                crate::error_throttled!(error_throttler, "capture_error", "Capture error: {}", e);
                continue;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        if used < MIN_FRAME_SIZE {
            debug!("Dropping small frame: {} bytes", used);
            continue;
        }

        if warmup_left > 0 {
            warmup_left -= 1;
            continue;
        }

        let frame = RawFrame::new(Bytes::copy_from_slice(&buf[..used]), resolution, pixel_format, stride);
        *shared.latest.lock() = Some(frame);

        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Ok(resolution));
        }
    }

    Ok(())
}

fn is_device_lost(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(6)       // ENXIO
            | Some(19)  // ENODEV
            | Some(5)   // EIO
            | Some(32)  // EPIPE
            | Some(108) // ESHUTDOWN
    )
}

/// A capture node found under /dev
#[derive(Debug, Clone, Serialize)]
pub struct VideoDeviceInfo {
    pub index: usize,
    pub path: PathBuf,
    pub name: Option<String>,
}

/// Enumerate V4L2 device nodes
pub fn list_devices() -> Vec<VideoDeviceInfo> {
    v4l::context::enum_devices()
        .into_iter()
        .map(|node| VideoDeviceInfo {
            index: node.index(),
            path: node.path().to_path_buf(),
            name: node.name(),
        })
        .collect()
}
