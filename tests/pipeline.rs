//! End-to-end pipeline behaviour with scripted sources and processors.
//!
//! Every test runs on a paused clock, so cadence and latency are exact.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frame_relay::capture::{
    CaptureManager, CaptureStatus, CaptureStream, FrameSource, PatternConfig, PatternSource,
};
use frame_relay::error::{AppError, Result};
use frame_relay::events::{EventBus, SystemEvent};
use frame_relay::pipeline::{FramePipeline, PipelineConfig, PipelineState};
use frame_relay::sampler::SamplerConfig;
use frame_relay::transport::{FrameProcessor, TransportError};
use frame_relay::video::{PixelFormat, RawFrame, Resolution, SampledFrame};

const SMALL: Resolution = Resolution {
    width: 64,
    height: 48,
};

#[derive(Clone, Copy)]
enum Script {
    /// Answer every frame with its own bytes
    Echo,
    /// Answer the first frame, fail every later one
    FailAfterFirst,
    /// Panic inside the request
    Panic,
}

struct ScriptedProcessor {
    latency: Duration,
    script: Script,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProcessor {
    fn new(latency: Duration, script: Script) -> Arc<Self> {
        Arc::new(Self {
            latency,
            script,
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameProcessor for ScriptedProcessor {
    async fn process(&self, frame: SampledFrame) -> std::result::Result<Bytes, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.script {
            Script::Echo => Ok(frame.data),
            Script::FailAfterFirst if call == 1 => Ok(frame.data),
            Script::FailAfterFirst => Err(TransportError::Status {
                status: 500,
                message: "Model not loaded".to_string(),
            }),
            Script::Panic => panic!("detector crashed on frame #{}", frame.sequence),
        }
    }
}

/// Camera stand-in. The device stays busy until a stream's `close()` has
/// finished, it can be unplugged, and it can deliver truncated frames.
#[derive(Clone, Default)]
struct FakeCamera {
    held: Arc<AtomicBool>,
    lost: Arc<Mutex<Option<String>>>,
    truncated: Arc<AtomicBool>,
    close_delay: Duration,
}

impl FakeCamera {
    fn with_close_delay(close_delay: Duration) -> Self {
        Self {
            close_delay,
            ..Default::default()
        }
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn manager(&self) -> Arc<CaptureManager> {
        Arc::new(CaptureManager::new(
            Arc::new(self.clone()),
            Duration::from_secs(1),
        ))
    }
}

struct FakeCameraStream {
    camera: FakeCamera,
    open: bool,
}

#[async_trait]
impl FrameSource for FakeCamera {
    fn name(&self) -> String {
        "fake-camera".to_string()
    }

    async fn open(&self) -> Result<Box<dyn CaptureStream>> {
        if self.held.swap(true, Ordering::SeqCst) {
            return Err(AppError::Acquisition("device busy".to_string()));
        }
        Ok(Box::new(FakeCameraStream {
            camera: self.clone(),
            open: true,
        }))
    }
}

#[async_trait]
impl CaptureStream for FakeCameraStream {
    fn resolution(&self) -> Resolution {
        SMALL
    }

    fn current_frame(&self) -> Option<RawFrame> {
        let stride = SMALL.width * 3;
        let mut len = (stride * SMALL.height) as usize;
        if self.camera.truncated.load(Ordering::SeqCst) {
            len /= 2;
        }
        Some(RawFrame::from_vec(vec![128; len], SMALL, PixelFormat::Rgb24, stride))
    }

    fn failure(&self) -> Option<String> {
        self.camera.lost.lock().unwrap().clone()
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        tokio::time::sleep(self.camera.close_delay).await;
        self.camera.held.store(false, Ordering::SeqCst);
    }
}

fn config(interval_ms: u64) -> PipelineConfig {
    PipelineConfig {
        sampler: SamplerConfig {
            interval: Duration::from_millis(interval_ms),
            jpeg_quality: 75,
        },
        request_timeout: None,
    }
}

fn pattern_capture(pattern: PatternConfig) -> Arc<CaptureManager> {
    Arc::new(CaptureManager::new(
        Arc::new(PatternSource::new(PatternConfig {
            resolution: SMALL,
            ..pattern
        })),
        Duration::from_secs(5),
    ))
}

fn pipeline(
    config: PipelineConfig,
    processor: Arc<ScriptedProcessor>,
) -> Arc<FramePipeline> {
    Arc::new(FramePipeline::new(
        config,
        pattern_capture(PatternConfig::default()),
        processor,
    ))
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn slow_endpoint_drops_ticks_instead_of_queueing() {
    // 250ms cadence, 600ms round trip, 10 ticks (t = 0..2250ms)
    let processor = ScriptedProcessor::new(Duration::from_millis(600), Script::Echo);
    let pipeline = pipeline(config(250), processor.clone());

    pipeline.start().await.unwrap();
    sleep_ms(2300).await;

    let stats = pipeline.stats();
    assert_eq!(stats.ticks, 10);
    assert!(stats.sent <= 5, "sent {} > ceil(2500/600)", stats.sent);
    assert_eq!(stats.sent, 4);
    assert_eq!(stats.skipped, stats.ticks - stats.sent);
    assert_eq!(stats.processed, 3);
    assert_eq!(processor.max_in_flight(), 1);

    pipeline.stop().await.unwrap();
    assert_eq!(processor.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn never_more_than_one_request_in_flight() {
    for (interval, latency) in [(100, 30), (100, 250), (50, 500), (40, 1000)] {
        let processor = ScriptedProcessor::new(Duration::from_millis(latency), Script::Echo);
        let pipeline = pipeline(config(interval), processor.clone());

        pipeline.start().await.unwrap();
        sleep_ms(3010).await;
        let stats = pipeline.stats();
        pipeline.stop().await.unwrap();

        assert_eq!(processor.max_in_flight(), 1, "interval {interval} latency {latency}");
        assert_eq!(stats.skipped, stats.ticks - stats.sent);
        assert_eq!(stats.sent, processor.calls());
    }
}

#[tokio::test(start_paused = true)]
async fn fast_endpoint_sends_every_tick() {
    let processor = ScriptedProcessor::new(Duration::from_millis(30), Script::Echo);
    let pipeline = pipeline(config(100), processor.clone());

    pipeline.start().await.unwrap();
    sleep_ms(950).await;

    let stats = pipeline.stats();
    assert_eq!(stats.ticks, 10);
    assert_eq!(stats.sent, 10);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.processed, 10);
    assert!((stats.avg_round_trip_ms - 30.0).abs() < 1e-6);

    let shown = pipeline.renderer().latest().unwrap();
    assert_eq!(shown.sequence, 10);
    assert!(shown.is_jpeg());

    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn acquisition_failure_never_samples() {
    let processor = ScriptedProcessor::new(Duration::ZERO, Script::Echo);
    let pipeline = Arc::new(FramePipeline::new(
        config(100),
        pattern_capture(PatternConfig {
            fail_with: Some("permission denied".to_string()),
            ..Default::default()
        }),
        processor.clone(),
    ));

    let err = pipeline.start().await.unwrap_err();
    assert!(matches!(err, AppError::Acquisition(_)));
    assert_eq!(pipeline.state(), PipelineState::Error);

    sleep_ms(1000).await;
    assert_eq!(pipeline.stats().sampled, 0);
    assert_eq!(processor.calls(), 0);
    assert!(!pipeline.renderer().has_content());
    assert_eq!(pipeline.capture().status(), CaptureStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_keeps_previous_frame() {
    let processor = ScriptedProcessor::new(Duration::ZERO, Script::FailAfterFirst);
    let pipeline = pipeline(config(100), processor.clone());

    pipeline.start().await.unwrap();
    sleep_ms(50).await;
    assert_eq!(pipeline.renderer().latest().unwrap().sequence, 1);

    sleep_ms(300).await;
    let stats = pipeline.stats();
    assert_eq!(stats.sent, 4);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 3);
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert_eq!(pipeline.renderer().latest().unwrap().sequence, 1);
    assert_eq!(pipeline.renderer().presented_count(), 1);

    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_request_before_release() {
    let processor = ScriptedProcessor::new(Duration::from_millis(600), Script::Echo);
    let pipeline = pipeline(config(250), processor.clone());

    pipeline.start().await.unwrap();
    sleep_ms(100).await;
    assert_eq!(processor.in_flight(), 1);

    let stopping = pipeline.clone();
    let stop = tokio::spawn(async move { stopping.stop().await });

    sleep_ms(200).await;
    assert_eq!(pipeline.state(), PipelineState::Stopping);
    assert_eq!(processor.in_flight(), 1);
    assert!(pipeline.capture().is_ready(), "released before the request resolved");

    let started = tokio::time::Instant::now();
    stop.await.unwrap().unwrap();
    assert_eq!(started.elapsed(), Duration::from_millis(300));

    assert_eq!(processor.in_flight(), 0);
    assert_eq!(processor.calls(), 1);
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.capture().status(), CaptureStatus::Unacquired);
    assert!(!pipeline.renderer().has_content());
    assert_eq!(pipeline.stats().processed, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_then_start_observes_idle() {
    let processor = ScriptedProcessor::new(Duration::from_millis(10), Script::Echo);
    let pipeline = pipeline(config(100), processor.clone());

    pipeline.start().await.unwrap();
    sleep_ms(150).await;

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Idle);

    let mut states = pipeline.subscribe_state();
    pipeline.start().await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), PipelineState::Running);
    assert_eq!(pipeline.stats().sent, 0);

    sleep_ms(50).await;
    assert_eq!(pipeline.renderer().latest().unwrap().sequence, 3);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn device_loss_moves_to_error() {
    let camera = FakeCamera::default();
    let processor = ScriptedProcessor::new(Duration::from_millis(10), Script::Echo);
    let pipeline = Arc::new(FramePipeline::new(config(100), camera.manager(), processor));

    let bus = Arc::new(EventBus::new());
    let mut events = bus.subscribe();
    pipeline.set_event_bus(bus);

    pipeline.start().await.unwrap();
    sleep_ms(150).await;
    assert!(pipeline.renderer().has_content());

    *camera.lost.lock().unwrap() = Some("device disconnected".to_string());
    sleep_ms(100).await;

    assert_eq!(pipeline.state(), PipelineState::Error);
    assert_eq!(pipeline.last_error().as_deref(), Some("device disconnected"));
    assert!(!camera.is_held());
    assert!(!pipeline.renderer().has_content());

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if let SystemEvent::PipelineError { message } = event {
            assert_eq!(message, "device disconnected");
            saw_error = true;
        }
    }
    assert!(saw_error);

    // Error ends the session; a new start recovers
    *camera.lost.lock().unwrap() = None;
    pipeline.start().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert!(camera.is_held());
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_returns_after_device_is_closed() {
    // Closing the device takes longer than a sampling interval
    let camera = FakeCamera::with_close_delay(Duration::from_millis(400));
    let processor = ScriptedProcessor::new(Duration::from_millis(10), Script::Echo);
    let pipeline = Arc::new(FramePipeline::new(config(100), camera.manager(), processor));

    pipeline.start().await.unwrap();
    sleep_ms(150).await;
    assert!(camera.is_held());

    let started = tokio::time::Instant::now();
    pipeline.stop().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_millis(400));
    assert!(!camera.is_held());

    // An immediate restart finds the device free
    pipeline.start().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);
    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn encode_failure_skips_frame_and_keeps_running() {
    let camera = FakeCamera::default();
    camera.truncated.store(true, Ordering::SeqCst);
    let processor = ScriptedProcessor::new(Duration::from_millis(10), Script::Echo);
    let pipeline = Arc::new(FramePipeline::new(
        config(100),
        camera.manager(),
        processor.clone(),
    ));

    // ticks at 0, 100, 200, 300 all carry short buffers
    pipeline.start().await.unwrap();
    sleep_ms(350).await;

    let stats = pipeline.stats();
    assert_eq!(stats.ticks, 4);
    assert_eq!(stats.sampled, 4);
    assert_eq!(stats.encode_failures, 4);
    assert_eq!(stats.sent, 0);
    assert_eq!(stats.skipped, 0);
    assert_eq!(processor.calls(), 0);
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert!(!pipeline.renderer().has_content());

    // The dispatch slot was handed back, so the next good frame goes out
    camera.truncated.store(false, Ordering::SeqCst);
    sleep_ms(100).await;

    let stats = pipeline.stats();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.processed, 1);
    assert_eq!(pipeline.renderer().latest().unwrap().sequence, 1);

    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn crashed_session_moves_to_error_and_releases_capture() {
    let camera = FakeCamera::default();
    let processor = ScriptedProcessor::new(Duration::from_millis(10), Script::Panic);
    let pipeline = Arc::new(FramePipeline::new(config(100), camera.manager(), processor));

    let mut states = pipeline.subscribe_state();
    pipeline.start().await.unwrap();
    states
        .wait_for(|s| *s == PipelineState::Error)
        .await
        .unwrap();

    assert_eq!(pipeline.last_error().as_deref(), Some("session task panicked"));
    assert_eq!(pipeline.capture().status(), CaptureStatus::Unacquired);
    assert!(!camera.is_held());
    assert!(!pipeline.renderer().has_content());

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn request_timeout_frees_dispatch() {
    let processor = ScriptedProcessor::new(Duration::from_secs(10), Script::Echo);
    let pipeline = Arc::new(FramePipeline::new(
        PipelineConfig {
            request_timeout: Some(Duration::from_secs(1)),
            ..config(300)
        },
        pattern_capture(PatternConfig::default()),
        processor.clone(),
    ));

    pipeline.start().await.unwrap();
    sleep_ms(1250).await;

    // ticks at 0, 300, 600, 900, 1200; the first request times out at 1000
    let stats = pipeline.stats();
    assert_eq!(stats.ticks, 5);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.skipped, 3);
    assert_eq!(pipeline.state(), PipelineState::Running);

    pipeline.stop().await.unwrap();
}
