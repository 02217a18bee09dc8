use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frame_relay::capture::{CaptureManager, FrameSource, PatternConfig, PatternSource};
use frame_relay::config::{AppConfig, ConfigStore, SourceKind};
use frame_relay::events::{EventBus, SystemEvent};
use frame_relay::pipeline::FramePipeline;
use frame_relay::renderer::ResultRenderer;
use frame_relay::transport::HttpFrameProcessor;

/// Interval between stats log lines
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// frame-relay command line arguments
#[derive(Parser, Debug)]
#[command(name = "frame-relay")]
#[command(version, about = "Stream camera frames to a detection endpoint", long_about = None)]
struct CliArgs {
    /// Configuration file (created with defaults if missing)
    #[arg(short = 'c', long, value_name = "FILE", default_value = "frame-relay.json")]
    config: PathBuf,

    /// Detection endpoint base URL (overrides config)
    #[arg(short = 'e', long, value_name = "URL")]
    endpoint: Option<String>,

    /// Sampling interval in milliseconds (overrides config)
    #[arg(short = 'i', long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// JPEG quality 1-100 (overrides config)
    #[arg(short = 'q', long, value_name = "QUALITY")]
    quality: Option<u8>,

    /// Per-request timeout in milliseconds (overrides config)
    #[arg(long, value_name = "MS")]
    request_timeout_ms: Option<u64>,

    /// Capture source (overrides config)
    #[arg(short = 's', long, value_name = "SOURCE")]
    source: Option<SourceArg>,

    /// Video device path (overrides config)
    #[arg(short = 'd', long, value_name = "DEVICE")]
    device: Option<String>,

    /// Persist the command line overrides to the config file
    #[arg(long)]
    save_config: bool,

    /// Write every processed frame to this file
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// List video capture devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Pattern,
    V4l2,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Pattern => SourceKind::Pattern,
            SourceArg::V4l2 => SourceKind::V4l2,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    if args.list_devices {
        return list_devices();
    }

    tracing::info!("Starting frame-relay v{}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::load(&args.config).await?;
    tracing::info!("Config file: {}", config_store.path().display());

    // Apply CLI argument overrides (persisted only with --save-config)
    let mut config = (*config_store.get()).clone();
    if let Some(url) = args.endpoint {
        config.endpoint.url = url;
    }
    if let Some(interval) = args.interval_ms {
        config.sampler.interval_ms = interval;
    }
    if let Some(quality) = args.quality {
        config.sampler.jpeg_quality = quality;
    }
    if let Some(timeout) = args.request_timeout_ms {
        config.endpoint.request_timeout_ms = Some(timeout);
    }
    if let Some(source) = args.source {
        config.capture.source = source.into();
    }
    if let Some(device) = args.device {
        config.capture.device = device;
    }
    config.validate()?;
    if args.save_config {
        config_store.set(config.clone()).await?;
    }

    let events = Arc::new(EventBus::new());
    spawn_event_logger(&events);

    let source = build_source(&config)?;
    let capture = Arc::new(CaptureManager::new(source, config.capture.acquire_timeout()));

    let processor = Arc::new(HttpFrameProcessor::new(&config.http_config())?);
    tracing::info!("Detection endpoint: {}", processor.process_url());
    match processor.health().await {
        Ok(()) => tracing::info!("Detection endpoint is healthy"),
        Err(e) => tracing::warn!("Detection endpoint health check failed: {}", e),
    }

    let pipeline = Arc::new(FramePipeline::new(
        config.pipeline_config(),
        capture,
        processor,
    ));
    pipeline.set_event_bus(events.clone());

    if let Some(path) = args.snapshot {
        spawn_snapshot_writer(pipeline.renderer(), path);
    }

    pipeline.start().await?;

    let stats_pipeline = pipeline.clone();
    let stats_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let stats = stats_pipeline.stats();
            tracing::info!(
                "state={} sent={} processed={} skipped={} failed={} avg_rtt={:.0}ms fps={:.2}",
                stats_pipeline.state(),
                stats.sent,
                stats.processed,
                stats.skipped,
                stats.failed,
                stats.avg_round_trip_ms,
                stats.fps
            );
        }
    });

    let mut state_rx = pipeline.subscribe_state();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutdown signal received");
        }
        _ = state_rx.wait_for(|s| *s == frame_relay::pipeline::PipelineState::Error) => {
            tracing::error!(
                "Pipeline failed: {}",
                pipeline.last_error().unwrap_or_default()
            );
        }
    }

    stats_task.abort();
    pipeline.stop().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "frame_relay=error",
        LogLevel::Warn => "frame_relay=warn",
        LogLevel::Info => "frame_relay=info",
        LogLevel::Verbose => "frame_relay=debug,reqwest=info",
        LogLevel::Debug => "frame_relay=debug,reqwest=debug",
        LogLevel::Trace => "frame_relay=trace,reqwest=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

fn build_source(config: &AppConfig) -> anyhow::Result<Arc<dyn FrameSource>> {
    match config.capture.source {
        SourceKind::Pattern => Ok(Arc::new(PatternSource::new(PatternConfig {
            resolution: config.capture.resolution(),
            ..Default::default()
        }))),
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => {
            use frame_relay::capture::{V4l2Config, V4l2Source};

            Ok(Arc::new(V4l2Source::new(V4l2Config {
                device_path: PathBuf::from(&config.capture.device),
                resolution: config.capture.resolution(),
                format: config.capture.pixel_format()?,
                fps: config.capture.fps,
                warmup_frames: config.capture.warmup_frames,
                ..Default::default()
            })))
        }
        #[cfg(not(feature = "v4l2"))]
        SourceKind::V4l2 => {
            anyhow::bail!("v4l2 capture requires building with the `v4l2` feature")
        }
    }
}

#[cfg(feature = "v4l2")]
fn list_devices() -> anyhow::Result<()> {
    let devices = frame_relay::capture::list_devices();
    if devices.is_empty() {
        println!("No video capture devices found");
    }
    for device in devices {
        println!(
            "{}\t{}\t{}",
            device.index,
            device.path.display(),
            device.name.unwrap_or_default()
        );
    }
    Ok(())
}

#[cfg(not(feature = "v4l2"))]
fn list_devices() -> anyhow::Result<()> {
    anyhow::bail!("device listing requires building with the `v4l2` feature")
}

/// Log pipeline events at debug level, failures at warn
fn spawn_event_logger(events: &Arc<EventBus>) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SystemEvent::PipelineError { message }) => {
                    tracing::error!("Pipeline error: {}", message)
                }
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!("event {}", json),
                    Err(e) => tracing::debug!("event {} ({})", event.event_name(), e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Event logger lagged by {} events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Write each newly presented frame to `path`
fn spawn_snapshot_writer(renderer: Arc<ResultRenderer>, path: PathBuf) {
    let mut rx = renderer.subscribe();
    tracing::info!("Writing processed frames to {}", path.display());
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let frame = rx.borrow_and_update().clone();
            let Some(frame) = frame else {
                continue;
            };
            if let Err(e) = tokio::fs::write(&path, &frame.data).await {
                tracing::warn!("Failed to write snapshot {}: {}", path.display(), e);
            }
        }
    });
}
