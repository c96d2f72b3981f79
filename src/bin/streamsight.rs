//! streamsight - headless stream runner
//!
//! This binary:
//! 1. Loads configuration (TOML file, environment, then flags)
//! 2. Connects to the stream and keeps reconnecting on transport failures
//! 3. Feeds frames to the detection worker
//! 4. Logs ingest and detection counters once per second
//! 5. Stops cleanly on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use streamsight::ingest::init_media_framework;
use streamsight::{AppConfig, DetectError, DetectionEngine, IngestPipeline};

const FRAME_POLL: Duration = Duration::from_millis(100);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Live RTSP ingest with real-time object detection"
)]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "STREAMSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Stream URL (rtsp://, rtsps://, rtspt:// or stub://).
    #[arg(long)]
    url: Option<String>,

    /// Run ingest only.
    #[arg(long)]
    no_detect: bool,

    /// Run detection on every Nth frame.
    #[arg(long)]
    skip_factor: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = AppConfig::load_from(args.config.as_deref())?;
    if let Some(url) = args.url {
        cfg.stream.url = url;
    }
    if args.no_detect {
        cfg.detector.enabled = false;
    }
    if let Some(skip) = args.skip_factor {
        cfg.detector.skip_factor = skip;
    }
    cfg.validate()?;

    init_media_framework(cfg.stream.plugin_dir.as_deref());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("error setting Ctrl-C handler")?;
    }

    let engine = DetectionEngine::from_settings(&cfg.detector);
    let results = engine.results();

    let mut pipeline = IngestPipeline::new(cfg.stream.ingest_settings());
    pipeline.set_endpoint(cfg.stream.endpoint()?);
    let frames = pipeline.subscribe_frames();
    let status = pipeline.subscribe_status();
    pipeline.start()?;
    log::info!("streamsight running: {}", cfg.stream.url);

    let mut last_report = Instant::now();
    let mut displayed = 0u64;
    let mut detections = 0usize;

    while !stop.load(Ordering::SeqCst) {
        for connected in status.try_iter() {
            log::info!("stream {}", if connected { "connected" } else { "disconnected" });
        }

        if let Ok(frame) = frames.recv_timeout(FRAME_POLL) {
            if engine.is_available() {
                match engine.submit_frame(frame) {
                    Ok(()) => {}
                    Err(DetectError::Unavailable(reason)) => {
                        log::warn!("detection stopped: {reason}");
                    }
                    Err(e) => log::warn!("frame not submitted: {e}"),
                }
            } else {
                displayed += 1;
            }
        }
        if let Some(results) = &results {
            while let Some(outcome) = results.try_recv() {
                displayed += 1;
                detections += outcome.detections.len();
            }
        }

        if !pipeline.is_running() {
            log::error!("ingest pipeline stopped in state {}", pipeline.state());
            break;
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            let stats = engine.stats();
            let params = pipeline
                .video_parameters()
                .map(|p| format!("{}x{}@{}", p.width, p.height, p.fps))
                .unwrap_or_else(|| "unknown".into());
            log::info!(
                "ingest fps={:.1} video={} connected={} | detect fps={:.1} time={:.3}s inferred={} passed={} dropped={} | displayed={} detections={}",
                pipeline.current_fps(),
                params,
                pipeline.is_connected(),
                engine.current_fps(),
                engine.last_processing().as_secs_f64(),
                stats.inferred(),
                stats.passed_through(),
                stats.dropped(),
                displayed,
                detections
            );
            last_report = Instant::now();
        }
    }

    log::info!("shutting down");
    pipeline.stop();
    drop(engine);
    Ok(())
}
