//! End-to-end runs against the synthetic `stub://` graph.

use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use streamsight::config::{DetectorSettings, ModelFormat};
use streamsight::ingest::{IngestPipeline, IngestSettings, MediaCodec, PipelineState};
use streamsight::DetectionEngine;

fn quick() -> IngestSettings {
    IngestSettings {
        settle_delay: Duration::from_millis(5),
        param_interval: Duration::from_millis(10),
        param_attempts: 30,
        bus_poll: Duration::from_millis(50),
        reconnect_delay: Duration::from_millis(20),
        ..IngestSettings::default()
    }
}

fn pipeline(url: &str) -> IngestPipeline {
    let mut pipeline = IngestPipeline::new(quick());
    pipeline.set_url(url).expect("valid url");
    pipeline
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn frames_flow_and_parameters_latch() {
    let pipeline = pipeline("stub://cam/main?width=64&height=48&fps=50");
    let frames = pipeline.subscribe_frames();
    let status = pipeline.subscribe_status();
    pipeline.start().expect("start");

    let frame = frames
        .recv_timeout(Duration::from_secs(5))
        .expect("first frame");
    assert_eq!((frame.width(), frame.height()), (64, 48));
    assert_eq!(frame.pixels().len(), 64 * 48 * 3);

    assert!(wait_until(Duration::from_secs(5), || pipeline.parameters_ready()));
    let params = pipeline.video_parameters().expect("parameters");
    assert_eq!((params.width, params.height, params.fps), (64, 48, 50));
    assert!(wait_until(Duration::from_secs(5), || pipeline.is_connected()));
    assert_eq!(status.recv_timeout(Duration::from_secs(1)), Ok(true));

    let graph = pipeline.graph_snapshot().expect("live graph");
    let chain = graph.chain().expect("decode chain");
    assert_eq!(chain.codec, MediaCodec::H264);
    assert_eq!(graph.len(), 6);

    pipeline.stop();
    assert!(!pipeline.is_running());
    assert!(!pipeline.is_connected());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline.graph_snapshot().is_none());
}

#[test]
fn parameters_come_from_samples_when_caps_are_bare() {
    let pipeline = pipeline("stub://cam?encoding=H265&width=80&height=60&fps=40&caps=0");
    pipeline.start().expect("start");

    assert!(wait_until(Duration::from_secs(5), || pipeline.parameters_ready()));
    let params = pipeline.video_parameters().expect("parameters");
    assert_eq!((params.width, params.height), (80, 60));
    let chain = pipeline
        .graph_snapshot()
        .and_then(|g| g.chain())
        .expect("decode chain");
    assert_eq!(chain.codec, MediaCodec::H265);
    pipeline.stop();
}

#[test]
fn transport_error_reconnects() {
    // A long poll makes a driver that waits out the poll instead of reacting
    // to the error stand out.
    let bus_poll = Duration::from_secs(2);
    let mut pipeline = IngestPipeline::new(IngestSettings { bus_poll, ..quick() });
    pipeline.set_url("stub://cam?fps=50&error_after=5").expect("valid url");
    let frames = pipeline.subscribe_frames();
    pipeline.start().expect("start");

    frames
        .recv_timeout(Duration::from_secs(5))
        .expect("first frame");
    let first_frame = Instant::now();
    assert!(wait_until(Duration::from_secs(10), || pipeline.connect_attempts() >= 2));
    let waited = first_frame.elapsed();
    assert!(waited < bus_poll, "reconnect took {waited:?}");
    assert!(pipeline.is_running());

    pipeline.stop();
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn end_of_stream_reconnects() {
    let pipeline = pipeline("stub://cam?fps=50&eos_after=3");
    pipeline.start().expect("start");
    assert!(wait_until(Duration::from_secs(10), || pipeline.connect_attempts() >= 2));
    pipeline.stop();
}

#[test]
fn stop_is_idempotent_and_restartable() {
    let pipeline = pipeline("stub://cam?fps=50");
    pipeline.start().expect("start");
    assert!(wait_until(Duration::from_secs(5), || pipeline.is_connected()));

    pipeline.stop();
    pipeline.stop();
    assert!(!pipeline.is_running());

    pipeline.start().expect("restart");
    assert!(wait_until(Duration::from_secs(5), || pipeline.is_connected()));
    assert_eq!(pipeline.connect_attempts(), 1);
    pipeline.stop();
}

#[test]
fn audio_branch_adds_no_elements() {
    let pipeline = pipeline("stub://cam?fps=50&audio=1");
    pipeline.start().expect("start");
    assert!(wait_until(Duration::from_secs(5), || pipeline.parameters_ready()));
    let graph = pipeline.graph_snapshot().expect("live graph");
    // skeleton plus one video chain
    assert_eq!(graph.len(), 6);
    pipeline.stop();
}

#[test]
fn audio_only_stream_stays_at_skeleton() {
    let pipeline = pipeline("stub://cam?encoding=PCMU");
    pipeline.start().expect("start");
    assert!(wait_until(Duration::from_secs(5), || pipeline.is_connected()));

    let graph = pipeline.graph_snapshot().expect("live graph");
    assert_eq!(graph.len(), 3);
    assert!(graph.chain().is_none());
    assert!(!pipeline.parameters_ready());
    pipeline.stop();
}

#[test]
fn missing_decoder_disables_the_pipeline() {
    let pipeline = pipeline("stub://cam?fail_element=avdec_h264");
    let status = pipeline.subscribe_status();
    pipeline.start().expect("start");

    assert!(wait_until(Duration::from_secs(5), || !pipeline.is_running()));
    assert_eq!(pipeline.connect_attempts(), 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(!pipeline.is_connected());
    assert_eq!(status.recv_timeout(Duration::from_secs(1)), Ok(false));
    assert!(status.try_recv().is_err());
}

#[test]
fn restart_after_a_session_ended_on_its_own() {
    let pipeline = pipeline("stub://cam?fail_element=avdec_h264");
    pipeline.start().expect("start");
    assert!(wait_until(Duration::from_secs(5), || !pipeline.is_running()));

    // The finished driver is still held and gets joined here.
    pipeline.start().expect("restart");
    assert!(wait_until(Duration::from_secs(5), || !pipeline.is_running()));
    assert_eq!(pipeline.connect_attempts(), 1);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn stop_racing_start_is_never_lost() {
    let pipeline = pipeline("stub://cam?fps=50");
    for round in 0..100 {
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let _ = pipeline.start();
            });
            scope.spawn(|| {
                // Stop as soon as start has claimed the running flag.
                assert!(wait_until(Duration::from_secs(5), || pipeline.is_running()));
                pipeline.stop();
                assert!(!pipeline.is_running(), "session survived stop in round {round}");
            });
        });
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }
}

#[test]
fn warning_bounces_in_place() {
    let pipeline = pipeline("stub://cam?fps=50&warn_after=3");
    let frames = pipeline.subscribe_frames();
    pipeline.start().expect("start");

    // Well past the warning: frames keep coming on the first connection.
    let mut last = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while last < 10 && Instant::now() < deadline {
        if let Ok(frame) = frames.recv_timeout(Duration::from_millis(200)) {
            last = frame.sequence();
        }
    }
    assert!(last >= 10, "frames stalled at {last}");
    assert_eq!(pipeline.connect_attempts(), 1);
    pipeline.stop();
}

#[test]
fn failed_bounce_escalates_to_reconnect() {
    let pipeline = pipeline("stub://cam?fps=50&warn_after=3&bounce_fails=1");
    pipeline.start().expect("start");
    assert!(wait_until(Duration::from_secs(10), || pipeline.connect_attempts() >= 2));
    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn stub_engine_follows_the_skip_factor() {
    let mut names = NamedTempFile::new().expect("class list");
    std::io::Write::write_all(&mut names, b"person\ncar\n").expect("write class list");
    let settings = DetectorSettings {
        format: ModelFormat::Stub,
        class_names: names.path().to_path_buf(),
        input_size: 32,
        skip_factor: 2,
        ..DetectorSettings::default()
    };
    let mut engine = DetectionEngine::from_settings(&settings);
    assert!(engine.is_available());
    let results = engine.results().expect("results");

    let pipeline = pipeline("stub://cam?width=64&height=48&fps=50");
    let frames = pipeline.subscribe_frames();
    pipeline.start().expect("start");

    let mut seen = 0;
    let deadline = Instant::now() + Duration::from_secs(10);
    while seen < 10 && Instant::now() < deadline {
        if let Ok(frame) = frames.recv_timeout(Duration::from_millis(200)) {
            engine.submit_frame(frame).expect("submit");
            if let Ok(outcome) = results.recv_timeout(Duration::from_secs(2)) {
                assert_eq!(outcome.frame.width(), 64);
                seen += 1;
            }
        }
    }
    pipeline.stop();
    engine.shutdown();

    assert!(seen >= 10);
    let stats = engine.stats();
    assert!(stats.inferred() >= 1);
    assert_eq!(stats.dropped(), 0);
    let skipped = stats.passed_through() - stats.inferred();
    assert!(skipped <= 1, "passed {} inferred {}", stats.passed_through(), stats.inferred());
}
