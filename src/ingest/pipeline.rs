//! Pipeline lifecycle: connect, negotiate, pump the bus, tear down, reconnect.
//!
//! One driving thread per running pipeline owns the graph. Other threads only
//! flip atomic flags and, on stop, force the graph to Null through a
//! [`GraphControl`] handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::frame::Frame;
use crate::perf::PerfReadout;
use crate::slot::SlotReceiver;

use super::bus::{BusAction, BusEvent, RecoveryPolicy};
use super::endpoint::StreamEndpoint;
use super::extract::FrameSubscribers;
use super::graph::{GraphSpec, PipelineState};
use super::params::{VideoParameters, VideoParams};
use super::rtsp::{GraphControl, RtspGraph};
use super::session::Session;
use super::IngestError;

pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_PARAM_ATTEMPTS: u32 = 50;
pub const DEFAULT_PARAM_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_BUS_POLL: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Timing and recovery knobs for the driving thread.
#[derive(Clone, Debug)]
pub struct IngestSettings {
    /// Bound on each state transition.
    pub state_timeout: Duration,
    /// Pause between Null, Ready and Playing.
    pub settle_delay: Duration,
    /// Video parameter discovery: attempts × interval.
    pub param_attempts: u32,
    pub param_interval: Duration,
    pub bus_poll: Duration,
    pub reconnect_delay: Duration,
    /// Allow one in-place Null → Playing bounce per run on warnings.
    pub soft_recovery: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            state_timeout: DEFAULT_STATE_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            param_attempts: DEFAULT_PARAM_ATTEMPTS,
            param_interval: DEFAULT_PARAM_INTERVAL,
            bus_poll: DEFAULT_BUS_POLL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            soft_recovery: true,
        }
    }
}

struct Shared {
    running: AtomicBool,
    // Internal unwind request (error/EOS) or user stop.
    stop: AtomicBool,
    stop_user: AtomicBool,
    params_ready: AtomicBool,
    connected: AtomicBool,
    connect_attempts: AtomicU64,
    state: Mutex<PipelineState>,
    params: Mutex<Arc<VideoParameters>>,
    live: Mutex<Option<Arc<Session>>>,
    control: Mutex<Option<GraphControl>>,
    frames: FrameSubscribers,
    status: Mutex<Vec<Sender<bool>>>,
    ingest_perf: PerfReadout,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            stop_user: AtomicBool::new(false),
            params_ready: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
            state: Mutex::new(PipelineState::Null),
            params: Mutex::new(Arc::new(VideoParameters::new())),
            live: Mutex::new(None),
            control: Mutex::new(None),
            frames: FrameSubscribers::default(),
            status: Mutex::new(Vec::new()),
            ingest_perf: PerfReadout::default(),
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.stop_user.load(Ordering::Acquire)
    }

    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::AcqRel) == connected {
            return;
        }
        self.broadcast(connected);
    }

    fn broadcast(&self, connected: bool) {
        self.status
            .lock()
            .retain(|tx| tx.send(connected).is_ok());
    }
}

pub struct IngestPipeline {
    settings: IngestSettings,
    endpoint: Option<StreamEndpoint>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IngestPipeline {
    pub fn new(settings: IngestSettings) -> Self {
        Self {
            settings,
            endpoint: None,
            shared: Arc::new(Shared::new()),
            worker: Mutex::new(None),
        }
    }

    /// Parse and store the endpoint used by the next `start()`.
    pub fn set_url(&mut self, url: &str) -> Result<(), IngestError> {
        self.set_endpoint(StreamEndpoint::parse(url)?);
        Ok(())
    }

    /// A running session keeps the endpoint it started with.
    pub fn set_endpoint(&mut self, endpoint: StreamEndpoint) {
        self.endpoint = Some(endpoint);
    }

    pub fn endpoint(&self) -> Option<&StreamEndpoint> {
        self.endpoint.as_ref()
    }

    /// Spawn the driving thread. Errors if a session is already running.
    ///
    /// Holds the worker lock from the running check until the handle is
    /// stored, so a concurrent `stop()` sees either no session or a joinable one.
    pub fn start(&self) -> Result<(), IngestError> {
        let endpoint = self.endpoint.clone().ok_or(IngestError::NoEndpoint)?;
        let mut worker = self.worker.lock();
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(IngestError::AlreadyRunning);
        }

        // A previous session that ended on its own leaves a finished handle.
        if let Some(stale) = worker.take() {
            if stale.join().is_err() {
                log::error!("previous ingest thread panicked");
            }
        }

        self.shared.stop.store(false, Ordering::Release);
        self.shared.stop_user.store(false, Ordering::Release);
        self.shared.params_ready.store(false, Ordering::Release);
        self.shared.connect_attempts.store(0, Ordering::Release);
        *self.shared.params.lock() = Arc::new(VideoParameters::new());
        *self.shared.state.lock() = PipelineState::Null;

        let driver = Driver {
            tag: endpoint.display_name(),
            endpoint,
            settings: self.settings.clone(),
            shared: Arc::clone(&self.shared),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("ingest-{}", driver.tag))
            .spawn(move || driver.run());
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(IngestError::Spawn(e))
            }
        }
    }

    /// Stop the session and wait for the graph to be released.
    ///
    /// Idempotent. Safe from any thread, including concurrently with
    /// `start()`; when called from the driving thread itself the join is
    /// skipped.
    pub fn stop(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            self.shared.stop_user.store(true, Ordering::Release);
            self.shared.stop.store(true, Ordering::Release);
            let control = self.shared.control.lock().clone();
            if let Some(control) = control {
                control.force_null();
            }
            worker.take()
        };

        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("ingest thread panicked");
                self.shared.running.store(false, Ordering::Release);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn parameters_ready(&self) -> bool {
        self.shared.params_ready.load(Ordering::Acquire)
    }

    pub fn video_parameters(&self) -> Option<VideoParams> {
        self.shared.params.lock().snapshot()
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.lock()
    }

    /// Connection attempts in the current session.
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::Acquire)
    }

    /// Model of the live graph; `None` once elements are released.
    pub fn graph_snapshot(&self) -> Option<GraphSpec> {
        self.shared.live.lock().as_ref().map(|session| session.graph())
    }

    /// Decoded frames, latest-wins.
    pub fn subscribe_frames(&self) -> SlotReceiver<Arc<Frame>> {
        self.shared.frames.subscribe()
    }

    /// Connection status changes.
    pub fn subscribe_status(&self) -> Receiver<bool> {
        let (tx, rx) = unbounded();
        self.shared.status.lock().push(tx);
        rx
    }

    pub fn current_fps(&self) -> f32 {
        self.shared.ingest_perf.fps()
    }
}

impl Drop for IngestPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Driver {
    tag: String,
    endpoint: StreamEndpoint,
    settings: IngestSettings,
    shared: Arc<Shared>,
}

impl Driver {
    fn run(self) {
        loop {
            if self.shared.stop_user.load(Ordering::Acquire) {
                break;
            }
            self.shared.stop.store(false, Ordering::Release);
            let attempt = self.shared.connect_attempts.fetch_add(1, Ordering::AcqRel) + 1;
            log::info!("[{}] connecting (attempt {attempt})", self.tag);

            match self.run_once() {
                Ok(()) => {}
                Err(e) if e.is_construction() => {
                    log::error!("[{}] pipeline disabled: {e}", self.tag);
                    // Final `false` even when no session ever connected.
                    self.shared.connected.store(false, Ordering::Release);
                    self.shared.broadcast(false);
                    break;
                }
                Err(e) => log::warn!("[{}] run ended: {e}", self.tag),
            }

            if self.shared.stop_user.load(Ordering::Acquire) {
                break;
            }
            log::info!(
                "[{}] reconnecting in {:?}",
                self.tag,
                self.settings.reconnect_delay
            );
            self.sleep_unless_stopped(self.settings.reconnect_delay);
        }

        *self.shared.state.lock() = PipelineState::Stopped;
        self.shared.set_connected(false);
        self.shared.running.store(false, Ordering::Release);
        log::info!("[{}] pipeline stopped", self.tag);
    }

    fn run_once(&self) -> Result<(), IngestError> {
        let params = Arc::clone(&*self.shared.params.lock());
        let session = Arc::new(Session::new(
            self.tag.clone(),
            params,
            self.shared.frames.clone(),
            self.shared.ingest_perf.clone(),
        ));
        let graph = RtspGraph::build(&self.endpoint, Arc::clone(&session))?;
        *self.shared.live.lock() = Some(Arc::clone(&session));
        *self.shared.control.lock() = Some(graph.control());

        let result = self
            .start_graph(&graph, &session)
            .and_then(|()| self.pump(&graph));
        self.teardown(graph);
        result
    }

    fn start_graph(&self, graph: &RtspGraph, session: &Session) -> Result<(), IngestError> {
        for target in [PipelineState::Null, PipelineState::Ready] {
            self.transition(graph, target)?;
            std::thread::sleep(self.settings.settle_delay);
            if self.shared.stopping() {
                return Ok(());
            }
        }
        self.transition(graph, PipelineState::Playing)?;

        let params = session.params();
        for _ in 0..self.settings.param_attempts {
            if params.is_detected() || self.shared.stopping() {
                break;
            }
            std::thread::sleep(self.settings.param_interval);
        }
        match params.snapshot() {
            Some(p) => {
                self.shared.params_ready.store(true, Ordering::Release);
                log::info!("[{}] video {}x{} @ {} fps", self.tag, p.width, p.height, p.fps);
            }
            None => {
                if let Some(factory) = session.abandoned_by() {
                    return Err(IngestError::ElementMissing { factory });
                }
                log::warn!("[{}] proceeding without video parameters", self.tag);
            }
        }
        if let Some(caps) = graph.negotiated_caps() {
            log::info!("[{}] negotiated {caps}", self.tag);
        }
        self.shared.set_connected(true);
        Ok(())
    }

    fn pump(&self, graph: &RtspGraph) -> Result<(), IngestError> {
        let mut policy = RecoveryPolicy::new(self.settings.soft_recovery);
        while !self.shared.stopping() {
            if policy.take_escalation() {
                log::warn!("[{}] soft recovery failed, reconnecting", self.tag);
                break;
            }
            let Some(event) = graph.next_event(self.settings.bus_poll) else {
                continue;
            };
            match policy.decide(&event) {
                BusAction::Continue => {
                    if let BusEvent::StateChanged {
                        new,
                        top_level: true,
                        ..
                    } = event
                    {
                        *self.shared.state.lock() = new;
                    }
                }
                BusAction::Unwind => self.shared.stop.store(true, Ordering::Release),
                BusAction::Bounce => {
                    log::info!("[{}] bouncing pipeline through NULL", self.tag);
                    if let Err(e) = graph.bounce(self.settings.state_timeout) {
                        log::warn!("[{}] bounce failed: {e}", self.tag);
                        policy.bounce_failed();
                    }
                }
            }
        }
        Ok(())
    }

    fn transition(&self, graph: &RtspGraph, target: PipelineState) -> Result<(), IngestError> {
        graph.set_state(target, self.settings.state_timeout)?;
        *self.shared.state.lock() = target;
        Ok(())
    }

    fn teardown(&self, graph: RtspGraph) {
        *self.shared.control.lock() = None;
        if let Err(e) = graph.set_state(PipelineState::Null, self.settings.state_timeout) {
            log::warn!("[{}] teardown: {e}", self.tag);
        }
        drop(graph);
        *self.shared.live.lock() = None;
        *self.shared.state.lock() = PipelineState::Null;
        self.shared.set_connected(false);
    }

    fn sleep_unless_stopped(&self, total: Duration) {
        let deadline = Instant::now() + total;
        let slice = Duration::from_millis(20);
        while !self.shared.stop_user.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(slice.min(deadline - now));
        }
    }
}
