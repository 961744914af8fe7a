//! Capture sessions
//!
//! A session owns the frame sources for one display layout and a background
//! thread that reads, composes and presents frames until cancelled:
//! `Starting -> Running -> Stopping -> Stopped`.
//!
//! Each camera occupies a slot. A slot whose camera failed to open, or stopped
//! delivering frames, renders black and retries the open on its own without
//! disturbing the other slot.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camera_capture::{CameraError, CameraKey, FrameSource, SourceFactory, VideoFrame};
use compositor::Compositor;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::mode::SessionLayout;
use crate::sink::DisplaySink;
use crate::SessionError;

/// Capture loop tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Budget for a single frame read
    pub read_timeout_ms: u64,
    /// Consecutive failed reads before a camera is reopened
    pub failure_threshold: u32,
    /// Delay between open attempts for a camera that is not available
    pub reopen_interval_ms: u64,
    /// How long a mode switch waits for the previous session to stop
    pub join_timeout_ms: u64,
    /// Upper bound on presented frames per second
    pub target_fps: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 100,
            failure_threshold: 15,
            reopen_interval_ms: 2000,
            join_timeout_ms: 2000,
            target_fps: 30,
        }
    }
}

impl SessionSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reopen_interval(&self) -> Duration {
        Duration::from_millis(self.reopen_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.target_fps.max(1)
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Starting,
            1 => SessionState::Running,
            2 => SessionState::Stopping,
            _ => SessionState::Stopped,
        }
    }
}

/// Outcome of a bounded stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Loop exited and released its sources
    Stopped,
    /// Loop did not confirm in time and was detached
    TimedOut,
}

/// Cooperative cancellation flag checked once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a session needs besides its layout
#[derive(Clone)]
pub struct SessionContext {
    pub factory: Arc<dyn SourceFactory>,
    pub sink: Arc<dyn DisplaySink>,
    pub compositor: Compositor,
    pub settings: SessionSettings,
}

/// Per-slot status readable while the loop runs
#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub camera: CameraKey,
    /// Whether a device handle is held (false = placeholder)
    pub open: bool,
    pub read_failures: u64,
    pub reopens: u64,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: u64,
    pub layout: SessionLayout,
    pub state: SessionState,
    pub frames_presented: u64,
    pub slots: Vec<SlotSnapshot>,
}

struct SlotStatus {
    key: CameraKey,
    open: AtomicBool,
    read_failures: AtomicU64,
    reopens: AtomicU64,
}

struct Shared {
    state: AtomicU8,
    frames: AtomicU64,
    slots: Vec<SlotStatus>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

enum Source {
    Live(Box<dyn FrameSource>),
    /// Camera unavailable; renders black
    Placeholder,
}

struct Slot {
    key: CameraKey,
    source: Source,
    last_good: Option<VideoFrame>,
    failures: u32,
    last_open_attempt: Instant,
}

impl Slot {
    fn open(key: CameraKey, factory: &dyn SourceFactory) -> Self {
        let source = match factory.open(key) {
            Ok(source) => Source::Live(source),
            Err(e) => {
                warn!(camera = %key, error = %e, "Camera unavailable, showing placeholder");
                counter!("dashboard_open_failures_total", "camera" => key.to_string()).increment(1);
                Source::Placeholder
            }
        };
        Self {
            key,
            source,
            last_good: None,
            failures: 0,
            last_open_attempt: Instant::now(),
        }
    }

    fn is_live(&self) -> bool {
        matches!(self.source, Source::Live(_))
    }

    /// Frame to compose for this slot: the latest good read, if any
    fn frame(&self) -> Option<&VideoFrame> {
        self.last_good.as_ref()
    }

    fn poll(&mut self, ctx: &SessionContext, status: &SlotStatus) {
        let read = match &mut self.source {
            Source::Live(source) => Some(source.read_frame(ctx.settings.read_timeout())),
            Source::Placeholder => None,
        };

        match read {
            Some(Ok(frame)) => {
                self.last_good = Some(frame);
                self.failures = 0;
            }
            Some(Err(e)) => self.read_failed(e, ctx, status),
            None => {
                if self.last_open_attempt.elapsed() >= ctx.settings.reopen_interval() {
                    self.reopen(ctx, status);
                }
            }
        }
        status.open.store(self.is_live(), Ordering::SeqCst);
    }

    fn read_failed(&mut self, error: CameraError, ctx: &SessionContext, status: &SlotStatus) {
        self.failures += 1;
        status.read_failures.fetch_add(1, Ordering::SeqCst);
        counter!("dashboard_read_failures_total", "camera" => self.key.to_string()).increment(1);
        debug!(camera = %self.key, failures = self.failures, error = %error, "Frame read failed");

        if self.failures >= ctx.settings.failure_threshold.max(1) {
            warn!(
                camera = %self.key,
                failures = self.failures,
                "Camera stopped delivering frames, reopening"
            );
            // A dead feed goes black rather than freezing on its last image
            self.last_good = None;
            self.release();
            self.reopen(ctx, status);
        }
    }

    fn reopen(&mut self, ctx: &SessionContext, status: &SlotStatus) {
        self.last_open_attempt = Instant::now();
        self.failures = 0;
        status.reopens.fetch_add(1, Ordering::SeqCst);
        counter!("dashboard_source_reopens_total", "camera" => self.key.to_string()).increment(1);

        match ctx.factory.open(self.key) {
            Ok(source) => {
                info!(camera = %self.key, "Camera reopened");
                self.source = Source::Live(source);
            }
            Err(e) => debug!(camera = %self.key, error = %e, "Camera still unavailable"),
        }
    }

    fn release(&mut self) {
        if let Source::Live(source) = &mut self.source {
            source.release();
        }
        self.source = Source::Placeholder;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs on the capture thread; its drop marks the session stopped
struct ExitGuard {
    shared: Arc<Shared>,
    live: Arc<AtomicUsize>,
    done: mpsc::Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.set_state(SessionState::Stopped);
        let remaining = self.live.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        gauge!("dashboard_live_sessions").set(remaining as f64);
        let _ = self.done.send(());
    }
}

struct Worker {
    id: u64,
    layout: SessionLayout,
    slots: Vec<Slot>,
    ctx: SessionContext,
    cancel: CancelToken,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(mut self) {
        self.shared.set_state(SessionState::Running);
        let interval = self.ctx.settings.frame_interval();
        let mut sink_failing = false;

        while !self.cancel.is_cancelled() {
            let tick = Instant::now();

            for (slot, status) in self.slots.iter_mut().zip(&self.shared.slots) {
                slot.poll(&self.ctx, status);
            }
            // A read may have blocked across a cancel; skip the stale frame
            if self.cancel.is_cancelled() {
                break;
            }

            let composed = self.compose();
            match self.ctx.sink.present(&composed) {
                Ok(()) => {
                    sink_failing = false;
                    self.shared.frames.fetch_add(1, Ordering::SeqCst);
                    counter!("dashboard_frames_presented_total").increment(1);
                }
                Err(e) => {
                    counter!("dashboard_display_errors_total").increment(1);
                    if !sink_failing {
                        warn!(session = self.id, error = %e, "Display sink rejected frame");
                        sink_failing = true;
                    }
                }
            }

            if let Some(rest) = interval.checked_sub(tick.elapsed()) {
                thread::sleep(rest);
            }
        }

        self.shared.set_state(SessionState::Stopping);
        for slot in &mut self.slots {
            slot.release();
        }
        debug!(session = self.id, "Capture loop finished, sources released");
    }

    fn compose(&self) -> VideoFrame {
        let compositor = &self.ctx.compositor;
        let first = self.slots.first().and_then(Slot::frame);
        match self.layout {
            SessionLayout::Single(_) => compositor.compose_single(first),
            SessionLayout::Multiview(..) => {
                compositor.compose_multiview(first, self.slots.get(1).and_then(Slot::frame))
            }
        }
    }
}

/// A live capture session
pub struct Session {
    id: u64,
    layout: SessionLayout,
    cancel: CancelToken,
    shared: Arc<Shared>,
    done: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Session {
    /// Open the layout's cameras and start the capture thread
    ///
    /// Cameras that fail to open become placeholder slots; only a failure to
    /// spawn the thread is an error. `live` counts capture threads that have
    /// not yet exited.
    pub fn start(
        id: u64,
        layout: SessionLayout,
        ctx: &SessionContext,
        live: &Arc<AtomicUsize>,
    ) -> Result<Self, SessionError> {
        let started = Instant::now();
        let slots: Vec<Slot> = layout
            .keys()
            .into_iter()
            .map(|key| Slot::open(key, ctx.factory.as_ref()))
            .collect();
        let opened = slots.iter().filter(|s| s.is_live()).count();

        let shared = Arc::new(Shared {
            state: AtomicU8::new(SessionState::Starting as u8),
            frames: AtomicU64::new(0),
            slots: slots
                .iter()
                .map(|slot| SlotStatus {
                    key: slot.key,
                    open: AtomicBool::new(slot.is_live()),
                    read_failures: AtomicU64::new(0),
                    reopens: AtomicU64::new(0),
                })
                .collect(),
        });
        let cancel = CancelToken::new();
        let (done_tx, done_rx) = mpsc::channel();

        let count = live.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("dashboard_live_sessions").set(count as f64);
        let guard = ExitGuard {
            shared: Arc::clone(&shared),
            live: Arc::clone(live),
            done: done_tx,
        };
        let worker = Worker {
            id,
            layout,
            slots,
            ctx: ctx.clone(),
            cancel: cancel.clone(),
            shared: Arc::clone(&shared),
        };

        let handle = thread::Builder::new()
            .name(format!("session-{}", id))
            .spawn(move || {
                let _guard = guard;
                worker.run();
            })
            .map_err(SessionError::Spawn)?;

        info!(
            session = id,
            ?layout,
            opened,
            requested = shared.slots.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session started"
        );

        Ok(Self {
            id,
            layout,
            cancel,
            shared,
            done: done_rx,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn layout(&self) -> SessionLayout {
        self.layout
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Not cancelled and the loop has not exited
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && matches!(self.state(), SessionState::Starting | SessionState::Running)
    }

    /// Signal cancellation without waiting
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            layout: self.layout,
            state: self.state(),
            frames_presented: self.shared.frames.load(Ordering::SeqCst),
            slots: self
                .shared
                .slots
                .iter()
                .map(|status| SlotSnapshot {
                    camera: status.key,
                    open: status.open.load(Ordering::SeqCst),
                    read_failures: status.read_failures.load(Ordering::SeqCst),
                    reopens: status.reopens.load(Ordering::SeqCst),
                })
                .collect(),
        }
    }

    /// Cancel and wait up to `timeout` for the loop to release its sources.
    ///
    /// On timeout the thread is detached; it still releases its sources once
    /// its in-flight read returns.
    pub fn stop(mut self, timeout: Duration) -> StopOutcome {
        self.cancel.cancel();
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!(session = self.id, "Capture thread panicked");
                    }
                }
                debug!(session = self.id, "Session stopped");
                StopOutcome::Stopped
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    session = self.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Session did not stop in time, detaching capture thread"
                );
                counter!("dashboard_switch_timeouts_total").increment(1);
                StopOutcome::TimedOut
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
