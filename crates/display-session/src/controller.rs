//! Display mode state machine
//!
//! Every state change runs under one lock, so switches requested from the
//! keyboard, the touch overlay and the remote API serialize instead of
//! interleaving. The published mode is only updated once the session backing
//! it is running.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use camera_capture::CameraKey;
use metrics::histogram;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::mode::DisplayMode;
use crate::session::{Session, SessionContext, SessionSnapshot, StopOutcome};
use crate::ControllerError;

struct Inner {
    session: Option<Session>,
    /// Mode the current session shows (Idle without a session)
    display_mode: DisplayMode,
    selecting: bool,
    /// Ordered multiview picks, at most one while selecting
    selection: Vec<CameraKey>,
    shut_down: bool,
    next_id: u64,
}

impl Inner {
    fn published(&self) -> DisplayMode {
        if self.selecting {
            DisplayMode::SelectingMultiview {
                selection: self.selection.first().copied(),
            }
        } else {
            self.display_mode
        }
    }
}

/// Owns the current display session and the display mode
pub struct DisplayController {
    ctx: SessionContext,
    inner: Mutex<Inner>,
    mode_tx: watch::Sender<DisplayMode>,
    live: Arc<AtomicUsize>,
}

impl DisplayController {
    /// Create an idle controller
    pub fn new(ctx: SessionContext) -> Self {
        let (mode_tx, _) = watch::channel(DisplayMode::Idle);
        Self {
            ctx,
            inner: Mutex::new(Inner {
                session: None,
                display_mode: DisplayMode::Idle,
                selecting: false,
                selection: Vec::new(),
                shut_down: false,
                next_id: 1,
            }),
            mode_tx,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Switch to `target`, replacing the current session.
    ///
    /// Switching to the mode already shown keeps the running session. Any
    /// multiview selection in progress is abandoned.
    pub fn switch_mode(&self, target: DisplayMode) -> Result<(), ControllerError> {
        match target {
            DisplayMode::SelectingMultiview { .. } => {
                return Err(ControllerError::NotADisplayTarget(target))
            }
            DisplayMode::Multiview(left, right) => {
                DisplayMode::multiview(&[left, right])?;
            }
            DisplayMode::Single(_) | DisplayMode::Idle => {}
        }

        let mut inner = self.lock()?;
        inner.selecting = false;
        inner.selection.clear();
        self.apply(&mut inner, target)
    }

    /// Enter multiview selection with an empty selection.
    ///
    /// The current session keeps displaying until the selection completes.
    pub fn begin_multiview_selection(&self) -> Result<(), ControllerError> {
        let mut inner = self.lock()?;
        inner.selecting = true;
        inner.selection.clear();
        info!("Multiview selection started");
        self.publish(&inner);
        Ok(())
    }

    /// Toggle `key` in the multiview selection; the second distinct pick
    /// switches to multiview. Returns the resulting mode.
    pub fn select_camera(&self, key: CameraKey) -> Result<DisplayMode, ControllerError> {
        let mut inner = self.lock()?;
        if !inner.selecting {
            return Err(ControllerError::NotSelecting);
        }
        self.select(&mut inner, key)
    }

    /// A camera button or hotkey: picks the camera while selecting for
    /// multiview, otherwise shows it fullscreen. Returns the resulting mode.
    pub fn activate_camera(&self, key: CameraKey) -> Result<DisplayMode, ControllerError> {
        let mut inner = self.lock()?;
        if inner.selecting {
            return self.select(&mut inner, key);
        }
        self.apply(&mut inner, DisplayMode::Single(key))?;
        Ok(inner.published())
    }

    /// Leave multiview selection and go back to the mode being displayed
    pub fn cancel_selection(&self) -> Result<(), ControllerError> {
        let mut inner = self.lock()?;
        if !inner.selecting {
            return Err(ControllerError::NotSelecting);
        }
        inner.selecting = false;
        inner.selection.clear();
        debug!("Multiview selection cancelled");
        self.publish(&inner);
        Ok(())
    }

    /// Stop the current session (bounded wait) and refuse further switches.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        inner.selecting = false;
        inner.selection.clear();

        if let Some(session) = inner.session.take() {
            if self.stop_session(session) == StopOutcome::TimedOut {
                warn!("Shutting down with a capture thread still running");
            }
        }
        inner.display_mode = DisplayMode::Idle;
        self.publish(&inner);
        info!("Display controller shut down");
    }

    /// Mode as last published
    pub fn current_mode(&self) -> DisplayMode {
        *self.mode_tx.borrow()
    }

    /// Receiver notified on every published mode change
    pub fn subscribe(&self) -> watch::Receiver<DisplayMode> {
        self.mode_tx.subscribe()
    }

    /// Ordered multiview selection in progress
    pub fn selection(&self) -> Vec<CameraKey> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .selection
            .clone()
    }

    pub fn session_snapshot(&self) -> Option<SessionSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .as_ref()
            .map(Session::snapshot)
    }

    /// Capture threads that have not exited yet (a detached thread from a
    /// timed-out switch counts until it finishes)
    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shut_down
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, ControllerError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.shut_down {
            return Err(ControllerError::ShutDown);
        }
        Ok(inner)
    }

    fn select(&self, inner: &mut Inner, key: CameraKey) -> Result<DisplayMode, ControllerError> {
        if let Some(pos) = inner.selection.iter().position(|&k| k == key) {
            inner.selection.remove(pos);
            debug!(camera = %key, "Camera deselected");
        } else {
            inner.selection.push(key);
            debug!(camera = %key, "Camera selected");
        }

        if inner.selection.len() < 2 {
            self.publish(inner);
            return Ok(inner.published());
        }

        let target = DisplayMode::multiview(&inner.selection)?;
        inner.selecting = false;
        inner.selection.clear();
        self.apply(inner, target)?;
        Ok(inner.published())
    }

    /// Stop-old/start-new under the held lock, then publish
    fn apply(&self, inner: &mut Inner, target: DisplayMode) -> Result<(), ControllerError> {
        let layout = target.layout();

        let unchanged = match (&inner.session, layout) {
            (Some(session), Some(layout)) => session.layout() == layout && session.is_running(),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            debug!(mode = %target, "Mode already active");
            inner.display_mode = target;
            self.publish(inner);
            return Ok(());
        }

        let started = Instant::now();
        if let Some(previous) = inner.session.take() {
            previous.cancel();
            self.stop_session(previous);
        }

        if let Some(layout) = layout {
            let id = inner.next_id;
            inner.next_id += 1;
            match Session::start(id, layout, &self.ctx, &self.live) {
                Ok(session) => inner.session = Some(session),
                Err(e) => {
                    inner.display_mode = DisplayMode::Idle;
                    self.publish(inner);
                    return Err(e.into());
                }
            }
        }

        inner.display_mode = target;
        self.publish(inner);
        histogram!("dashboard_mode_switch_seconds").record(started.elapsed().as_secs_f64());
        info!(
            mode = %target,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Display mode switched"
        );
        Ok(())
    }

    fn stop_session(&self, session: Session) -> StopOutcome {
        let id = session.id();
        let outcome = session.stop(self.ctx.settings.join_timeout());
        if outcome == StopOutcome::TimedOut {
            warn!(session = id, "Previous session did not stop in time, continuing");
        }
        outcome
    }

    fn publish(&self, inner: &Inner) {
        self.mode_tx.send_replace(inner.published());
    }
}

impl Drop for DisplayController {
    fn drop(&mut self) {
        if let Some(session) = self
            .inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .take()
        {
            session.cancel();
        }
    }
}
