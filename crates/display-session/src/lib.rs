//! Display Session Controller
//!
//! Owns the camera capture session behind the dashboard display:
//! - [`DisplayController`]: the mode state machine; serializes mode switches
//!   from keyboard, touch and remote callers and keeps at most one session live
//! - [`Session`]: background loop reading frames, composing and presenting them
//! - [`DisplaySink`]: where composed frames go (framebuffer, in-memory)

mod controller;
mod mode;
mod session;
mod sink;

pub use controller::DisplayController;
pub use mode::{DisplayMode, SessionLayout};
pub use session::{
    CancelToken, Session, SessionContext, SessionSettings, SessionSnapshot, SessionState,
    SlotSnapshot, StopOutcome,
};
pub use sink::{DisplaySink, FanoutSink, FramebufferSink, LatestFrameSink};

use thiserror::Error;

/// Controller errors
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Multiview selection is not in progress")]
    NotSelecting,

    #[error("{0} cannot be switched to directly")]
    NotADisplayTarget(DisplayMode),

    #[error("Display controller is shut down")]
    ShutDown,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Display sink errors
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Display I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported framebuffer depth: {0} bpp")]
    UnsupportedDepth(u32),

    #[error("Invalid framebuffer geometry: {0}")]
    Geometry(String),
}
