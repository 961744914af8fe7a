//! Input Adapters
//!
//! Translate raw keyboard and touchscreen events into dashboard [`Command`]s.
//! Adapters hold no display state of their own beyond what they need for
//! hit-testing; every command goes through a [`CommandSink`].

mod evdev;
mod keyboard;
mod keymap;
mod touch;

pub use evdev::{TouchConfig, TouchDecoder, TouchReader};
pub use keyboard::{command_for_key, KeyboardListener};
pub use keymap::Keymap;
pub use touch::{Button, Region, TouchOverlay, HIDE_AFTER};

use camera_capture::CameraKey;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Something the user asked the dashboard to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Camera hotkey or button: fullscreen, or pick it while selecting
    ShowCamera(CameraKey),
    /// Start picking two cameras for multiview
    BeginMultiviewSelection,
    /// Set a fan channel to one of its levels
    SetFan { channel: u8, percent: u8 },
    /// Stop fans and exit
    Shutdown,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ShowCamera(key) => write!(f, "show camera {}", key),
            Command::BeginMultiviewSelection => f.write_str("begin multiview selection"),
            Command::SetFan { channel, percent } => write!(f, "fan {} to {}%", channel, percent),
            Command::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Receiver of input commands
pub trait CommandSink: Send + Sync {
    type Error: fmt::Display;

    fn dispatch(&self, command: Command) -> Result<(), Self::Error>;
}

/// Input adapter errors
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input device error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Standard input is not a terminal")]
    NotATerminal,

    #[error("Key '{key}' is bound to both {first} and {second}")]
    KeyConflict {
        key: char,
        first: String,
        second: String,
    },

    #[error("Fan channel {channel} has {keys} hotkeys but only {levels} levels")]
    TooManyKeys {
        channel: u8,
        keys: usize,
        levels: usize,
    },

    #[error("Invalid touch calibration: {0}")]
    Calibration(String),
}
