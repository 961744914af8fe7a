//! Fan Control
//!
//! Drives cabin/electronics fans through a PWM controller. Each fan channel
//! accepts a fixed set of duty levels; on shutdown every channel is driven to
//! 0% before the controller is deinitialized.

mod controller;
mod driver;
mod level;
mod pca9685;

pub use controller::{FanChannelConfig, FanController, FanState};
pub use driver::{NullPwm, PwmController, PwmEvent, RecordingPwm};
pub use level::{duty_for_percent, DutyScale};
pub use pca9685::{Pca9685, Pca9685Config, PWM_CHANNELS};

use thiserror::Error;

/// Fan control errors
#[derive(Error, Debug)]
pub enum FanError {
    #[error("I2C error: {0}")]
    I2c(#[from] std::io::Error),

    #[error("PWM channel {0} is out of range (0-15)")]
    InvalidChannel(u8),

    #[error("Fan channel {0} is not configured")]
    UnknownChannel(u8),

    #[error("{percent}% is not a {scale} level for fan channel {channel}")]
    UnsupportedLevel {
        channel: u8,
        percent: u8,
        scale: DutyScale,
    },

    #[error("Duplicate fan channel {0}")]
    DuplicateChannel(u8),

    #[error("Fan controller is shut down")]
    ShutDown,
}
