//! PWM controller abstraction

use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::FanError;

/// Hardware PWM controller (one register write per call, no acknowledgement)
pub trait PwmController: Send + Sync {
    /// Write a 16-bit duty value to a channel
    fn set_duty(&self, channel: u8, duty: u16) -> Result<(), FanError>;

    /// Put the controller back into its reset state
    fn deinit(&self) -> Result<(), FanError>;
}

/// Controller used when no fan hardware is present; logs writes only
#[derive(Debug, Default)]
pub struct NullPwm;

impl PwmController for NullPwm {
    fn set_duty(&self, channel: u8, duty: u16) -> Result<(), FanError> {
        debug!(channel, duty = format_args!("{:#06X}", duty), "PWM write (no hardware)");
        Ok(())
    }

    fn deinit(&self) -> Result<(), FanError> {
        debug!("PWM deinit (no hardware)");
        Ok(())
    }
}

/// A call observed by [`RecordingPwm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmEvent {
    Duty { channel: u8, duty: u16 },
    Deinit,
}

/// Controller that records every call in order
#[derive(Debug, Default)]
pub struct RecordingPwm {
    events: Mutex<Vec<PwmEvent>>,
}

impl RecordingPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls seen so far, oldest first
    pub fn events(&self) -> Vec<PwmEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn push(&self, event: PwmEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl PwmController for RecordingPwm {
    fn set_duty(&self, channel: u8, duty: u16) -> Result<(), FanError> {
        self.push(PwmEvent::Duty { channel, duty });
        Ok(())
    }

    fn deinit(&self) -> Result<(), FanError> {
        self.push(PwmEvent::Deinit);
        Ok(())
    }
}
