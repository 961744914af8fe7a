//! Per-channel fan state and the shutdown sequence

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::driver::PwmController;
use crate::level::{duty_for_percent, DutyScale};
use crate::FanError;

/// Configuration for one fan channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanChannelConfig {
    /// PWM output on the controller
    pub channel: u8,
    /// Accepted duty levels
    pub scale: DutyScale,
    /// Hotkeys, one per level in ascending order ("asdfgh" -> 0..100%)
    pub keys: String,
}

impl Default for FanChannelConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            scale: DutyScale::FiveStep,
            keys: "asdfgh".to_string(),
        }
    }
}

impl FanChannelConfig {
    /// Duty level bound to a hotkey, if any
    pub fn level_for_key(&self, key: char) -> Option<u8> {
        self.keys
            .chars()
            .position(|k| k == key)
            .and_then(|i| self.scale.levels().get(i).copied())
    }
}

/// Last commanded level per channel, in percent
pub type FanState = BTreeMap<u8, u8>;

struct Channel {
    scale: DutyScale,
    level: Mutex<u8>,
}

/// Fan controller
///
/// Writes to the same channel are serialized; writes to different channels
/// proceed independently.
pub struct FanController {
    driver: Arc<dyn PwmController>,
    channels: BTreeMap<u8, Channel>,
    shut_down: AtomicBool,
}

impl FanController {
    /// Create a controller; channels start at 0% (nothing is written yet)
    pub fn new(
        driver: Arc<dyn PwmController>,
        channels: &[FanChannelConfig],
    ) -> Result<Self, FanError> {
        let mut map = BTreeMap::new();
        for config in channels {
            let channel = Channel {
                scale: config.scale,
                level: Mutex::new(0),
            };
            if map.insert(config.channel, channel).is_some() {
                return Err(FanError::DuplicateChannel(config.channel));
            }
        }

        info!(channels = map.len(), "Fan controller ready");
        Ok(Self {
            driver,
            channels: map,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Command a channel to one of its supported levels
    pub fn set_duty(&self, channel: u8, percent: u8) -> Result<(), FanError> {
        let slot = self
            .channels
            .get(&channel)
            .ok_or(FanError::UnknownChannel(channel))?;

        if !slot.scale.contains(percent) {
            return Err(FanError::UnsupportedLevel {
                channel,
                percent,
                scale: slot.scale,
            });
        }

        let mut level = slot.level.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the channel lock so no write can follow the zeroing pass
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(FanError::ShutDown);
        }

        self.driver.set_duty(channel, duty_for_percent(percent))?;
        *level = percent;

        info!(channel, percent, "Fan duty set");
        Ok(())
    }

    /// Snapshot of the last commanded level per channel
    pub fn state(&self) -> FanState {
        self.channels
            .iter()
            .map(|(&ch, slot)| {
                let level = *slot.level.lock().unwrap_or_else(PoisonError::into_inner);
                (ch, level)
            })
            .collect()
    }

    /// Channel ids in ascending order
    pub fn channels(&self) -> Vec<u8> {
        self.channels.keys().copied().collect()
    }

    pub fn scale(&self, channel: u8) -> Option<DutyScale> {
        self.channels.get(&channel).map(|slot| slot.scale)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Drive every channel to 0%, then deinitialize the hardware
    ///
    /// Runs at most once. Write failures are logged and do not stop the
    /// sequence.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        for (&channel, slot) in &self.channels {
            let mut level = slot.level.lock().unwrap_or_else(PoisonError::into_inner);
            match self.driver.set_duty(channel, 0) {
                Ok(()) => *level = 0,
                Err(e) => error!(channel, error = %e, "Failed to stop fan"),
            }
        }

        if let Err(e) = self.driver.deinit() {
            warn!(error = %e, "PWM controller deinit failed");
        }
        info!("Fans stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{PwmEvent, RecordingPwm};

    fn controller(channels: &[FanChannelConfig]) -> (Arc<RecordingPwm>, FanController) {
        let pwm = Arc::new(RecordingPwm::new());
        let fans = FanController::new(pwm.clone(), channels).unwrap();
        (pwm, fans)
    }

    fn three_fans() -> Vec<FanChannelConfig> {
        (0..3)
            .map(|channel| FanChannelConfig {
                channel,
                scale: DutyScale::ThreeStep,
                keys: String::new(),
            })
            .collect()
    }

    #[test]
    fn test_set_duty_writes_register_value() {
        let (pwm, fans) = controller(&[FanChannelConfig::default()]);
        fans.set_duty(0, 60).unwrap();

        assert_eq!(pwm.events(), vec![PwmEvent::Duty { channel: 0, duty: 0x9999 }]);
        assert_eq!(fans.state().get(&0), Some(&60));
    }

    #[test]
    fn test_rejects_unsupported_level() {
        let (pwm, fans) = controller(&three_fans());
        let err = fans.set_duty(1, 20).unwrap_err();
        assert!(matches!(err, FanError::UnsupportedLevel { channel: 1, percent: 20, .. }));
        assert!(pwm.events().is_empty());

        assert!(matches!(fans.set_duty(7, 0), Err(FanError::UnknownChannel(7))));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let pwm = Arc::new(RecordingPwm::new());
        let configs = vec![FanChannelConfig::default(), FanChannelConfig::default()];
        assert!(matches!(
            FanController::new(pwm, &configs),
            Err(FanError::DuplicateChannel(0))
        ));
    }

    #[test]
    fn test_shutdown_zeroes_every_channel_before_deinit() {
        let (pwm, fans) = controller(&three_fans());
        fans.set_duty(0, 100).unwrap();
        fans.set_duty(2, 66).unwrap();

        fans.shutdown();

        let events = pwm.events();
        let deinit = events.iter().position(|e| *e == PwmEvent::Deinit).unwrap();
        assert_eq!(deinit, events.len() - 1);
        for channel in 0..3 {
            let zero = events
                .iter()
                .position(|e| *e == PwmEvent::Duty { channel, duty: 0 })
                .unwrap();
            assert!(zero < deinit);
        }
        assert!(fans.state().values().all(|&level| level == 0));
    }

    #[test]
    fn test_shutdown_is_idempotent_and_blocks_writes() {
        let (pwm, fans) = controller(&[FanChannelConfig::default()]);
        fans.shutdown();
        fans.shutdown();

        let deinits = pwm.events().iter().filter(|e| **e == PwmEvent::Deinit).count();
        assert_eq!(deinits, 1);
        assert!(matches!(fans.set_duty(0, 100), Err(FanError::ShutDown)));
    }

    #[test]
    fn test_level_for_key() {
        let config = FanChannelConfig::default();
        assert_eq!(config.level_for_key('a'), Some(0));
        assert_eq!(config.level_for_key('d'), Some(40));
        assert_eq!(config.level_for_key('h'), Some(100));
        assert_eq!(config.level_for_key('z'), None);
    }

    #[test]
    fn test_concurrent_writes_same_channel() {
        let (pwm, fans) = controller(&[FanChannelConfig::default()]);
        let fans = Arc::new(fans);

        let handles: Vec<_> = [20u8, 80]
            .into_iter()
            .map(|percent| {
                let fans = fans.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        fans.set_duty(0, percent).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // The recorded level always matches the last register write
        let last = match pwm.events().last() {
            Some(PwmEvent::Duty { duty, .. }) => *duty,
            other => panic!("unexpected last event {other:?}"),
        };
        assert_eq!(duty_for_percent(fans.state()[&0]), last);
    }
}
