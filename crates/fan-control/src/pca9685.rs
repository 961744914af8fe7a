//! PCA9685 16-channel PWM controller on Linux I2C

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::driver::PwmController;
use crate::FanError;

/// `ioctl` request selecting the I2C target address (linux/i2c-dev.h)
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// Internal oscillator frequency
const OSCILLATOR_HZ: f64 = 25_000_000.0;

// Registers
const MODE1: u8 = 0x00;
const PRESCALE: u8 = 0xFE;
const LED0_ON_L: u8 = 0x06;

// MODE1 bits
const MODE1_RESTART: u8 = 0x80;
const MODE1_AI: u8 = 0x20;
const MODE1_SLEEP: u8 = 0x10;

/// Full-on / full-off flag in the ON_H / OFF_H registers
const FULL: u8 = 0x10;

/// Number of PWM outputs
pub const PWM_CHANNELS: u8 = 16;

/// PCA9685 bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pca9685Config {
    /// I2C bus device
    pub i2c_device: String,
    /// 7-bit I2C address
    pub address: u16,
    /// PWM frequency in Hz (250 Hz suits 4-wire fans)
    pub frequency_hz: u32,
}

impl Default for Pca9685Config {
    fn default() -> Self {
        Self {
            i2c_device: "/dev/i2c-1".to_string(),
            address: 0x40,
            frequency_hz: 250,
        }
    }
}

/// PCA9685 driver
pub struct Pca9685 {
    bus: Mutex<File>,
}

impl Pca9685 {
    /// Open the bus, reset the chip and program the PWM frequency
    pub fn open(config: &Pca9685Config) -> Result<Self, FanError> {
        let bus = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.i2c_device)?;

        let ret = unsafe {
            libc::ioctl(
                bus.as_raw_fd(),
                I2C_SLAVE as _,
                libc::c_ulong::from(config.address),
            )
        };
        if ret < 0 {
            return Err(FanError::I2c(std::io::Error::last_os_error()));
        }

        let chip = Self { bus: Mutex::new(bus) };
        chip.write_register(MODE1, 0x00)?;
        chip.set_frequency(config.frequency_hz)?;

        info!(
            device = %config.i2c_device,
            address = format_args!("{:#04X}", config.address),
            frequency_hz = config.frequency_hz,
            "PCA9685 initialized"
        );
        Ok(chip)
    }

    fn set_frequency(&self, frequency_hz: u32) -> Result<(), FanError> {
        let prescale = prescale_for(frequency_hz);
        let old_mode = self.read_register(MODE1)?;

        // Prescale can only be written while the oscillator sleeps
        self.write_register(MODE1, (old_mode & !MODE1_RESTART) | MODE1_SLEEP)?;
        self.write_register(PRESCALE, prescale)?;
        self.write_register(MODE1, old_mode)?;
        std::thread::sleep(Duration::from_millis(5));
        self.write_register(MODE1, old_mode | MODE1_RESTART | MODE1_AI)?;

        debug!(prescale, "PCA9685 frequency set");
        Ok(())
    }

    fn write_register(&self, register: u8, value: u8) -> Result<(), FanError> {
        self.write(&[register, value])
    }

    fn read_register(&self, register: u8) -> Result<u8, FanError> {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        bus.write_all(&[register])?;
        let mut value = [0u8; 1];
        bus.read_exact(&mut value)?;
        Ok(value[0])
    }

    fn write(&self, bytes: &[u8]) -> Result<(), FanError> {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        bus.write_all(bytes)?;
        Ok(())
    }
}

impl PwmController for Pca9685 {
    fn set_duty(&self, channel: u8, duty: u16) -> Result<(), FanError> {
        if channel >= PWM_CHANNELS {
            return Err(FanError::InvalidChannel(channel));
        }
        self.write(&channel_registers(channel, duty))
    }

    fn deinit(&self) -> Result<(), FanError> {
        debug!("PCA9685 reset");
        self.write_register(MODE1, 0x00)
    }
}

/// Prescale value for a PWM frequency, clamped to the chip's range
fn prescale_for(frequency_hz: u32) -> u8 {
    let frequency = frequency_hz.max(1) as f64;
    let prescale = (OSCILLATOR_HZ / (4096.0 * frequency)).round() - 1.0;
    prescale.clamp(3.0, 255.0) as u8
}

/// Register address followed by ON_L, ON_H, OFF_L, OFF_H for a 16-bit duty
fn channel_registers(channel: u8, duty: u16) -> [u8; 5] {
    let base = LED0_ON_L + 4 * channel;
    match duty {
        0xFFFF => [base, 0x00, FULL, 0x00, 0x00],
        d if d < 0x0010 => [base, 0x00, 0x00, 0x00, FULL],
        d => {
            let off = d >> 4;
            [base, 0x00, 0x00, (off & 0xFF) as u8, (off >> 8) as u8]
        }
    }
}
