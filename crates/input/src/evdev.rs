//! Linux evdev touchscreen reader

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use compositor::Canvas;
use display_session::DisplayMode;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::touch::TouchOverlay;
use crate::{CommandSink, InputError};

// linux/input-event-codes.h
const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const EV_ABS: u16 = 0x03;
const SYN_REPORT: u16 = 0x00;
const BTN_TOUCH: u16 = 0x14a;
const ABS_X: u16 = 0x00;
const ABS_Y: u16 = 0x01;
const ABS_MT_POSITION_X: u16 = 0x35;
const ABS_MT_POSITION_Y: u16 = 0x36;

/// `struct input_event`: timeval, then type (u16), code (u16), value (i32)
const EVENT_SIZE: usize = std::mem::size_of::<libc::input_event>();

const POLL_INTERVAL_MS: i32 = 100;

/// Touchscreen device and calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    /// evdev device (e.g. "/dev/input/event0"); touch input is off when unset
    pub device: Option<String>,
    pub x_min: i32,
    pub x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
}

impl Default for TouchConfig {
    fn default() -> Self {
        // Raw range of the official 7" panel
        Self {
            device: None,
            x_min: 0,
            x_max: 799,
            y_min: 0,
            y_max: 479,
        }
    }
}

impl TouchConfig {
    pub fn validate(&self) -> Result<(), InputError> {
        if self.x_max <= self.x_min || self.y_max <= self.y_min {
            return Err(InputError::Calibration(format!(
                "x {}..{}, y {}..{}",
                self.x_min, self.x_max, self.y_min, self.y_max
            )));
        }
        Ok(())
    }
}

/// Turns a stream of evdev events into taps in canvas coordinates
#[derive(Debug)]
pub struct TouchDecoder {
    config: TouchConfig,
    canvas: Canvas,
    x: i32,
    y: i32,
    touching: bool,
    press_pending: bool,
}

impl TouchDecoder {
    pub fn new(config: &TouchConfig, canvas: Canvas) -> Result<Self, InputError> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            canvas,
            x: config.x_min,
            y: config.y_min,
            touching: false,
            press_pending: false,
        })
    }

    /// Feed one event; returns a tap at the end of the report containing
    /// the finger-down
    pub fn feed(&mut self, kind: u16, code: u16, value: i32) -> Option<(i64, i64)> {
        match (kind, code) {
            (EV_ABS, ABS_X) | (EV_ABS, ABS_MT_POSITION_X) => self.x = value,
            (EV_ABS, ABS_Y) | (EV_ABS, ABS_MT_POSITION_Y) => self.y = value,
            (EV_KEY, BTN_TOUCH) => {
                let down = value != 0;
                if down && !self.touching {
                    self.press_pending = true;
                }
                self.touching = down;
            }
            (EV_SYN, SYN_REPORT) if self.press_pending => {
                self.press_pending = false;
                return Some((
                    scale(self.x, self.config.x_min, self.config.x_max, self.canvas.width),
                    scale(self.y, self.config.y_min, self.config.y_max, self.canvas.height),
                ));
            }
            _ => {}
        }
        None
    }
}

fn scale(value: i32, min: i32, max: i32, size: u32) -> i64 {
    let value = i64::from(value.clamp(min, max) - min);
    let span = i64::from(max - min);
    value * i64::from(size.saturating_sub(1)) / span
}

/// Split a raw `input_event` into (type, code, value)
fn parse_event(raw: &[u8]) -> Option<(u16, u16, i32)> {
    if raw.len() != EVENT_SIZE {
        return None;
    }
    let tail = &raw[EVENT_SIZE - 8..];
    let kind = u16::from_ne_bytes([tail[0], tail[1]]);
    let code = u16::from_ne_bytes([tail[2], tail[3]]);
    let value = i32::from_ne_bytes([tail[4], tail[5], tail[6], tail[7]]);
    Some((kind, code, value))
}

/// Wait up to `timeout_ms` for events. Interrupted waits report none.
fn wait_readable(fd: RawFd, timeout_ms: i32) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ret > 0)
}

/// Touchscreen listener driving a [`TouchOverlay`]
pub struct TouchReader;

impl TouchReader {
    /// Open the device and start the reader thread; it exits when `stop` is
    /// set or the device goes away
    pub fn spawn<S: CommandSink + 'static>(
        config: &TouchConfig,
        device: &str,
        canvas: Canvas,
        modes: watch::Receiver<DisplayMode>,
        sink: Arc<S>,
        stop: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, InputError> {
        let mut decoder = TouchDecoder::new(config, canvas)?;
        let file = File::open(device)?;
        let path = device.to_string();

        let handle = thread::Builder::new()
            .name("touch".to_string())
            .spawn(move || {
                let mut overlay = TouchOverlay::new(canvas.height);
                if let Err(e) = read_loop(file, &mut decoder, &mut overlay, &modes, sink.as_ref(), &stop) {
                    error!(device = %path, error = %e, "Touch input stopped");
                }
            })?;

        info!(device, "Touch input active");
        Ok(handle)
    }
}

fn read_loop<S: CommandSink>(
    mut file: File,
    decoder: &mut TouchDecoder,
    overlay: &mut TouchOverlay,
    modes: &watch::Receiver<DisplayMode>,
    sink: &S,
    stop: &AtomicBool,
) -> io::Result<()> {
    let mut buf = vec![0u8; EVENT_SIZE * 64];

    while !stop.load(Ordering::SeqCst) {
        overlay.tick(Instant::now());
        if !wait_readable(file.as_raw_fd(), POLL_INTERVAL_MS)? {
            continue;
        }

        let n = match file.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        for raw in buf[..n].chunks_exact(EVENT_SIZE) {
            let Some((kind, code, value)) = parse_event(raw) else {
                continue;
            };
            let Some((x, y)) = decoder.feed(kind, code, value) else {
                continue;
            };

            overlay.sync(*modes.borrow());
            if let Some(command) = overlay.tap(x, y, Instant::now()) {
                debug!(%command, x, y, "Touch command");
                if let Err(e) = sink.dispatch(command) {
                    warn!(%command, error = %e, "Touch command failed");
                }
            }
        }
    }
    Ok(())
}
