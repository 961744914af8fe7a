//! Synthetic test-pattern cameras
//!
//! Used on the bench (device paths starting with `synthetic:`) and by tests,
//! where [`SyntheticFactory`] can simulate missing cameras, failing reads and
//! hung drivers while counting every open and release.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::frame::VideoFrame;
use crate::source::{FrameSource, SourceFactory};
use crate::{CameraError, CameraKey};

/// Device path prefix selecting a synthetic camera
pub const DEVICE_PREFIX: &str = "synthetic:";

/// Base color of each camera's test pattern
pub fn pattern_color(key: CameraKey) -> [u8; 3] {
    match key {
        CameraKey::One => [200, 40, 40],
        CameraKey::Two => [40, 200, 40],
        CameraKey::Three => [40, 40, 200],
    }
}

/// Open/release bookkeeping shared by every source a factory hands out
#[derive(Debug, Default)]
pub struct SourceStats {
    opens: AtomicUsize,
    releases: AtomicUsize,
    live: [AtomicUsize; 3],
}

impl SourceStats {
    fn opened(&self, key: CameraKey) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live[slot(key)].fetch_add(1, Ordering::SeqCst);
    }

    fn released(&self, key: CameraKey) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.live[slot(key)].fetch_sub(1, Ordering::SeqCst);
    }

    /// Successful opens so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Releases so far (each handle counts once)
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Handles currently held for a camera
    pub fn live(&self, key: CameraKey) -> usize {
        self.live[slot(key)].load(Ordering::SeqCst)
    }

    /// Handles currently held across all cameras
    pub fn total_live(&self) -> usize {
        CameraKey::ALL.iter().map(|&k| self.live(k)).sum()
    }
}

fn slot(key: CameraKey) -> usize {
    key.number() as usize - 1
}

/// Per-camera fault injection
#[derive(Debug, Default)]
struct Faults {
    failing_reads: AtomicBool,
    read_stall_ms: AtomicU64,
}

/// Camera producing a moving test pattern
pub struct SyntheticCamera {
    key: CameraKey,
    width: u32,
    height: u32,
    sequence: u32,
    open: bool,
    stats: Option<Arc<SourceStats>>,
    faults: Option<Arc<Faults>>,
}

impl SyntheticCamera {
    /// Standalone synthetic camera
    pub fn new(key: CameraKey, width: u32, height: u32) -> Self {
        Self {
            key,
            width,
            height,
            sequence: 0,
            open: true,
            stats: None,
            faults: None,
        }
    }

    fn render(&self) -> VideoFrame {
        let mut frame = VideoFrame::solid(self.width, self.height, pattern_color(self.key));
        frame.sequence = self.sequence;
        frame.timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        // Moving white bar so a frozen feed is visible
        if self.width >= 16 {
            let bar_width = (self.width / 16) as usize;
            let bar_x = (self.sequence as usize * 8) % self.width as usize;
            for row in 0..self.height as usize {
                for x in bar_x..(bar_x + bar_width).min(self.width as usize) {
                    let idx = (row * self.width as usize + x) * 3;
                    frame.data[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
                }
            }
        }
        frame
    }
}

impl FrameSource for SyntheticCamera {
    fn key(&self) -> CameraKey {
        self.key
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<VideoFrame, CameraError> {
        if !self.open {
            return Err(CameraError::NotInitialized);
        }

        if let Some(faults) = &self.faults {
            // A stalled read ignores the timeout, like a wedged driver
            let stall = faults.read_stall_ms.load(Ordering::SeqCst);
            if stall > 0 {
                std::thread::sleep(Duration::from_millis(stall));
            }
            if faults.failing_reads.load(Ordering::SeqCst) {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                return Err(CameraError::Timeout);
            }
        }

        self.sequence = self.sequence.wrapping_add(1);
        Ok(self.render())
    }

    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Some(stats) = &self.stats {
            stats.released(self.key);
        }
        debug!(camera = %self.key, "Synthetic camera released");
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Factory of synthetic cameras with fault injection and open accounting
pub struct SyntheticFactory {
    width: u32,
    height: u32,
    stats: Arc<SourceStats>,
    unavailable: Mutex<HashSet<CameraKey>>,
    faults: [Arc<Faults>; 3],
    open_delay: Duration,
}

impl SyntheticFactory {
    /// Factory producing frames of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stats: Arc::new(SourceStats::default()),
            unavailable: Mutex::new(HashSet::new()),
            faults: Default::default(),
            open_delay: Duration::ZERO,
        }
    }

    /// Make every open take at least `delay`
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Shared open/release counters
    pub fn stats(&self) -> Arc<SourceStats> {
        Arc::clone(&self.stats)
    }

    /// Simulate an unplugged camera: opens fail while set
    pub fn set_unavailable(&self, key: CameraKey, unavailable: bool) {
        let mut set = self.unavailable.lock().unwrap_or_else(PoisonError::into_inner);
        if unavailable {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }

    /// Make reads from a camera fail with a timeout
    pub fn set_failing_reads(&self, key: CameraKey, failing: bool) {
        self.faults[slot(key)].failing_reads.store(failing, Ordering::SeqCst);
    }

    /// Make reads from a camera block for `stall` regardless of the timeout
    pub fn set_read_stall(&self, key: CameraKey, stall: Duration) {
        self.faults[slot(key)]
            .read_stall_ms
            .store(stall.as_millis() as u64, Ordering::SeqCst);
    }
}

impl SourceFactory for SyntheticFactory {
    fn open(&self, key: CameraKey) -> Result<Box<dyn FrameSource>, CameraError> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }

        let unavailable = self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key);
        if unavailable {
            return Err(CameraError::Open(format!("{}camera-{} unplugged", DEVICE_PREFIX, key)));
        }

        self.stats.opened(key);
        let mut camera = SyntheticCamera::new(key, self.width, self.height);
        camera.stats = Some(Arc::clone(&self.stats));
        camera.faults = Some(Arc::clone(&self.faults[slot(key)]));
        Ok(Box::new(camera))
    }
}
