//! Display sinks
//!
//! A sink takes one composed canvas-sized RGB frame per tick. There is no
//! back-pressure: a slow or failing sink only affects its own tick.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use camera_capture::VideoFrame;
use tracing::info;

use crate::DisplayError;

/// Output surface for composed frames
pub trait DisplaySink: Send + Sync {
    fn present(&self, frame: &VideoFrame) -> Result<(), DisplayError>;
}

#[derive(Default)]
struct Latest {
    frame: Option<Arc<VideoFrame>>,
    count: u64,
}

/// Keeps the most recent frame in memory
///
/// Backs the remote snapshot endpoint and lets tests inspect composed output.
#[derive(Default)]
pub struct LatestFrameSink {
    latest: Mutex<Latest>,
    presented: Condvar,
}

impl LatestFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently presented frame
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.lock().frame.clone()
    }

    /// Frames presented so far
    pub fn presented(&self) -> u64 {
        self.lock().count
    }

    /// Wait until at least `count` frames have been presented, then return
    /// the latest one. Returns `None` on timeout.
    pub fn wait_for_count(&self, count: u64, timeout: Duration) -> Option<Arc<VideoFrame>> {
        let guard = self.lock();
        let (guard, result) = self
            .presented
            .wait_timeout_while(guard, timeout, |latest| latest.count < count)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            return None;
        }
        guard.frame.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Latest> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DisplaySink for LatestFrameSink {
    fn present(&self, frame: &VideoFrame) -> Result<(), DisplayError> {
        let mut latest = self.lock();
        latest.frame = Some(Arc::new(frame.clone()));
        latest.count += 1;
        drop(latest);
        self.presented.notify_all();
        Ok(())
    }
}

/// Presents every frame to several sinks
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DisplaySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn DisplaySink>>) -> Self {
        Self { sinks }
    }
}

impl DisplaySink for FanoutSink {
    /// Every sink sees the frame; the first error is returned afterwards
    fn present(&self, frame: &VideoFrame) -> Result<(), DisplayError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.present(frame) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Framebuffer geometry as reported by sysfs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FbGeometry {
    width: u32,
    height: u32,
    bits_per_pixel: u32,
    stride: u32,
}

impl FbGeometry {
    /// Read `virtual_size`, `bits_per_pixel` and `stride` from a
    /// `/sys/class/graphics/fbN` directory
    fn from_sysfs(dir: &Path) -> Result<Self, DisplayError> {
        let read = |name: &str| -> Result<String, DisplayError> {
            Ok(std::fs::read_to_string(dir.join(name))?.trim().to_string())
        };
        let number = |name: &str, value: &str| -> Result<u32, DisplayError> {
            value
                .trim()
                .parse()
                .map_err(|_| DisplayError::Geometry(format!("{}: '{}'", name, value)))
        };

        let size = read("virtual_size")?;
        let (w, h) = size
            .split_once(',')
            .ok_or_else(|| DisplayError::Geometry(format!("virtual_size: '{}'", size)))?;
        let width = number("virtual_size", w)?;
        let height = number("virtual_size", h)?;
        let bits_per_pixel = number("bits_per_pixel", &read("bits_per_pixel")?)?;
        let bytes_per_pixel = match bits_per_pixel {
            16 | 24 | 32 => bits_per_pixel / 8,
            other => return Err(DisplayError::UnsupportedDepth(other)),
        };

        // Older kernels lack `stride`; assume packed rows
        let stride = match read("stride") {
            Ok(value) => number("stride", &value)?,
            Err(_) => width * bytes_per_pixel,
        };
        if stride < width * bytes_per_pixel {
            return Err(DisplayError::Geometry(format!(
                "stride {} shorter than a {}px row",
                stride, width
            )));
        }

        Ok(Self {
            width,
            height,
            bits_per_pixel,
            stride,
        })
    }

    fn len(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

/// Linux framebuffer device (`/dev/fbN`)
pub struct FramebufferSink {
    file: File,
    geometry: FbGeometry,
    buffer: Mutex<Vec<u8>>,
}

impl FramebufferSink {
    /// Open a framebuffer device, taking its geometry from sysfs
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DisplayError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DisplayError::Geometry(format!("not a device path: {}", path.display())))?;
        let geometry = FbGeometry::from_sysfs(&Path::new("/sys/class/graphics").join(name))?;
        let file = OpenOptions::new().write(true).open(path)?;

        info!(
            device = %path.display(),
            width = geometry.width,
            height = geometry.height,
            bpp = geometry.bits_per_pixel,
            "Framebuffer opened"
        );
        Ok(Self {
            file,
            buffer: Mutex::new(vec![0; geometry.len()]),
            geometry,
        })
    }
}

impl DisplaySink for FramebufferSink {
    fn present(&self, frame: &VideoFrame) -> Result<(), DisplayError> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        encode(frame, &self.geometry, &mut buffer);
        self.file.write_all_at(&buffer, 0)?;
        Ok(())
    }
}

/// Convert an RGB frame into framebuffer memory layout, clipping to the
/// smaller of the two sizes
fn encode(frame: &VideoFrame, geometry: &FbGeometry, out: &mut Vec<u8>) {
    out.resize(geometry.len(), 0);
    if frame.data.len() < frame.expected_len() {
        return;
    }

    let bytes_per_pixel = (geometry.bits_per_pixel / 8) as usize;
    let rows = frame.height.min(geometry.height) as usize;
    let cols = frame.width.min(geometry.width) as usize;

    for y in 0..rows {
        let src_row = &frame.data[y * frame.width as usize * 3..][..cols * 3];
        let dst_row = &mut out[y * geometry.stride as usize..][..cols * bytes_per_pixel];
        for (rgb, dst) in src_row.chunks_exact(3).zip(dst_row.chunks_exact_mut(bytes_per_pixel)) {
            let (r, g, b) = (rgb[0], rgb[1], rgb[2]);
            match bytes_per_pixel {
                4 => dst.copy_from_slice(&[b, g, r, 0xFF]),
                3 => dst.copy_from_slice(&[b, g, r]),
                _ => {
                    let rgb565 = (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
                    dst.copy_from_slice(&rgb565.to_le_bytes());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(bpp: u32, stride: u32) -> FbGeometry {
        FbGeometry {
            width: 2,
            height: 2,
            bits_per_pixel: bpp,
            stride,
        }
    }

    #[test]
    fn test_encode_32bpp_bgrx() {
        let frame = VideoFrame::solid(2, 2, [10, 20, 30]);
        let mut out = Vec::new();
        encode(&frame, &geometry(32, 8), &mut out);
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..4], &[30, 20, 10, 0xFF]);
        assert_eq!(&out[12..], &[30, 20, 10, 0xFF]);
    }

    #[test]
    fn test_encode_rgb565_with_padding() {
        let frame = VideoFrame::solid(2, 2, [255, 0, 0]);
        let mut out = Vec::new();
        encode(&frame, &geometry(16, 6), &mut out);
        assert_eq!(out.len(), 12);
        assert_eq!(&out[..4], &[0x00, 0xF8, 0x00, 0xF8]);
        // Row padding stays zero
        assert_eq!(&out[4..6], &[0, 0]);
    }

    #[test]
    fn test_encode_clips_larger_frame() {
        let frame = VideoFrame::solid(4, 4, [1, 2, 3]);
        let mut out = Vec::new();
        encode(&frame, &geometry(24, 6), &mut out);
        assert_eq!(out, vec![3, 2, 1, 3, 2, 1, 3, 2, 1, 3, 2, 1]);
    }

    #[test]
    fn test_geometry_from_sysfs() {
        let dir = std::env::temp_dir().join(format!("fb-sysfs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("virtual_size"), "1024,600\n").unwrap();
        std::fs::write(dir.join("bits_per_pixel"), "32\n").unwrap();
        std::fs::write(dir.join("stride"), "4096\n").unwrap();

        let geometry = FbGeometry::from_sysfs(&dir).unwrap();
        assert_eq!(geometry, FbGeometry { width: 1024, height: 600, bits_per_pixel: 32, stride: 4096 });

        std::fs::write(dir.join("bits_per_pixel"), "8\n").unwrap();
        assert!(matches!(FbGeometry::from_sysfs(&dir), Err(DisplayError::UnsupportedDepth(8))));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_latest_frame_sink() {
        let sink = LatestFrameSink::new();
        assert!(sink.latest().is_none());
        assert!(sink.wait_for_count(1, Duration::from_millis(10)).is_none());

        sink.present(&VideoFrame::solid(4, 4, [9, 9, 9])).unwrap();
        assert_eq!(sink.presented(), 1);
        let frame = sink.wait_for_count(1, Duration::from_millis(10)).unwrap();
        assert_eq!(frame.get_pixel(0, 0), Some([9, 9, 9]));
    }

    #[test]
    fn test_fanout_presents_everywhere() {
        let a = Arc::new(LatestFrameSink::new());
        let b = Arc::new(LatestFrameSink::new());
        let fanout = FanoutSink::new(vec![a.clone() as Arc<dyn DisplaySink>, b.clone()]);
        fanout.present(&VideoFrame::black(2, 2)).unwrap();
        assert_eq!(a.presented(), 1);
        assert_eq!(b.presented(), 1);
    }
}
