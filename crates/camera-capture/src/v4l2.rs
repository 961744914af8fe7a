//! V4L2 capture for USB cameras

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::frame::{decode_mjpeg, decode_yuyv, PixelFormat, VideoFrame};
use crate::source::FrameSource;
use crate::{CameraConfig, CameraError, CameraKey};

/// Number of mmap buffers queued with the driver
const BUFFER_COUNT: u32 = 4;

/// USB camera streaming through V4L2 mmap buffers
pub struct V4l2Camera {
    key: CameraKey,
    device_path: String,
    // Declared before `device` so the stream is torn down first
    stream: Option<Stream<'static>>,
    device: Option<Device>,
    format: PixelFormat,
    width: u32,
    height: u32,
    sequence: u32,
}

impl V4l2Camera {
    /// Open the device and start streaming (MJPEG preferred, YUYV accepted)
    pub fn open(key: CameraKey, config: &CameraConfig) -> Result<Self, CameraError> {
        let device = Device::with_path(&config.device)
            .map_err(|e| CameraError::Open(format!("{}: {}", config.device, e)))?;

        let mut requested = device
            .format()
            .map_err(|e| CameraError::Format(e.to_string()))?;
        requested.width = config.width;
        requested.height = config.height;
        requested.fourcc = FourCC::new(&PixelFormat::Mjpeg.fourcc());

        let negotiated = device
            .set_format(&requested)
            .map_err(|e| CameraError::Format(e.to_string()))?;
        let format = PixelFormat::from_fourcc(&negotiated.fourcc.repr).ok_or_else(|| {
            CameraError::Format(format!("unsupported pixel format {}", negotiated.fourcc))
        })?;

        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            warn!(camera = %key, error = %e, "Could not set frame rate, using driver default");
        }

        let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| CameraError::Stream(e.to_string()))?;

        info!(
            camera = %key,
            device = %config.device,
            width = negotiated.width,
            height = negotiated.height,
            format = ?format,
            "Camera streaming"
        );

        Ok(Self {
            key,
            device_path: config.device.clone(),
            stream: Some(stream),
            device: Some(device),
            format,
            width: negotiated.width,
            height: negotiated.height,
            sequence: 0,
        })
    }

    fn decode(&self, data: &[u8]) -> Result<VideoFrame, CameraError> {
        match self.format {
            PixelFormat::Mjpeg => decode_mjpeg(data),
            PixelFormat::Yuyv => decode_yuyv(data, self.width, self.height),
            PixelFormat::Rgb24 => {
                let frame = VideoFrame::new(data.to_vec(), self.width, self.height, 0, 0);
                if frame.data.len() < frame.expected_len() {
                    return Err(CameraError::Decode("short RGB buffer".to_string()));
                }
                Ok(frame)
            }
        }
    }
}

impl FrameSource for V4l2Camera {
    fn key(&self) -> CameraKey {
        self.key
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<VideoFrame, CameraError> {
        let stream = self.stream.as_mut().ok_or(CameraError::NotInitialized)?;
        stream.set_timeout(timeout);

        let (buf, meta) = stream.next().map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => CameraError::Timeout,
            _ => CameraError::Stream(e.to_string()),
        })?;
        let used = (meta.bytesused as usize).min(buf.len());
        // Copy out so the mmap buffer is requeued before decoding
        let raw = buf[..used].to_vec();

        let mut frame = self.decode(&raw)?;
        self.sequence = self.sequence.wrapping_add(1);
        frame.sequence = self.sequence;
        frame.timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Ok(frame)
    }

    fn release(&mut self) {
        let was_open = self.stream.is_some();
        self.stream = None;
        self.device = None;
        if was_open {
            debug!(camera = %self.key, device = %self.device_path, "Camera released");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.release();
    }
}
