//! Frame source abstraction and the camera registry

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info};

use crate::frame::VideoFrame;
use crate::synthetic::SyntheticCamera;
use crate::{CameraConfig, CameraError, CameraKey};

/// An open handle to one camera device
pub trait FrameSource: Send {
    /// Camera this source reads from
    fn key(&self) -> CameraKey;

    /// Read the next decoded frame, blocking for at most `timeout`
    fn read_frame(&mut self, timeout: Duration) -> Result<VideoFrame, CameraError>;

    /// Release the device handle. Calling this more than once is a no-op.
    fn release(&mut self);

    /// Whether the device handle is still held
    fn is_open(&self) -> bool;
}

/// Opens frame sources by camera key
pub trait SourceFactory: Send + Sync {
    fn open(&self, key: CameraKey) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Static camera key -> device table, read once at startup
#[derive(Debug, Clone, Default)]
pub struct CameraRegistry {
    cameras: BTreeMap<CameraKey, CameraConfig>,
}

impl CameraRegistry {
    /// Create a registry from a key -> config table
    pub fn new(cameras: BTreeMap<CameraKey, CameraConfig>) -> Self {
        info!("Camera registry created with {} cameras", cameras.len());
        Self { cameras }
    }

    /// Config for a key, if one is configured
    pub fn get(&self, key: CameraKey) -> Option<&CameraConfig> {
        self.cameras.get(&key)
    }

    /// Configured keys in port order
    pub fn keys(&self) -> impl Iterator<Item = CameraKey> + '_ {
        self.cameras.keys().copied()
    }
}

impl SourceFactory for CameraRegistry {
    fn open(&self, key: CameraKey) -> Result<Box<dyn FrameSource>, CameraError> {
        let config = self.get(key).ok_or(CameraError::UnknownCamera(key))?;
        debug!(camera = %key, device = %config.device, "Opening camera");

        if config.is_synthetic() {
            return Ok(Box::new(SyntheticCamera::new(key, config.width, config.height)));
        }

        open_device(key, config)
    }
}

#[cfg(feature = "v4l2")]
fn open_device(key: CameraKey, config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    Ok(Box::new(crate::v4l2::V4l2Camera::open(key, config)?))
}

#[cfg(not(feature = "v4l2"))]
fn open_device(_key: CameraKey, config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    Err(CameraError::Open(format!(
        "{}: built without V4L2 support",
        config.device
    )))
}
