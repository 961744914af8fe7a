//! Camera Capture Library for the Car Dashboard
//!
//! Provides frame sources for the up to three USB cameras wired into the
//! dashboard. Supports:
//! - V4L2 capture (MJPEG or YUYV, decoded to RGB) behind the `v4l2` feature
//! - Synthetic test-pattern cameras for bench setups and tests

pub mod frame;
pub mod source;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{PixelFormat, VideoFrame};
pub use source::{CameraRegistry, FrameSource, SourceFactory};
pub use synthetic::{SourceStats, SyntheticCamera, SyntheticFactory};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Capture timeout")]
    Timeout,

    #[error("Camera not initialized")]
    NotInitialized,

    #[error("No camera configured for key {0}")]
    UnknownCamera(CameraKey),

    #[error("Invalid camera key: {0}")]
    InvalidKey(String),
}

/// Identifier of one of the three physical camera ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CameraKey {
    One,
    Two,
    Three,
}

impl CameraKey {
    /// All keys in port order
    pub const ALL: [CameraKey; 3] = [CameraKey::One, CameraKey::Two, CameraKey::Three];

    /// Numeric label shown on the dashboard (1-3)
    pub fn number(self) -> u8 {
        match self {
            CameraKey::One => 1,
            CameraKey::Two => 2,
            CameraKey::Three => 3,
        }
    }

    /// Key for a hotkey character ('1'..'3')
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '1' => Some(CameraKey::One),
            '2' => Some(CameraKey::Two),
            '3' => Some(CameraKey::Three),
            _ => None,
        }
    }
}

impl TryFrom<u8> for CameraKey {
    type Error = CameraError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CameraKey::One),
            2 => Ok(CameraKey::Two),
            3 => Ok(CameraKey::Three),
            other => Err(CameraError::InvalidKey(other.to_string())),
        }
    }
}

impl From<CameraKey> for u8 {
    fn from(key: CameraKey) -> Self {
        key.number()
    }
}

impl FromStr for CameraKey {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .parse::<u8>()
            .map_err(|_| CameraError::InvalidKey(trimmed.to_string()))
            .and_then(CameraKey::try_from)
    }
}

impl fmt::Display for CameraKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl Serialize for CameraKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.number())
    }
}

// Accepts both numbers and strings: config map keys arrive as strings.
impl<'de> Deserialize<'de> for CameraKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> serde::de::Visitor<'de> for KeyVisitor {
            type Value = CameraKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a camera key between 1 and 3")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<CameraKey, E> {
                u8::try_from(v)
                    .ok()
                    .and_then(|v| CameraKey::try_from(v).ok())
                    .ok_or_else(|| E::custom(format!("invalid camera key {}", v)))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<CameraKey, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom(format!("invalid camera key {}", v)))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<CameraKey, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/v4l/by-path/...-video-index0"), or
    /// "synthetic:<name>" for a generated test pattern
    pub device: String,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl CameraConfig {
    /// Config for a USB camera at the given device path (MJPEG 640x480 @ 30fps)
    pub fn usb(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Config for a synthetic test-pattern camera
    pub fn synthetic(name: &str) -> Self {
        Self {
            device: format!("{}{}", synthetic::DEVICE_PREFIX, name),
            ..Default::default()
        }
    }

    /// Whether this entry describes a synthetic camera
    pub fn is_synthetic(&self) -> bool {
        self.device.starts_with(synthetic::DEVICE_PREFIX)
    }
}
