//! Application configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `DASHBOARD__SECTION__KEY` environment variables.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use camera_capture::{CameraConfig, CameraKey};
use compositor::{Canvas, ScaleFilter};
use config::{Config, Environment, File, FileFormat};
use display_session::{DisplayMode, SessionSettings};
use fan_control::{FanChannelConfig, Pca9685Config};
use input::{Keymap, TouchConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file, used when present
pub const DEFAULT_CONFIG_FILE: &str = "dashboard.toml";

/// Environment variable prefix (`DASHBOARD__CANVAS__WIDTH=800`)
pub const ENV_PREFIX: &str = "DASHBOARD";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera key -> device
    pub cameras: BTreeMap<CameraKey, CameraConfig>,
    /// Output canvas size
    pub canvas: Canvas,
    pub display: DisplayConfig,
    pub session: SessionSettings,
    pub fans: FanConfig,
    pub input: InputConfig,
    pub api: ApiConfig,
    pub startup: StartupConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        // USB ports of the dashboard hub, by physical path so they survive
        // re-enumeration
        let port = |n: u8| {
            CameraConfig::usb(format!(
                "/dev/v4l/by-path/platform-fd500000.pcie-pci-0000:01:00.0-usb-0:1.1.{}:1.0-video-index0",
                n
            ))
        };
        let cameras = BTreeMap::from([
            (CameraKey::One, port(4)),
            (CameraKey::Two, port(3)),
            (CameraKey::Three, port(2)),
        ]);

        Self {
            cameras,
            canvas: Canvas::default(),
            display: DisplayConfig::default(),
            session: SessionSettings::default(),
            fans: FanConfig::default(),
            input: InputConfig::default(),
            api: ApiConfig::default(),
            startup: StartupConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Display output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Framebuffer device; frames are only kept in memory when unset
    pub framebuffer: Option<String>,
    /// Scaling filter
    pub filter: ScaleFilter,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            framebuffer: Some("/dev/fb0".to_string()),
            filter: ScaleFilter::default(),
        }
    }
}

/// PWM hardware selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanDriver {
    Pca9685,
    /// No fan hardware; writes are only logged
    None,
}

/// Fan control
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanConfig {
    pub driver: FanDriver,
    pub pca9685: Pca9685Config,
    pub channels: Vec<FanChannelConfig>,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            driver: FanDriver::Pca9685,
            pca9685: Pca9685Config::default(),
            channels: vec![FanChannelConfig::default()],
        }
    }
}

/// Input adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Read hotkeys from the controlling terminal
    pub keyboard: bool,
    pub touch: TouchConfig,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            keyboard: true,
            touch: TouchConfig::default(),
        }
    }
}

/// Remote control API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address; the API is off when unset
    pub bind: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: Some("0.0.0.0:8080".to_string()),
        }
    }
}

impl ApiConfig {
    /// Parsed listen address, if the API is enabled
    pub fn addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.bind
            .as_deref()
            .map(|bind| {
                bind.parse()
                    .map_err(|e| ConfigError::Invalid(format!("api.bind {:?}: {}", bind, e)))
            })
            .transpose()
    }
}

/// Startup display mode kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    Single,
    Multiview,
    Idle,
}

/// Mode entered at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub mode: StartupMode,
    /// Cameras in pane order
    pub cameras: Vec<CameraKey>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            mode: StartupMode::Multiview,
            cameras: vec![CameraKey::One, CameraKey::Two],
        }
    }
}

impl StartupConfig {
    pub fn display_mode(&self) -> Result<DisplayMode, ConfigError> {
        match (self.mode, self.cameras.as_slice()) {
            (StartupMode::Single, [key]) => Ok(DisplayMode::Single(*key)),
            (StartupMode::Single, keys) => Err(ConfigError::Invalid(format!(
                "startup.cameras: single mode takes 1 camera, got {}",
                keys.len()
            ))),
            (StartupMode::Multiview, keys) => DisplayMode::multiview(keys)
                .map_err(|e| ConfigError::Invalid(format!("startup.cameras: {}", e))),
            (StartupMode::Idle, _) => Ok(DisplayMode::Idle),
        }
    }
}

/// Logging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load and validate configuration.
    ///
    /// An explicit `path` must exist; otherwise [`DEFAULT_CONFIG_FILE`] is
    /// read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Toml).required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Parse and validate a TOML document (no file or environment layers)
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let app: AppConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.canvas.width == 0 || self.canvas.height == 0 {
            return invalid(format!(
                "canvas must be non-empty, got {}x{}",
                self.canvas.width, self.canvas.height
            ));
        }
        for (key, camera) in &self.cameras {
            if camera.width == 0 || camera.height == 0 || camera.fps == 0 {
                return invalid(format!(
                    "cameras.{}: {}x{} @ {} fps",
                    key, camera.width, camera.height, camera.fps
                ));
            }
        }
        if self.session.target_fps == 0 {
            return invalid("session.target_fps must be at least 1".to_string());
        }
        if self.session.failure_threshold == 0 {
            return invalid("session.failure_threshold must be at least 1".to_string());
        }

        let mut channels = Vec::new();
        for fan in &self.fans.channels {
            if fan.channel >= fan_control::PWM_CHANNELS {
                return invalid(format!("fans.channels: channel {} is out of range", fan.channel));
            }
            if channels.contains(&fan.channel) {
                return invalid(format!("fans.channels: channel {} listed twice", fan.channel));
            }
            channels.push(fan.channel);
        }

        self.keymap()?;
        self.input
            .touch
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("input.touch: {}", e)))?;
        self.startup.display_mode()?;
        self.api.addr()?;
        Ok(())
    }

    /// Hotkeys for the configured fan channels on top of the camera keys
    pub fn keymap(&self) -> Result<Keymap, ConfigError> {
        self.fans
            .channels
            .iter()
            .try_fold(Keymap::default(), |keymap, fan| {
                keymap.with_fan_keys(fan.channel, &fan.keys, fan.scale.levels())
            })
            .map_err(|e| ConfigError::Invalid(format!("fans.channels: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fan_control::DutyScale;
    use input::Command;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.canvas, Canvas::new(1024, 600));
        assert_eq!(config.cameras.len(), 3);
        assert_eq!(
            config.startup.display_mode().unwrap(),
            DisplayMode::Multiview(CameraKey::One, CameraKey::Two)
        );
        assert_eq!(config.fans.pca9685.frequency_hz, 250);
        assert_eq!(config.api.addr().unwrap(), Some(SocketAddr::from(([0, 0, 0, 0], 8080))));
    }

    #[test]
    fn test_toml_overrides() {
        let config = AppConfig::from_toml(
            r#"
            [canvas]
            width = 800
            height = 480

            [cameras.1]
            device = "synthetic:front"

            [cameras.3]
            device = "/dev/video4"
            width = 1280
            height = 720

            [startup]
            mode = "single"
            cameras = [3]

            [[fans.channels]]
            channel = 0
            scale = "three_step"
            keys = "zxcv"

            [[fans.channels]]
            channel = 1
            keys = "asdfgh"
            "#,
        )
        .unwrap();

        assert_eq!(config.canvas, Canvas::new(800, 480));
        assert_eq!(config.cameras.len(), 2);
        assert!(config.cameras[&CameraKey::One].is_synthetic());
        assert_eq!(config.cameras[&CameraKey::One].width, 640);
        assert_eq!(config.cameras[&CameraKey::Three].height, 720);
        assert_eq!(config.startup.display_mode().unwrap(), DisplayMode::Single(CameraKey::Three));
        assert_eq!(config.fans.channels[0].scale, DutyScale::ThreeStep);

        let keymap = config.keymap().unwrap();
        assert_eq!(keymap.lookup('c'), Some(Command::SetFan { channel: 0, percent: 66 }));
        assert_eq!(keymap.lookup('h'), Some(Command::SetFan { channel: 1, percent: 100 }));
    }

    #[test]
    fn test_validation_errors() {
        let bad = [
            "[canvas]\nwidth = 0\nheight = 600",
            "[startup]\nmode = \"multiview\"\ncameras = [2, 2]",
            "[startup]\nmode = \"single\"\ncameras = [1, 2]",
            "[[fans.channels]]\nchannel = 16",
            "[[fans.channels]]\nchannel = 0\nkeys = \"a\"\n[[fans.channels]]\nchannel = 0\nkeys = \"b\"",
            "[[fans.channels]]\nchannel = 0\nkeys = \"a2\"",
            "[session]\ntarget_fps = 0",
            "[input.touch]\nx_min = 100\nx_max = 100",
            "[api]\nbind = \"dashboard:80\"",
        ];
        for toml in bad {
            assert!(
                matches!(AppConfig::from_toml(toml), Err(ConfigError::Invalid(_))),
                "accepted: {}",
                toml
            );
        }

        assert!(matches!(
            AppConfig::from_toml("[cameras.4]\ndevice = \"/dev/video9\""),
            Err(ConfigError::Load(_))
        ));
    }
}
