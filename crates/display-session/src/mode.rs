//! Display modes

use std::fmt;

use camera_capture::CameraKey;
use serde::Serialize;

use crate::ControllerError;

/// What the dashboard is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// One camera fullscreen, letterboxed
    Single(CameraKey),
    /// Two cameras side by side; the first is the left pane
    Multiview(CameraKey, CameraKey),
    /// Waiting for the user to pick two cameras
    SelectingMultiview { selection: Option<CameraKey> },
    /// Nothing displayed
    Idle,
}

impl DisplayMode {
    /// Build a multiview mode from an ordered key list
    pub fn multiview(keys: &[CameraKey]) -> Result<Self, ControllerError> {
        match keys {
            [left, right] if left != right => Ok(DisplayMode::Multiview(*left, *right)),
            [left, right] => Err(ControllerError::InvalidSelection(format!(
                "camera {} selected twice ({} and {})",
                left, left, right
            ))),
            other => Err(ControllerError::InvalidSelection(format!(
                "multiview needs exactly 2 cameras, got {}",
                other.len()
            ))),
        }
    }

    /// Session layout backing this mode, if it needs one
    pub fn layout(self) -> Option<SessionLayout> {
        match self {
            DisplayMode::Single(key) => Some(SessionLayout::Single(key)),
            DisplayMode::Multiview(left, right) => Some(SessionLayout::Multiview(left, right)),
            DisplayMode::SelectingMultiview { .. } | DisplayMode::Idle => None,
        }
    }

    pub fn is_selecting(self) -> bool {
        matches!(self, DisplayMode::SelectingMultiview { .. })
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::Single(key) => write!(f, "single({})", key),
            DisplayMode::Multiview(left, right) => write!(f, "multiview({},{})", left, right),
            DisplayMode::SelectingMultiview { selection: Some(key) } => {
                write!(f, "selecting({})", key)
            }
            DisplayMode::SelectingMultiview { selection: None } => f.write_str("selecting()"),
            DisplayMode::Idle => f.write_str("idle"),
        }
    }
}

/// Camera arrangement of a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLayout {
    Single(CameraKey),
    Multiview(CameraKey, CameraKey),
}

impl SessionLayout {
    /// Cameras in pane order
    pub fn keys(self) -> Vec<CameraKey> {
        match self {
            SessionLayout::Single(key) => vec![key],
            SessionLayout::Multiview(left, right) => vec![left, right],
        }
    }

    /// Display mode this layout shows
    pub fn mode(self) -> DisplayMode {
        match self {
            SessionLayout::Single(key) => DisplayMode::Single(key),
            SessionLayout::Multiview(left, right) => DisplayMode::Multiview(left, right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiview_validation() {
        let mode = DisplayMode::multiview(&[CameraKey::Three, CameraKey::One]).unwrap();
        assert_eq!(mode, DisplayMode::Multiview(CameraKey::Three, CameraKey::One));

        assert!(matches!(
            DisplayMode::multiview(&[CameraKey::Two, CameraKey::Two]),
            Err(ControllerError::InvalidSelection(_))
        ));
        assert!(DisplayMode::multiview(&[CameraKey::One]).is_err());
        assert!(DisplayMode::multiview(&CameraKey::ALL).is_err());
    }

    #[test]
    fn test_layout_keys_keep_order() {
        let layout = DisplayMode::Multiview(CameraKey::Two, CameraKey::One).layout().unwrap();
        assert_eq!(layout.keys(), vec![CameraKey::Two, CameraKey::One]);
        assert_eq!(layout.mode(), DisplayMode::Multiview(CameraKey::Two, CameraKey::One));
        assert_eq!(DisplayMode::Idle.layout(), None);
    }

    #[test]
    fn test_mode_serialization() {
        let json = serde_json::to_value(DisplayMode::Multiview(CameraKey::One, CameraKey::Two)).unwrap();
        assert_eq!(json, serde_json::json!({ "multiview": [1, 2] }));

        let json = serde_json::to_value(DisplayMode::SelectingMultiview { selection: None }).unwrap();
        assert_eq!(json, serde_json::json!({ "selecting_multiview": { "selection": null } }));

        assert_eq!(serde_json::to_value(DisplayMode::Idle).unwrap(), serde_json::json!("idle"));
    }

    #[test]
    fn test_display() {
        assert_eq!(DisplayMode::Single(CameraKey::Three).to_string(), "single(3)");
        assert_eq!(
            DisplayMode::SelectingMultiview { selection: Some(CameraKey::Two) }.to_string(),
            "selecting(2)"
        );
    }
}
