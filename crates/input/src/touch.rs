//! Touch overlay hit-testing
//!
//! Bottom-left button bar: a Camera button toggles a menu row above it with
//! Cam1, Cam2, Cam3 and Multi. The menu closes after [`HIDE_AFTER`] without
//! a touch.

use std::time::{Duration, Instant};

use camera_capture::CameraKey;
use display_session::DisplayMode;
use tracing::debug;

use crate::Command;

/// Menu auto-close delay
pub const HIDE_AFTER: Duration = Duration::from_secs(5);

/// Inclusive rectangle in canvas pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl Region {
    pub fn contains(&self, x: i64, y: i64) -> bool {
        (self.x1..=self.x2).contains(&x) && (self.y1..=self.y2).contains(&y)
    }
}

/// Overlay buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Camera,
    Cam(CameraKey),
    Multi,
}

/// Overlay state for one touchscreen
#[derive(Debug)]
pub struct TouchOverlay {
    camera: Region,
    cams: [(CameraKey, Region); 3],
    multi: Region,
    menu_open: bool,
    selecting: bool,
    last_touch: Instant,
    hide_after: Duration,
}

impl TouchOverlay {
    /// Overlay laid out for a canvas `height` pixels tall
    pub fn new(height: u32) -> Self {
        let h = i64::from(height);
        let menu_row = |x1: i64| Region {
            x1,
            y1: h - 190,
            x2: x1 + 100,
            y2: h - 110,
        };
        Self {
            camera: Region {
                x1: 10,
                y1: h - 90,
                x2: 110,
                y2: h - 10,
            },
            cams: [
                (CameraKey::One, menu_row(10)),
                (CameraKey::Two, menu_row(120)),
                (CameraKey::Three, menu_row(230)),
            ],
            multi: menu_row(340),
            menu_open: false,
            selecting: false,
            last_touch: Instant::now(),
            hide_after: HIDE_AFTER,
        }
    }

    pub fn with_hide_after(mut self, hide_after: Duration) -> Self {
        self.hide_after = hide_after;
        self
    }

    pub fn is_menu_open(&self) -> bool {
        self.menu_open
    }

    /// Button under a point; menu buttons only count while the menu is open
    pub fn hit(&self, x: i64, y: i64) -> Option<Button> {
        if self.camera.contains(x, y) {
            return Some(Button::Camera);
        }
        if !self.menu_open {
            return None;
        }
        if let Some((key, _)) = self.cams.iter().find(|(_, r)| r.contains(x, y)) {
            return Some(Button::Cam(*key));
        }
        self.multi.contains(x, y).then_some(Button::Multi)
    }

    /// Follow the controller's mode (selection highlight)
    pub fn sync(&mut self, mode: DisplayMode) {
        self.selecting = mode.is_selecting();
    }

    /// Handle a tap; returns the command to dispatch, if any
    pub fn tap(&mut self, x: i64, y: i64, now: Instant) -> Option<Command> {
        self.last_touch = now;
        let button = self.hit(x, y)?;
        debug!(?button, x, y, "Overlay tap");

        match button {
            Button::Camera => {
                self.menu_open = !self.menu_open;
                None
            }
            Button::Multi => {
                self.selecting = true;
                Some(Command::BeginMultiviewSelection)
            }
            Button::Cam(key) => {
                // Stay open while picking the second multiview camera
                if !self.selecting {
                    self.menu_open = false;
                }
                Some(Command::ShowCamera(key))
            }
        }
    }

    /// Close the menu once it has been idle long enough. Returns whether it
    /// closed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.menu_open && now.saturating_duration_since(self.last_touch) >= self.hide_after {
            self.menu_open = false;
            debug!("Overlay menu hidden");
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: i64 = 600;

    fn overlay() -> TouchOverlay {
        TouchOverlay::new(600)
    }

    #[test]
    fn test_camera_button_toggles_menu() {
        let mut overlay = overlay();
        let now = Instant::now();
        assert_eq!(overlay.tap(60, H - 50, now), None);
        assert!(overlay.is_menu_open());
        assert_eq!(overlay.tap(10, H - 10, now), None);
        assert!(!overlay.is_menu_open());
    }

    #[test]
    fn test_menu_buttons_need_open_menu() {
        let mut overlay = overlay();
        let now = Instant::now();
        assert_eq!(overlay.tap(150, H - 150, now), None);

        overlay.tap(60, H - 50, now);
        assert_eq!(overlay.tap(150, H - 150, now), Some(Command::ShowCamera(CameraKey::Two)));
        // Single camera pick closes the menu
        assert!(!overlay.is_menu_open());
    }

    #[test]
    fn test_multiview_picks_keep_menu_open() {
        let mut overlay = overlay();
        let now = Instant::now();
        overlay.tap(60, H - 50, now);

        assert_eq!(overlay.tap(390, H - 150, now), Some(Command::BeginMultiviewSelection));
        assert_eq!(overlay.tap(330, H - 110, now), Some(Command::ShowCamera(CameraKey::Three)));
        assert!(overlay.is_menu_open());

        // Controller completed the selection
        overlay.sync(DisplayMode::Multiview(CameraKey::Three, CameraKey::One));
        assert_eq!(overlay.tap(10, H - 190, now), Some(Command::ShowCamera(CameraKey::One)));
        assert!(!overlay.is_menu_open());
    }

    #[test]
    fn test_gaps_between_buttons_miss() {
        let mut overlay = overlay();
        overlay.tap(60, H - 50, Instant::now());
        assert_eq!(overlay.hit(115, H - 150), None);
        assert_eq!(overlay.hit(60, H - 100), None);
        assert_eq!(overlay.hit(500, H - 150), None);
    }

    #[test]
    fn test_menu_hides_after_timeout() {
        let mut overlay = overlay().with_hide_after(Duration::from_millis(100));
        let start = Instant::now();
        overlay.tap(60, H - 50, start);

        assert!(!overlay.tick(start + Duration::from_millis(50)));
        assert!(overlay.is_menu_open());
        assert!(overlay.tick(start + Duration::from_millis(100)));
        assert!(!overlay.is_menu_open());
        assert!(!overlay.tick(start + Duration::from_millis(200)));
    }
}
