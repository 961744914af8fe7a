//! Scaling and placement math

use serde::{Deserialize, Serialize};

/// Output surface size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Canvas {
    fn default() -> Self {
        // 7" Pi dashboard panel
        Self::new(1024, 600)
    }
}

/// Where a letterboxed frame lands on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// Scaled size and crop window for a fill-cropped pane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropGeometry {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub crop_x: u32,
    pub crop_y: u32,
}

/// Largest aspect-preserving size that fits the canvas, centered.
///
/// scale = min(canvas_w / w, canvas_h / h)
pub fn letterbox(width: u32, height: u32, canvas: Canvas) -> Placement {
    if width == 0 || height == 0 || canvas.width == 0 || canvas.height == 0 {
        return Placement { width: 0, height: 0, x: 0, y: 0 };
    }

    let scale = (canvas.width as f64 / width as f64).min(canvas.height as f64 / height as f64);
    let scaled_width = scale_dim(width, scale).min(canvas.width);
    let scaled_height = scale_dim(height, scale).min(canvas.height);

    Placement {
        width: scaled_width,
        height: scaled_height,
        x: (canvas.width - scaled_width) / 2,
        y: (canvas.height - scaled_height) / 2,
    }
}

/// Scale to cover the pane, then center-crop to exactly the pane size.
///
/// scale = max(pane_w / w, pane_h / h)
pub fn fill_crop(width: u32, height: u32, pane_width: u32, pane_height: u32) -> CropGeometry {
    if width == 0 || height == 0 {
        return CropGeometry {
            scaled_width: pane_width,
            scaled_height: pane_height,
            crop_x: 0,
            crop_y: 0,
        };
    }

    let scale = (pane_width as f64 / width as f64).max(pane_height as f64 / height as f64);
    let scaled_width = scale_dim(width, scale).max(pane_width);
    let scaled_height = scale_dim(height, scale).max(pane_height);

    CropGeometry {
        scaled_width,
        scaled_height,
        crop_x: (scaled_width - pane_width) / 2,
        crop_y: (scaled_height - pane_height) / 2,
    }
}

fn scale_dim(dim: u32, scale: f64) -> u32 {
    ((dim as f64 * scale).round() as u32).max(1)
}
