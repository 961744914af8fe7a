//! Frame Compositor
//!
//! Maps one or two camera frames onto the fixed display canvas:
//! - Single view: aspect-preserving fit, centered on black (letterbox)
//! - Multiview: each camera fills half the canvas, center-cropped (no bars)
//!
//! Missing frames become solid black panes of the right size.

mod geometry;

pub use geometry::{fill_crop, letterbox, Canvas, CropGeometry, Placement};

use camera_capture::VideoFrame;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Resampling filter used when scaling camera frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFilter {
    /// Cheapest, blocky on upscale
    Nearest,
    /// Bilinear
    #[default]
    Bilinear,
}

impl From<ScaleFilter> for FilterType {
    fn from(f: ScaleFilter) -> Self {
        match f {
            ScaleFilter::Nearest => FilterType::Nearest,
            ScaleFilter::Bilinear => FilterType::Triangle,
        }
    }
}

/// Composes camera frames onto the display canvas
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    canvas: Canvas,
    filter: ScaleFilter,
}

impl Compositor {
    /// Create a compositor for a canvas size
    pub fn new(canvas: Canvas, filter: ScaleFilter) -> Self {
        Self { canvas, filter }
    }

    /// Target canvas
    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    /// Fit a single frame onto the canvas, letterboxed on black
    pub fn compose_single(&self, frame: Option<&VideoFrame>) -> VideoFrame {
        let mut out = RgbImage::new(self.canvas.width, self.canvas.height);
        let (timestamp_ns, sequence) = stamp(frame);

        if let Some(view) = frame.and_then(VideoFrame::as_image) {
            let placement = letterbox(view.width(), view.height(), self.canvas);
            trace!(?placement, "Letterboxing frame");
            let scaled = imageops::resize(&view, placement.width, placement.height, self.filter.into());
            imageops::replace(&mut out, &scaled, placement.x as i64, placement.y as i64);
        }

        VideoFrame::from_image(out, timestamp_ns, sequence)
    }

    /// Place two frames side by side, each filling half the canvas.
    ///
    /// `left` is the first selected camera. With an odd canvas width the
    /// right pane gets the extra column.
    pub fn compose_multiview(&self, left: Option<&VideoFrame>, right: Option<&VideoFrame>) -> VideoFrame {
        let mut out = RgbImage::new(self.canvas.width, self.canvas.height);
        let left_width = self.canvas.width / 2;
        let right_width = self.canvas.width - left_width;
        let (timestamp_ns, sequence) = stamp(left.or(right));

        self.fill_pane(&mut out, left, 0, left_width);
        self.fill_pane(&mut out, right, left_width, right_width);

        VideoFrame::from_image(out, timestamp_ns, sequence)
    }

    fn fill_pane(&self, out: &mut RgbImage, frame: Option<&VideoFrame>, x: u32, pane_width: u32) {
        let pane_height = self.canvas.height;
        let Some(view) = frame.and_then(VideoFrame::as_image) else {
            // Canvas starts black, nothing to draw
            return;
        };
        if pane_width == 0 || pane_height == 0 {
            return;
        }

        let crop = fill_crop(view.width(), view.height(), pane_width, pane_height);
        trace!(?crop, x, "Filling pane");
        let scaled = imageops::resize(&view, crop.scaled_width, crop.scaled_height, self.filter.into());
        let pane = imageops::crop_imm(&scaled, crop.crop_x, crop.crop_y, pane_width, pane_height).to_image();
        imageops::replace(out, &pane, x as i64, 0);
    }
}

fn stamp(frame: Option<&VideoFrame>) -> (u64, u32) {
    frame.map(|f| (f.timestamp_ns, f.sequence)).unwrap_or((0, 0))
}
