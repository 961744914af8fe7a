//! Video frame types and decoding

use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};

use crate::CameraError;

/// Pixel format delivered by a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Mjpeg,
    Yuyv,
}

impl PixelFormat {
    /// V4L2 fourcc code for this format
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::Yuyv => *b"YUYV",
        }
    }

    /// Format for a V4L2 fourcc code, if supported
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }
}

/// Decoded RGB video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3), top-left origin
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the Unix epoch)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Solid black frame (the placeholder pane)
    pub fn black(width: u32, height: u32) -> Self {
        Self::solid(width, height, [0, 0, 0])
    }

    /// Frame filled with a single color
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, 0, 0)
    }

    /// Take ownership of an `image` RGB buffer
    pub fn from_image(image: RgbImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, timestamp_ns, sequence)
    }

    /// Borrow the pixel data as an image view.
    ///
    /// Returns `None` for empty frames or when the buffer is shorter than
    /// `width * height * 3`.
    pub fn as_image(&self) -> Option<ImageBuffer<Rgb<u8>, &[u8]>> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
    }

    /// Expected buffer length for the frame dimensions
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.data
            .get(idx..idx + 3)
            .map(|p| [p[0], p[1], p[2]])
    }

    /// Crop a region of the frame
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Option<VideoFrame> {
        if x + w > self.width || y + h > self.height || self.data.len() < self.expected_len() {
            return None;
        }

        let mut cropped = Vec::with_capacity(w as usize * h as usize * 3);
        for row in y..(y + h) {
            let start = (row as usize * self.width as usize + x as usize) * 3;
            let end = start + w as usize * 3;
            cropped.extend_from_slice(&self.data[start..end]);
        }

        Some(VideoFrame {
            data: cropped,
            width: w,
            height: h,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        })
    }

    /// True when every pixel in the region is black
    pub fn region_is_black(&self, x: u32, y: u32, w: u32, h: u32) -> bool {
        self.crop(x, y, w, h)
            .map(|region| region.data.iter().all(|&b| b == 0))
            .unwrap_or(false)
    }
}

/// Decode MJPEG frame to RGB
pub fn decode_mjpeg(mjpeg_data: &[u8]) -> Result<VideoFrame, CameraError> {
    let img = image::load_from_memory_with_format(mjpeg_data, ImageFormat::Jpeg)
        .map_err(|e| CameraError::Decode(e.to_string()))?;
    Ok(VideoFrame::from_image(img.to_rgb8(), 0, 0))
}

/// Convert packed YUYV 4:2:2 to RGB
pub fn decode_yuyv(data: &[u8], width: u32, height: u32) -> Result<VideoFrame, CameraError> {
    let expected = width as usize * height as usize * 2;
    if data.len() < expected || width % 2 != 0 {
        return Err(CameraError::Decode(format!(
            "YUYV buffer of {} bytes does not match {}x{}",
            data.len(),
            width,
            height
        )));
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }

    Ok(VideoFrame::new(rgb, width, height, 0, 0))
}

// BT.601 limited range
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_frame() {
        let frame = VideoFrame::black(4, 2);
        assert_eq!(frame.data.len(), 24);
        assert!(frame.region_is_black(0, 0, 4, 2));
    }

    #[test]
    fn test_crop_and_pixel() {
        let mut frame = VideoFrame::black(4, 4);
        let idx = (2 * 4 + 3) * 3;
        frame.data[idx..idx + 3].copy_from_slice(&[10, 20, 30]);

        assert_eq!(frame.get_pixel(3, 2), Some([10, 20, 30]));
        assert_eq!(frame.get_pixel(4, 0), None);

        let cropped = frame.crop(2, 2, 2, 2).unwrap();
        assert_eq!(cropped.get_pixel(1, 0), Some([10, 20, 30]));
        assert!(frame.crop(3, 3, 2, 2).is_none());
    }

    #[test]
    fn test_short_buffer_has_no_image_view() {
        let frame = VideoFrame::new(vec![0; 5], 2, 2, 0, 0);
        assert!(frame.as_image().is_none());
        assert!(VideoFrame::black(0, 0).as_image().is_none());
    }

    #[test]
    fn test_yuyv_gray_decodes_to_gray() {
        // Y=126, U=V=128 is mid gray
        let data = [126u8, 128, 126, 128];
        let frame = decode_yuyv(&data, 2, 1).unwrap();
        let px = frame.get_pixel(0, 0).unwrap();
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
        assert!(decode_yuyv(&data, 4, 1).is_err());
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(b"H264"), None);
        assert_eq!(&PixelFormat::Yuyv.fourcc(), b"YUYV");
    }
}
