use std::sync::Arc;
use std::time::Duration;

use ndarray::ArrayView3;

/// A single video frame: packed RGB or RGBA bytes in row-major order.
///
/// Pixel storage is reference-counted, so cloning a frame and handing it to
/// several pipeline stages never copies pixel data. Frames are immutable
/// once produced; stages that change pixels build a new frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    channels: u8,
    pts: Duration,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, pts: Duration) -> Self {
        Self::from_shared(data.into(), width, height, channels, pts)
    }

    pub fn from_shared(
        data: Arc<[u8]>,
        width: u32,
        height: u32,
        channels: u8,
        pts: Duration,
    ) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            pts,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Presentation timestamp assigned by the capture source.
    pub fn pts(&self) -> Duration {
        self.pts
    }

    /// Same pixels, different timestamp. Shares the pixel buffer.
    pub fn with_pts(&self, pts: Duration) -> Self {
        Self { pts, ..self.clone() }
    }

    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels as usize;
        let start = (y as usize * self.width as usize + x as usize) * c;
        &self.data[start..start + c]
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![0u8; 12]; // 2x2x3
        let frame = Frame::new(data.clone(), 2, 2, 3, Duration::from_millis(40));
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.pts(), Duration::from_millis(40));
        assert_eq!(frame.data(), &data[..]);
    }

    #[test]
    fn test_clone_shares_pixels() {
        let frame = Frame::new(vec![100u8; 12], 2, 2, 3, Duration::ZERO);
        let cloned = frame.clone();
        assert!(frame.shares_pixels_with(&cloned));
    }

    #[test]
    fn test_with_pts_keeps_pixels() {
        let frame = Frame::new(vec![7u8; 16], 2, 2, 4, Duration::ZERO);
        let shifted = frame.with_pts(Duration::from_secs(1));
        assert_eq!(shifted.pts(), Duration::from_secs(1));
        assert!(shifted.shares_pixels_with(&frame));
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        let data = vec![0u8; 10]; // wrong size for 2x2x3
        Frame::new(data, 2, 2, 3, Duration::ZERO);
    }

    #[test]
    fn test_as_ndarray_shape() {
        let data = vec![0u8; 24]; // 2x4x3
        let frame = Frame::new(data, 4, 2, 3, Duration::ZERO);
        let arr = frame.as_ndarray();
        assert_eq!(arr.shape(), &[2, 4, 3]); // (height, width, channels)
    }

    #[test]
    fn test_pixel_access() {
        // 2x2 RGB: set pixel (row=1, col=0) to red
        let mut data = vec![0u8; 12];
        data[6] = 255;
        let frame = Frame::new(data, 2, 2, 3, Duration::ZERO);
        assert_eq!(frame.pixel(0, 1), &[255, 0, 0]);
        assert_eq!(frame.as_ndarray()[[1, 0, 0]], 255);
    }
}
