/// Fraction of the box width (height) added on each horizontal (vertical) side.
pub const REGION_PADDING: f64 = 0.25;

/// An axis-aligned face rectangle in frame-pixel coordinates.
///
/// Padded regions may extend past the frame edges; use [`FaceRegion::clamped`]
/// where pixel access needs in-bounds geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A rectangle normalized by frame dimensions (0..1 covers the frame).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceRegion {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Grows the box by a quarter of its size on every side, keeping the center.
    pub fn padded(&self) -> Self {
        let dx = self.width * REGION_PADDING;
        let dy = self.height * REGION_PADDING;
        Self {
            x: self.x - dx,
            y: self.y - dy,
            width: self.width + 2.0 * dx,
            height: self.height + 2.0 * dy,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Intersection with the frame, or `None` when nothing remains visible.
    pub fn clamped(&self, frame_w: u32, frame_h: u32) -> Option<Self> {
        let x1 = self.x.max(0.0);
        let y1 = self.y.max(0.0);
        let x2 = (self.x + self.width).min(frame_w as f64);
        let y2 = (self.y + self.height).min(frame_h as f64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self::new(x1, y1, x2 - x1, y2 - y1))
    }

    pub fn normalized(&self, frame_w: u32, frame_h: u32) -> NormalizedRect {
        let fw = frame_w.max(1) as f64;
        let fh = frame_h.max(1) as f64;
        NormalizedRect {
            x: (self.x / fw) as f32,
            y: (self.y / fh) as f32,
            width: (self.width / fw) as f32,
            height: (self.height / fh) as f32,
        }
    }
}
