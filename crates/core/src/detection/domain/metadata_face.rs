use crate::shared::face_region::FaceRegion;

/// A face bounding box in the capture device's metadata space.
///
/// Coordinates are normalized to the unit square with the origin at the top
/// left of the unmirrored sensor image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetadataFace {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl MetadataFace {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Maps metadata-space boxes into frame-pixel space.
///
/// Supplied by the capture source, which alone knows the sensor orientation
/// and output resolution. Returns `None` for boxes it cannot map.
pub trait OutputRectTransform {
    fn to_output_rect(&self, face: &MetadataFace) -> Option<FaceRegion>;
}

/// Scales normalized boxes to a fixed frame size, optionally flipping them
/// horizontally.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedRectTransform {
    pub frame_width: u32,
    pub frame_height: u32,
    pub mirrored: bool,
}

impl NormalizedRectTransform {
    pub fn new(frame_width: u32, frame_height: u32) -> Self {
        Self {
            frame_width,
            frame_height,
            mirrored: false,
        }
    }

    pub fn mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }
}

impl OutputRectTransform for NormalizedRectTransform {
    fn to_output_rect(&self, face: &MetadataFace) -> Option<FaceRegion> {
        let values = [face.x, face.y, face.width, face.height];
        if values.iter().any(|v| !v.is_finite()) || face.width < 0.0 || face.height < 0.0 {
            return None;
        }
        let x = if self.mirrored {
            1.0 - face.x - face.width
        } else {
            face.x
        };
        let fw = self.frame_width as f64;
        let fh = self.frame_height as f64;
        Some(FaceRegion::new(
            x * fw,
            face.y * fh,
            face.width * fw,
            face.height * fh,
        ))
    }
}
