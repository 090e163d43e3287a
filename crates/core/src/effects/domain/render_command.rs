use crate::shared::face_region::FaceRegion;
use crate::shared::frame::Frame;

/// Fragment operation applied while drawing a command's geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Kernel {
    /// Copies the source sample unchanged.
    Passthrough,
    /// Mixes each sample with its luminance; 0 is grayscale, 1 is unchanged.
    Saturation { amount: f32 },
    /// Samples the center of the enclosing cell; `cell_size` is in source pixels.
    Pixellate { cell_size: [f32; 2] },
}

/// Clip-space position plus the source texture coordinate drawn there.
///
/// Texture coordinates have their origin at the top-left of the source.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self {
            position: [x, y],
            tex_coord: [u, v],
        }
    }
}

/// Full-viewport quad as a triangle strip.
pub const FULL_VIEWPORT: [Vertex; 4] = [
    Vertex::new(-1.0, -1.0, 0.0, 1.0),
    Vertex::new(1.0, -1.0, 1.0, 1.0),
    Vertex::new(-1.0, 1.0, 0.0, 0.0),
    Vertex::new(1.0, 1.0, 1.0, 0.0),
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Geometry {
    FullViewport,
    /// Triangle strip: bottom-left, bottom-right, top-left, top-right.
    Quad([Vertex; 4]),
}

impl Geometry {
    pub fn vertices(&self) -> [Vertex; 4] {
        match self {
            Geometry::FullViewport => FULL_VIEWPORT,
            Geometry::Quad(vertices) => *vertices,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderCommand {
    pub kernel: Kernel,
    pub geometry: Geometry,
}

impl RenderCommand {
    pub fn passthrough() -> Self {
        Self {
            kernel: Kernel::Passthrough,
            geometry: Geometry::FullViewport,
        }
    }
}

/// Builds the quad covering `region` in a `frame_w` x `frame_h` frame.
///
/// Clip space has +y up, so the region's top edge maps to the larger clip y.
/// Each vertex samples the source at the same normalized location it
/// occupies, so the quad covers exactly the region's pixels. Returns `None`
/// for empty regions.
pub fn face_quad(region: &FaceRegion, frame_w: u32, frame_h: u32) -> Option<[Vertex; 4]> {
    if region.is_empty() || frame_w == 0 || frame_h == 0 {
        return None;
    }
    let n = region.normalized(frame_w, frame_h);
    let left = n.x * 2.0 - 1.0;
    let right = (n.x + n.width) * 2.0 - 1.0;
    let bottom = (1.0 - n.y - n.height) * 2.0 - 1.0;
    let top = (1.0 - n.y) * 2.0 - 1.0;
    Some([
        Vertex::new(left, bottom, n.x, n.y + n.height),
        Vertex::new(right, bottom, n.x + n.width, n.y + n.height),
        Vertex::new(left, top, n.x, n.y),
        Vertex::new(right, top, n.x + n.width, n.y),
    ])
}

/// A deferred image: a source frame and the ordered commands that composite it.
///
/// Nothing is rasterized until an image renderer executes the commands.
/// Later commands draw over earlier ones.
#[derive(Clone, Debug)]
pub struct EffectImage {
    source: Frame,
    commands: Vec<RenderCommand>,
    mirrored: bool,
}

impl EffectImage {
    pub fn new(source: Frame, commands: Vec<RenderCommand>) -> Self {
        Self {
            source,
            commands,
            mirrored: false,
        }
    }

    pub fn identity(source: Frame) -> Self {
        Self::new(source, vec![RenderCommand::passthrough()])
    }

    pub fn source(&self) -> &Frame {
        &self.source
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    /// Flips the composited result horizontally when `mirrored` is set.
    pub fn mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }

    /// True when rendering would reproduce the source pixels unchanged.
    pub fn is_identity(&self) -> bool {
        !self.mirrored
            && self
                .commands
                .iter()
                .all(|c| c.kernel == Kernel::Passthrough)
            && self
                .commands
                .first()
                .is_some_and(|c| c.geometry == Geometry::FullViewport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn frame(w: u32, h: u32) -> Frame {
        Frame::new(vec![0; (w * h * 3) as usize], w, h, 3, Duration::ZERO)
    }

    #[test]
    fn test_full_frame_region_matches_viewport() {
        let quad = face_quad(&FaceRegion::new(0.0, 0.0, 640.0, 480.0), 640, 480).unwrap();
        assert_eq!(quad, FULL_VIEWPORT);
    }

    #[test]
    fn test_quad_flips_vertically() {
        // Top-left quarter of the frame.
        let quad = face_quad(&FaceRegion::new(0.0, 0.0, 50.0, 50.0), 100, 100).unwrap();
        let [bl, br, tl, tr] = quad;
        assert_relative_eq!(bl.position[0], -1.0);
        assert_relative_eq!(bl.position[1], 0.0);
        assert_relative_eq!(br.position[0], 0.0);
        assert_relative_eq!(tl.position[1], 1.0);
        assert_relative_eq!(tr.position[0], 0.0);
        assert_relative_eq!(tl.tex_coord[1], 0.0);
        assert_relative_eq!(bl.tex_coord[1], 0.5);
    }

    #[test]
    fn test_tex_coords_match_positions() {
        let quad = face_quad(&FaceRegion::new(20.0, 30.0, 40.0, 10.0), 200, 100).unwrap();
        for v in quad {
            assert_relative_eq!(v.tex_coord[0], (v.position[0] + 1.0) / 2.0, epsilon = 1e-6);
            assert_relative_eq!(v.tex_coord[1], (1.0 - v.position[1]) / 2.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_empty_region_has_no_quad() {
        assert!(face_quad(&FaceRegion::new(10.0, 10.0, 0.0, 5.0), 100, 100).is_none());
    }

    #[test]
    fn test_identity_image() {
        let image = EffectImage::identity(frame(4, 4));
        assert!(image.is_identity());
        assert!(!image.clone().mirrored(true).is_identity());
    }

    #[test]
    fn test_saturation_is_not_identity() {
        let image = EffectImage::new(
            frame(4, 4),
            vec![RenderCommand {
                kernel: Kernel::Saturation { amount: 0.0 },
                geometry: Geometry::FullViewport,
            }],
        );
        assert!(!image.is_identity());
    }
}
