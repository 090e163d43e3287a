use ndarray::ArrayView3;

use crate::effects::domain::render_command::{EffectImage, Geometry, Kernel, Vertex};
use crate::rendering::domain::image_renderer::{
    validate_commands, ImageRenderer, RenderError, RenderOutput,
};
use crate::shared::constants::LUMINANCE_WEIGHTS;
use crate::shared::frame::Frame;

/// Reference rasterizer for effect command lists.
///
/// Samples with nearest filtering at pixel centers, the same way the GPU
/// backend's sampler does, so both backends agree on pixellate cells.
pub struct CpuImageRenderer;

impl CpuImageRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpuImageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pixel span covered by an axis-aligned quad, plus its texture mapping.
struct Span {
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
    u: [f32; 2],
    v: [f32; 2],
}

impl Span {
    fn of(vertices: &[Vertex; 4], width: u32, height: u32) -> Self {
        let [bl, br, tl, _] = vertices;
        let (w, h) = (width as f32, height as f32);
        // Clip space to pixel space; +y is down in pixel space.
        let left = (bl.position[0] + 1.0) / 2.0 * w;
        let right = (br.position[0] + 1.0) / 2.0 * w;
        let top = (1.0 - tl.position[1]) / 2.0 * h;
        let bottom = (1.0 - bl.position[1]) / 2.0 * h;
        Self {
            x0: first_center_at_or_after(left, width),
            x1: first_center_at_or_after(right, width),
            y0: first_center_at_or_after(top, height),
            y1: first_center_at_or_after(bottom, height),
            left,
            right,
            top,
            bottom,
            u: [bl.tex_coord[0], br.tex_coord[0]],
            v: [tl.tex_coord[1], bl.tex_coord[1]],
        }
    }

    fn tex_coord(&self, px: usize, py: usize) -> (f32, f32) {
        let tx = (px as f32 + 0.5 - self.left) / (self.right - self.left);
        let ty = (py as f32 + 0.5 - self.top) / (self.bottom - self.top);
        (
            self.u[0] + tx * (self.u[1] - self.u[0]),
            self.v[0] + ty * (self.v[1] - self.v[0]),
        )
    }
}

fn first_center_at_or_after(edge: f32, limit: u32) -> usize {
    (edge - 0.5).ceil().clamp(0.0, limit as f32) as usize
}

fn check_axis_aligned(vertices: &[Vertex; 4]) -> Result<(), RenderError> {
    let [bl, br, tl, tr] = vertices;
    let aligned = bl.position[0] == tl.position[0]
        && br.position[0] == tr.position[0]
        && bl.position[1] == br.position[1]
        && tl.position[1] == tr.position[1];
    if !aligned {
        return Err(RenderError::InvalidGeometry(
            "quad is not axis-aligned".into(),
        ));
    }
    if br.position[0] < bl.position[0] || tl.position[1] < bl.position[1] {
        return Err(RenderError::InvalidGeometry("quad is inverted".into()));
    }
    Ok(())
}

fn sample(src: &ArrayView3<'_, u8>, x: f32, y: f32, out: &mut [u8]) {
    let (h, w, _) = src.dim();
    let sx = (x.floor().max(0.0) as usize).min(w - 1);
    let sy = (y.floor().max(0.0) as usize).min(h - 1);
    for (c, value) in out.iter_mut().enumerate() {
        *value = src[[sy, sx, c]];
    }
}

fn desaturate(pixel: &mut [u8], amount: f32) {
    let rgb = [pixel[0] as f32, pixel[1] as f32, pixel[2] as f32];
    let luma: f32 = rgb
        .iter()
        .zip(LUMINANCE_WEIGHTS.iter())
        .map(|(c, w)| c * w)
        .sum();
    for (value, c) in pixel.iter_mut().zip(rgb) {
        *value = (luma + amount * (c - luma)).round().clamp(0.0, 255.0) as u8;
    }
}

fn mirror_rows(data: &mut [u8], width: usize, channels: usize) {
    if width == 0 {
        return;
    }
    for row in data.chunks_exact_mut(width * channels) {
        for x in 0..width / 2 {
            let (a, b) = (x * channels, (width - 1 - x) * channels);
            for c in 0..channels {
                row.swap(a + c, b + c);
            }
        }
    }
}

impl ImageRenderer for CpuImageRenderer {
    fn render(&self, image: &EffectImage) -> Result<RenderOutput, RenderError> {
        let source = image.source();
        let channels = source.channels();
        if channels != 3 && channels != 4 {
            return Err(RenderError::UnsupportedFormat { channels });
        }
        validate_commands(image)?;

        if image.is_identity() {
            return Ok(RenderOutput::from_frame(source.clone()));
        }

        let (width, height) = (source.width(), source.height());
        let c = channels as usize;
        let src = source.as_ndarray();
        let mut out = vec![0u8; source.data().len()];

        for command in image.commands() {
            let vertices = command.geometry.vertices();
            if let Geometry::Quad(quad) = &command.geometry {
                check_axis_aligned(quad)?;
            }
            let span = Span::of(&vertices, width, height);

            for py in span.y0..span.y1 {
                for px in span.x0..span.x1 {
                    let (u, v) = span.tex_coord(px, py);
                    let (mut sx, mut sy) = (u * width as f32, v * height as f32);
                    if let Kernel::Pixellate { cell_size } = command.kernel {
                        sx = sx - sx.rem_euclid(cell_size[0]) + cell_size[0] / 2.0;
                        sy = sy - sy.rem_euclid(cell_size[1]) + cell_size[1] / 2.0;
                    }
                    let offset = (py * width as usize + px) * c;
                    let pixel = &mut out[offset..offset + c];
                    sample(&src, sx, sy, pixel);
                    if let Kernel::Saturation { amount } = command.kernel {
                        desaturate(pixel, amount);
                    }
                }
            }
        }

        if image.is_mirrored() {
            mirror_rows(&mut out, width as usize, c);
        }

        Ok(RenderOutput::from_frame(Frame::new(
            out,
            width,
            height,
            channels,
            source.pts(),
        )))
    }

    fn backend_name(&self) -> &'static str {
        "cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::domain::effect_variant::{EffectParams, EffectVariant};
    use crate::effects::domain::render_command::{face_quad, RenderCommand};
    use crate::shared::face_region::FaceRegion;
    use rstest::rstest;
    use std::time::Duration;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> Frame {
        let data = rgb.repeat((w * h) as usize);
        Frame::new(data, w, h, 3, Duration::from_millis(40))
    }

    /// Each pixel's red channel encodes x, green encodes y.
    fn gradient(w: u32, h: u32) -> Frame {
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[x as u8, y as u8, 0]);
            }
        }
        Frame::new(data, w, h, 3, Duration::ZERO)
    }

    fn apply(variant: EffectVariant, frame: &Frame, regions: &[FaceRegion]) -> Frame {
        let image = variant.filter(EffectParams::default())(frame, regions);
        CpuImageRenderer::new().render(&image).unwrap().frame
    }

    #[test]
    fn test_none_returns_same_pixels() {
        let frame = gradient(20, 10);
        let out = apply(EffectVariant::None, &frame, &[]);
        assert_eq!(out.width(), 20);
        assert_eq!(out.height(), 10);
        assert_eq!(out.data(), frame.data());
        assert_eq!(out.pts(), frame.pts());
    }

    #[test]
    fn test_explicit_passthrough_draw_is_exact() {
        let frame = gradient(33, 17);
        let image = EffectImage::new(
            frame.clone(),
            vec![RenderCommand::passthrough(), RenderCommand::passthrough()],
        );
        let out = CpuImageRenderer::new().render(&image).unwrap().frame;
        assert_eq!(out.data(), frame.data());
    }

    #[rstest]
    #[case([200, 50, 50])]
    #[case([0, 255, 0])]
    #[case([12, 34, 56])]
    fn test_grayscale_equalizes_channels(#[case] rgb: [u8; 3]) {
        let out = apply(EffectVariant::Grayscale, &solid(4, 4, rgb), &[]);
        for px in out.data().chunks(3) {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
        }
    }

    #[test]
    fn test_grayscale_uses_luminance_weights() {
        let out = apply(EffectVariant::Grayscale, &solid(2, 2, [200, 50, 50]), &[]);
        // 0.2125*200 + 0.7154*50 + 0.0721*50 = 81.875
        assert_eq!(out.pixel(0, 0), &[82, 82, 82]);
    }

    #[test]
    fn test_grayscale_keeps_alpha() {
        let frame = Frame::new([200, 50, 50, 77].repeat(4), 2, 2, 4, Duration::ZERO);
        let out = apply(EffectVariant::Grayscale, &frame, &[]);
        assert_eq!(out.pixel(1, 1)[3], 77);
    }

    #[test]
    fn test_pixellate_without_regions_equals_source() {
        let frame = gradient(64, 48);
        let out = apply(EffectVariant::FaceTrackingPixellate, &frame, &[]);
        assert_eq!(out.data(), frame.data());
    }

    #[test]
    fn test_pixellate_samples_cell_centers() {
        let frame = gradient(100, 100);
        let region = FaceRegion::new(0.0, 0.0, 100.0, 100.0);
        let out = apply(EffectVariant::FaceTrackingPixellate, &frame, &[region]);
        assert_eq!(out.pixel(10, 10), &[25, 25, 0]);
        assert_eq!(out.pixel(49, 0), &[25, 25, 0]);
        assert_eq!(out.pixel(50, 0), &[75, 25, 0]);
        assert_eq!(out.pixel(99, 99), &[75, 75, 0]);
    }

    #[test]
    fn test_pixellate_only_touches_region() {
        let frame = gradient(100, 100);
        let region = FaceRegion::new(20.0, 20.0, 40.0, 40.0);
        let out = apply(EffectVariant::FaceTrackingPixellate, &frame, &[region]);

        assert_eq!(out.pixel(19, 30), frame.pixel(19, 30));
        assert_eq!(out.pixel(60, 30), frame.pixel(60, 30));
        assert_eq!(out.pixel(30, 19), frame.pixel(30, 19));
        assert_eq!(out.pixel(30, 60), frame.pixel(30, 60));
        // Cells are anchored at the source origin.
        assert_eq!(out.pixel(20, 20), &[25, 25, 0]);
        assert_eq!(out.pixel(55, 55), &[75, 75, 0]);
    }

    #[test]
    fn test_region_outside_frame_is_clipped() {
        let frame = gradient(60, 60);
        let region = FaceRegion::new(-30.0, -30.0, 60.0, 60.0);
        let out = apply(EffectVariant::FaceTrackingPixellate, &frame, &[region]);
        // The visible corner still snaps to the first cell's center.
        assert_eq!(out.pixel(0, 0), &[25, 25, 0]);
        assert_eq!(out.pixel(29, 29), &[25, 25, 0]);
        assert_eq!(out.pixel(40, 40), frame.pixel(40, 40));
    }

    #[test]
    fn test_later_regions_draw_over_earlier() {
        let frame = gradient(100, 100);
        let quad = face_quad(&FaceRegion::new(0.0, 0.0, 100.0, 100.0), 100, 100).unwrap();
        let image = EffectImage::new(
            frame.clone(),
            vec![
                RenderCommand::passthrough(),
                RenderCommand {
                    kernel: Kernel::Pixellate {
                        cell_size: [50.0, 50.0],
                    },
                    geometry: Geometry::Quad(quad),
                },
                RenderCommand {
                    kernel: Kernel::Passthrough,
                    geometry: Geometry::Quad(quad),
                },
            ],
        );
        let out = CpuImageRenderer::new().render(&image).unwrap().frame;
        assert_eq!(out.data(), frame.data());
    }

    #[test]
    fn test_mirrored_flips_rows() {
        let frame = gradient(8, 2);
        let image = EffectImage::identity(frame.clone()).mirrored(true);
        let out = CpuImageRenderer::new().render(&image).unwrap().frame;
        assert_eq!(out.pixel(0, 0), frame.pixel(7, 0));
        assert_eq!(out.pixel(7, 1), frame.pixel(0, 1));
    }

    #[test]
    fn test_mirror_twice_is_identity() {
        let frame = gradient(9, 3);
        let renderer = CpuImageRenderer::new();
        let once = renderer
            .render(&EffectImage::identity(frame.clone()).mirrored(true))
            .unwrap()
            .frame;
        let twice = renderer
            .render(&EffectImage::identity(once).mirrored(true))
            .unwrap()
            .frame;
        assert_eq!(twice.data(), frame.data());
    }

    #[test]
    fn test_identity_shares_pixels() {
        let frame = gradient(4, 4);
        let out = CpuImageRenderer::new()
            .render(&EffectImage::identity(frame.clone()))
            .unwrap();
        assert!(out.frame.shares_pixels_with(&frame));
    }

    #[test]
    fn test_unsupported_channels_rejected() {
        let frame = Frame::new(vec![0; 4], 2, 2, 1, Duration::ZERO);
        let result = CpuImageRenderer::new().render(&EffectImage::identity(frame));
        assert!(matches!(
            result,
            Err(RenderError::UnsupportedFormat { channels: 1 })
        ));
    }

    #[test]
    fn test_non_finite_geometry_rejected() {
        let mut quad = face_quad(&FaceRegion::new(0.0, 0.0, 5.0, 5.0), 10, 10).unwrap();
        quad[0].position[0] = f32::NAN;
        let image = EffectImage::new(
            gradient(10, 10),
            vec![RenderCommand {
                kernel: Kernel::Passthrough,
                geometry: Geometry::Quad(quad),
            }],
        );
        let result = CpuImageRenderer::new().render(&image);
        assert!(matches!(result, Err(RenderError::InvalidGeometry(_))));
    }

    #[test]
    fn test_skewed_quad_rejected() {
        let mut quad = face_quad(&FaceRegion::new(0.0, 0.0, 5.0, 5.0), 10, 10).unwrap();
        quad[3].position[0] += 0.1;
        let image = EffectImage::new(
            gradient(10, 10),
            vec![RenderCommand {
                kernel: Kernel::Passthrough,
                geometry: Geometry::Quad(quad),
            }],
        );
        let result = CpuImageRenderer::new().render(&image);
        assert!(matches!(result, Err(RenderError::InvalidGeometry(_))));
    }
}
