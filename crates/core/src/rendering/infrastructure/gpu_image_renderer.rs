use std::sync::Arc;

use crate::effects::domain::render_command::EffectImage;
use crate::rendering::domain::image_renderer::{
    validate_commands, ImageRenderer, RenderError, RenderOutput,
};
use crate::shared::frame::Frame;

use super::gpu_context::GpuContext;

/// Renders effect images with a wgpu render pass.
///
/// The whole command list is drawn in one pass into an RGBA target; the
/// single readback backs both the recorder frame and the preview.
pub struct GpuImageRenderer {
    ctx: Arc<GpuContext>,
}

impl GpuImageRenderer {
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self { ctx }
    }
}

fn to_rgba(frame: &Frame) -> Vec<u8> {
    match frame.channels() {
        4 => frame.data().to_vec(),
        _ => frame
            .data()
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
    }
}

fn strip_alpha(rgba: Vec<u8>) -> Vec<u8> {
    rgba.chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect()
}

impl ImageRenderer for GpuImageRenderer {
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
        let limit = self.ctx.max_texture_dimension();
        if width > limit || height > limit {
            return Err(RenderError::InvalidGeometry(format!(
                "{width}x{height} exceeds the {limit}px texture limit"
            )));
        }

        let rgba = self.ctx.render_commands(
            &to_rgba(source),
            width,
            height,
            image.commands(),
            image.is_mirrored(),
        )?;
        let pixels = if channels == 3 { strip_alpha(rgba) } else { rgba };

        Ok(RenderOutput::from_frame(Frame::new(
            pixels,
            width,
            height,
            channels,
            source.pts(),
        )))
    }

    fn backend_name(&self) -> &'static str {
        "gpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::domain::effect_variant::{EffectParams, EffectVariant};
    use crate::rendering::infrastructure::cpu_image_renderer::CpuImageRenderer;
    use crate::shared::face_region::FaceRegion;
    use std::time::Duration;

    fn try_gpu_renderer() -> Option<GpuImageRenderer> {
        GpuContext::new().map(|ctx| GpuImageRenderer::new(Arc::new(ctx)))
    }

    fn gradient(w: u32, h: u32) -> Frame {
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[x as u8, y as u8, 128]);
            }
        }
        Frame::new(data, w, h, 3, Duration::from_millis(7))
    }

    #[test]
    fn test_rgba_conversion_roundtrip() {
        let frame = gradient(3, 2);
        assert_eq!(strip_alpha(to_rgba(&frame)), frame.data());
    }

    #[test]
    fn test_identity_skips_gpu() {
        let Some(renderer) = try_gpu_renderer() else {
            return;
        };
        let frame = gradient(16, 16);
        let out = renderer.render(&EffectImage::identity(frame.clone())).unwrap();
        assert!(out.frame.shares_pixels_with(&frame));
    }

    #[test]
    fn test_grayscale_matches_cpu() {
        let Some(renderer) = try_gpu_renderer() else {
            return;
        };
        let frame = gradient(32, 24);
        let image = EffectVariant::Grayscale.filter(EffectParams::default())(&frame, &[]);
        let gpu = renderer.render(&image).unwrap().frame;
        let cpu = CpuImageRenderer::new().render(&image).unwrap().frame;
        for (g, c) in gpu.data().iter().zip(cpu.data()) {
            assert!(g.abs_diff(*c) <= 1, "gpu {g} vs cpu {c}");
        }
        assert_eq!(gpu.pts(), frame.pts());
    }

    #[test]
    fn test_pixellate_matches_cpu() {
        let Some(renderer) = try_gpu_renderer() else {
            return;
        };
        let frame = gradient(120, 100);
        let regions = [FaceRegion::new(10.0, 10.0, 60.0, 60.0)];
        let image =
            EffectVariant::FaceTrackingPixellate.filter(EffectParams::default())(&frame, &regions);
        let gpu = renderer.render(&image).unwrap().frame;
        let cpu = CpuImageRenderer::new().render(&image).unwrap().frame;
        // Interior of the quad, away from rasterization edges. Cell centers
        // fall on texel boundaries, so allow one texel of rounding.
        for y in 15..65 {
            for x in 15..65 {
                for (g, c) in gpu.pixel(x, y).iter().zip(cpu.pixel(x, y)) {
                    assert!(g.abs_diff(*c) <= 1, "at ({x}, {y}): gpu {g} vs cpu {c}");
                }
            }
        }
    }

    #[test]
    fn test_mirrored_flips_horizontally() {
        let Some(renderer) = try_gpu_renderer() else {
            return;
        };
        let frame = gradient(8, 4);
        let out = renderer
            .render(&EffectImage::identity(frame.clone()).mirrored(true))
            .unwrap()
            .frame;
        assert_eq!(out.pixel(0, 0), frame.pixel(7, 0));
        assert_eq!(out.pixel(7, 3), frame.pixel(0, 3));
    }
}
