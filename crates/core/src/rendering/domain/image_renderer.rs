use thiserror::Error;

use crate::effects::domain::render_command::{EffectImage, Kernel};
use crate::shared::frame::Frame;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("unsupported pixel format: {channels} channel(s)")]
    UnsupportedFormat { channels: u8 },
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("GPU error: {0}")]
    Gpu(String),
}

/// The most recent rendered frame, ready for display.
#[derive(Clone, Debug)]
pub struct PreviewImage {
    frame: Frame,
}

impl PreviewImage {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    /// Converts to an RGBA bitmap for display or export.
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        let (w, h) = (self.frame.width(), self.frame.height());
        match self.frame.channels() {
            4 => image::RgbaImage::from_raw(w, h, self.frame.data().to_vec()),
            3 => image::RgbImage::from_raw(w, h, self.frame.data().to_vec())
                .map(|rgb| image::DynamicImage::ImageRgb8(rgb).to_rgba8()),
            _ => None,
        }
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
        let image = self
            .to_rgba_image()
            .ok_or("preview has an unsupported pixel layout")?;
        image.save(path)?;
        Ok(())
    }
}

/// Result of one render: a pixel buffer for the recorder and a preview.
///
/// Both views share the same pixel storage.
#[derive(Clone, Debug)]
pub struct RenderOutput {
    pub frame: Frame,
    pub preview: PreviewImage,
}

impl RenderOutput {
    pub fn from_frame(frame: Frame) -> Self {
        Self {
            preview: PreviewImage::new(frame.clone()),
            frame,
        }
    }
}

/// Rejects empty frames and non-finite vertices before any backend work.
pub fn validate_commands(image: &EffectImage) -> Result<(), RenderError> {
    let source = image.source();
    if source.width() == 0 || source.height() == 0 {
        return Err(RenderError::InvalidGeometry(format!(
            "empty frame {}x{}",
            source.width(),
            source.height()
        )));
    }
    for (index, command) in image.commands().iter().enumerate() {
        let finite = command.geometry.vertices().iter().all(|v| {
            v.position
                .iter()
                .chain(v.tex_coord.iter())
                .all(|c| c.is_finite())
        });
        if !finite {
            return Err(RenderError::InvalidGeometry(format!(
                "command {index} has non-finite vertices"
            )));
        }
        if let Kernel::Pixellate { cell_size } = command.kernel {
            if cell_size.iter().any(|c| !c.is_finite() || *c <= 0.0) {
                return Err(RenderError::InvalidGeometry(format!(
                    "command {index} has cell size {cell_size:?}"
                )));
            }
        }
    }
    Ok(())
}

/// Executes an [`EffectImage`]'s commands against a render backend.
///
/// Output keeps the source dimensions, channel count and timestamp.
pub trait ImageRenderer: Send + Sync {
    fn render(&self, image: &EffectImage) -> Result<RenderOutput, RenderError>;

    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_output_shares_pixels_with_preview() {
        let frame = Frame::new(vec![1; 12], 2, 2, 3, Duration::ZERO);
        let output = RenderOutput::from_frame(frame);
        assert!(output.frame.shares_pixels_with(output.preview.frame()));
    }

    #[test]
    fn test_rgb_preview_converts_to_rgba() {
        let frame = Frame::new(vec![200, 50, 50, 0, 0, 0], 2, 1, 3, Duration::ZERO);
        let image = PreviewImage::new(frame).to_rgba_image().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [200, 50, 50, 255]);
        assert_eq!(image.dimensions(), (2, 1));
    }

    #[test]
    fn test_preview_save_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let frame = Frame::new(vec![128; 4 * 4 * 4], 4, 4, 4, Duration::ZERO);
        PreviewImage::new(frame).save(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_validate_rejects_empty_frame() {
        let image = EffectImage::identity(Frame::new(Vec::new(), 0, 0, 3, Duration::ZERO));
        assert!(matches!(
            validate_commands(&image),
            Err(RenderError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_cell() {
        use crate::effects::domain::render_command::{Geometry, RenderCommand};
        let image = EffectImage::new(
            Frame::new(vec![0; 12], 2, 2, 3, Duration::ZERO),
            vec![RenderCommand {
                kernel: Kernel::Pixellate {
                    cell_size: [0.0, 50.0],
                },
                geometry: Geometry::FullViewport,
            }],
        );
        assert!(validate_commands(&image).is_err());
    }

    #[test]
    fn test_unsupported_layout_has_no_bitmap() {
        let frame = Frame::new(vec![0; 4], 2, 2, 1, Duration::ZERO);
        assert!(PreviewImage::new(frame).to_rgba_image().is_none());
    }
}
