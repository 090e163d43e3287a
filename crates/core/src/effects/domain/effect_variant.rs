use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::shared::constants::PIXELLATE_CELL_SIZE;
use crate::shared::face_region::FaceRegion;
use crate::shared::frame::Frame;

use super::render_command::{face_quad, EffectImage, Geometry, Kernel, RenderCommand};

/// A pure per-frame transform from a source frame and face regions to a
/// deferred image.
pub type Filter = Arc<dyn Fn(&Frame, &[FaceRegion]) -> EffectImage + Send + Sync>;

/// Tunables shared by the effect variants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectParams {
    pub pixellate_cell_size: f32,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            pixellate_cell_size: PIXELLATE_CELL_SIZE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectVariant {
    None,
    Grayscale,
    FaceTrackingPixellate,
}

impl EffectVariant {
    pub const ALL: [EffectVariant; 3] = [
        EffectVariant::FaceTrackingPixellate,
        EffectVariant::Grayscale,
        EffectVariant::None,
    ];

    /// Whether the capture source must emit face-detection events for this
    /// effect to have any visible result.
    pub fn requires_face_detection(self) -> bool {
        matches!(self, EffectVariant::FaceTrackingPixellate)
    }

    pub fn label(self) -> &'static str {
        match self {
            EffectVariant::None => "No Filter",
            EffectVariant::Grayscale => "Gray",
            EffectVariant::FaceTrackingPixellate => "Face",
        }
    }

    pub fn filter(self, params: EffectParams) -> Filter {
        match self {
            EffectVariant::None => Arc::new(|frame: &Frame, _: &[FaceRegion]| {
                EffectImage::identity(frame.clone())
            }),
            EffectVariant::Grayscale => Arc::new(grayscale),
            EffectVariant::FaceTrackingPixellate => {
                let cell = params.pixellate_cell_size.max(1.0);
                Arc::new(move |frame: &Frame, regions: &[FaceRegion]| {
                    pixellate_faces(frame, regions, cell)
                })
            }
        }
    }
}

impl fmt::Display for EffectVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EffectVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "no_filter" | "no-filter" => Ok(EffectVariant::None),
            "grayscale" | "gray" | "grey" => Ok(EffectVariant::Grayscale),
            "face_tracking_pixellate" | "face-tracking-pixellate" | "face" | "pixellate" => {
                Ok(EffectVariant::FaceTrackingPixellate)
            }
            other => Err(format!("unknown effect '{other}'")),
        }
    }
}

fn grayscale(frame: &Frame, _regions: &[FaceRegion]) -> EffectImage {
    EffectImage::new(
        frame.clone(),
        vec![RenderCommand {
            kernel: Kernel::Saturation { amount: 0.0 },
            geometry: Geometry::FullViewport,
        }],
    )
}

/// Base passthrough over the whole frame, then one pixellate quad per region.
fn pixellate_faces(frame: &Frame, regions: &[FaceRegion], cell: f32) -> EffectImage {
    let mut commands = Vec::with_capacity(regions.len() + 1);
    commands.push(RenderCommand::passthrough());
    commands.extend(
        regions
            .iter()
            .filter_map(|r| face_quad(r, frame.width(), frame.height()))
            .map(|quad| RenderCommand {
                kernel: Kernel::Pixellate {
                    cell_size: [cell, cell],
                },
                geometry: Geometry::Quad(quad),
            }),
    );
    EffectImage::new(frame.clone(), commands)
}
