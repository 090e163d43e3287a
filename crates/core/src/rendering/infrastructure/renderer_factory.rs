use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rendering::domain::image_renderer::ImageRenderer;

use super::cpu_image_renderer::CpuImageRenderer;
use super::gpu_context::GpuContext;
use super::gpu_image_renderer::GpuImageRenderer;

/// Render backend preference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererPreference {
    /// GPU when an adapter is available, otherwise CPU.
    #[default]
    Auto,
    Gpu,
    Cpu,
}

impl fmt::Display for RendererPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RendererPreference::Auto => "auto",
            RendererPreference::Gpu => "gpu",
            RendererPreference::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

impl FromStr for RendererPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(RendererPreference::Auto),
            "gpu" => Ok(RendererPreference::Gpu),
            "cpu" => Ok(RendererPreference::Cpu),
            other => Err(format!("unknown renderer '{other}' (expected auto, gpu or cpu)")),
        }
    }
}

/// Creates the image renderer for `preference`.
///
/// Probes for a wgpu adapter unless the CPU backend is requested, and falls
/// back to the CPU renderer when none is found. Logs which backend is selected.
pub fn create_renderer(preference: RendererPreference) -> Arc<dyn ImageRenderer> {
    if preference == RendererPreference::Cpu {
        log::info!("Using CPU renderer (requested)");
        return Arc::new(CpuImageRenderer::new());
    }

    match GpuContext::new() {
        Some(ctx) => {
            log::info!("Using GPU renderer");
            Arc::new(GpuImageRenderer::new(Arc::new(ctx)))
        }
        None => {
            if preference == RendererPreference::Gpu {
                log::warn!("GPU renderer requested but no adapter is available; using CPU");
            } else {
                log::info!("No GPU available, using CPU renderer");
            }
            Arc::new(CpuImageRenderer::new())
        }
    }
}

/// Returns true if a GPU adapter is available for rendering.
pub fn gpu_available() -> bool {
    GpuContext::new().is_some()
}
