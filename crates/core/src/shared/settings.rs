use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::effects::domain::effect_variant::EffectVariant;
use crate::rendering::infrastructure::renderer_factory::RendererPreference;

use super::constants::{
    DEFAULT_CONTAINER_EXTENSION, DEFAULT_VIDEO_BIT_RATE, PIXELLATE_CELL_SIZE, SETTINGS_DIR_NAME,
    SETTINGS_FILE_NAME,
};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// User-tunable pipeline configuration, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub initial_effect: EffectVariant,
    pub mirrored: bool,
    /// Where recordings are written. `None` means the OS temp directory.
    pub recording_dir: Option<PathBuf>,
    pub renderer: RendererPreference,
    pub video_bit_rate: usize,
    pub container_extension: String,
    pub pixellate_cell_size: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            initial_effect: EffectVariant::FaceTrackingPixellate,
            mirrored: true,
            recording_dir: None,
            renderer: RendererPreference::Auto,
            video_bit_rate: DEFAULT_VIDEO_BIT_RATE,
            container_extension: DEFAULT_CONTAINER_EXTENSION.to_string(),
            pixellate_cell_size: PIXELLATE_CELL_SIZE,
        }
    }
}

impl PipelineSettings {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    /// Loads the user's settings, falling back to defaults when absent or invalid.
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(json) = serde_json::to_string_pretty(self) {
                let _ = fs::write(path, json);
            }
        }
    }

    pub fn recording_dir(&self) -> PathBuf {
        self.recording_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.initial_effect, EffectVariant::FaceTrackingPixellate);
        assert!(settings.mirrored);
        assert_eq!(settings.container_extension, "mp4");
        assert_eq!(settings.pixellate_cell_size, 50.0);
        assert_eq!(settings.recording_dir(), std::env::temp_dir());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "initial_effect": "grayscale", "mirrored": false }"#).unwrap();

        let settings = PipelineSettings::load_from(&path).unwrap();
        assert_eq!(settings.initial_effect, EffectVariant::Grayscale);
        assert!(!settings.mirrored);
        assert_eq!(settings.renderer, RendererPreference::Auto);
        assert_eq!(settings.video_bit_rate, DEFAULT_VIDEO_BIT_RATE);
    }

    #[test]
    fn test_roundtrip_through_json() {
        let settings = PipelineSettings {
            recording_dir: Some(PathBuf::from("/tmp/recordings")),
            renderer: RendererPreference::Cpu,
            ..PipelineSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: PipelineSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_load_from_missing_file_is_read_error() {
        let result = PipelineSettings::load_from(Path::new("/nonexistent/settings.json"));
        assert!(matches!(result, Err(SettingsError::Read { .. })));
    }

    #[test]
    fn test_load_from_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let result = PipelineSettings::load_from(&path);
        assert!(matches!(result, Err(SettingsError::Parse { .. })));
    }
}
