//! Viewer settings.
//!
//! Settings are read from the JSON file named by `GLB_PREVIEW_CONFIG`, or from
//! `glb-preview.json` in the working directory when that file exists. Every field is
//! optional; missing fields fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "GLB_PREVIEW_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "glb-preview.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub window_title: String,
    pub window_size: [u32; 2],
    /// Linear RGBA clear color of the model canvas.
    pub clear_color: [f32; 4],
    pub orbit: OrbitSettings,
    /// Frames without camera motion before an automatic screenshot is taken.
    pub settle_frames: u32,
    pub screenshot_file_name: String,
    pub environment_intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitSettings {
    pub damping: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub fov_y_deg: f32,
    pub initial_eye: [f32; 3],
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            window_title: "GLB Preview".to_string(),
            window_size: [1280, 720],
            clear_color: [1.0, 1.0, 1.0, 1.0],
            orbit: OrbitSettings::default(),
            settle_frames: 20,
            screenshot_file_name: "screenshot.png".to_string(),
            environment_intensity: 1.0,
        }
    }
}

impl Default for OrbitSettings {
    fn default() -> Self {
        Self {
            damping: 0.05,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            min_distance: 0.1,
            max_distance: 500.0,
            fov_y_deg: 75.0,
            initial_eye: [0.0, 0.0, 5.0],
        }
    }
}

impl ViewerConfig {
    /// Resolve the config path from the environment and load it, falling back to defaults.
    pub fn load() -> Self {
        let path = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(value) => Some(PathBuf::from(value)),
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                local.exists().then_some(local)
            }
        };
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load_from_file(&path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(err) => {
                log::warn!("{}; using defaults", err);
                Self::default()
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size[0] == 0 || self.window_size[1] == 0 {
            return Err(ConfigError::Invalid("window_size must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.orbit.damping) {
            return Err(ConfigError::Invalid(format!(
                "orbit.damping must be within [0, 1], got {}",
                self.orbit.damping
            )));
        }
        if self.orbit.min_distance <= 0.0 || self.orbit.min_distance > self.orbit.max_distance {
            return Err(ConfigError::Invalid(format!(
                "orbit distance range {}..{} is empty",
                self.orbit.min_distance, self.orbit.max_distance
            )));
        }
        if !(1.0..179.0).contains(&self.orbit.fov_y_deg) {
            return Err(ConfigError::Invalid(format!(
                "orbit.fov_y_deg out of range: {}",
                self.orbit.fov_y_deg
            )));
        }
        if self.screenshot_file_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "screenshot_file_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
