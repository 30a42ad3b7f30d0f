use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::renderer::postprocess::PostprocessStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPath {
    #[default]
    Forward,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslucentOrder {
    /// Scene order, as submitted by the caller.
    #[default]
    Submission,
    /// Farthest from the camera first.
    BackToFront,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default)]
    pub path: RenderPath,
    #[serde(default = "RenderSettings::default_program_cache_bytes")]
    pub program_cache_bytes: u64,
    #[serde(default = "RenderSettings::default_framebuffer_cache_bytes")]
    pub framebuffer_cache_bytes: u64,
    #[serde(default = "RenderSettings::default_shadow_cache_bytes")]
    pub shadow_cache_bytes: u64,
    /// Frames an unused shadow map survives before it is released.
    #[serde(default = "RenderSettings::default_shadow_retain_periods")]
    pub shadow_retain_periods: u32,
    /// Caps the texture units used below the hardware count.
    #[serde(default)]
    pub max_texture_units: Option<u32>,
    #[serde(default)]
    pub translucent_order: TranslucentOrder,
    #[serde(default = "RenderSettings::default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub postprocess: Vec<PostprocessStep>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            path: RenderPath::default(),
            program_cache_bytes: Self::default_program_cache_bytes(),
            framebuffer_cache_bytes: Self::default_framebuffer_cache_bytes(),
            shadow_cache_bytes: Self::default_shadow_cache_bytes(),
            shadow_retain_periods: Self::default_shadow_retain_periods(),
            max_texture_units: None,
            translucent_order: TranslucentOrder::default(),
            clear_color: Self::default_clear_color(),
            postprocess: Vec::new(),
        }
    }
}

impl RenderSettings {
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    /// Parses settings without falling back to defaults on malformed input.
    pub fn from_json_str(json: &str) -> RenderResult<Self> {
        serde_json::from_str::<RenderSettings>(json)
            .map(Self::validate)
            .map_err(|err| RenderError::Settings(err.to_string()))
    }

    pub fn validate(mut self) -> Self {
        if self.program_cache_bytes == 0 {
            warn!("Program cache capacity must be greater than zero. Using default value.");
            self.program_cache_bytes = Self::default_program_cache_bytes();
        }

        if self.framebuffer_cache_bytes == 0 {
            warn!("Framebuffer cache capacity must be greater than zero. Using default value.");
            self.framebuffer_cache_bytes = Self::default_framebuffer_cache_bytes();
        }

        if self.shadow_cache_bytes == 0 {
            warn!("Shadow cache capacity must be greater than zero. Using default value.");
            self.shadow_cache_bytes = Self::default_shadow_cache_bytes();
        }

        if self.max_texture_units == Some(0) {
            warn!("Texture unit limit must be greater than zero. Using the hardware count.");
            self.max_texture_units = None;
        }

        if self.clear_color.iter().any(|c| !c.is_finite()) {
            warn!("Clear color must be finite. Using default clear color.");
            self.clear_color = Self::default_clear_color();
        }

        self.postprocess = self
            .postprocess
            .into_iter()
            .map(PostprocessStep::validated)
            .collect();

        self
    }

    const fn default_program_cache_bytes() -> u64 {
        // Programs are charged one unit each.
        256
    }

    const fn default_framebuffer_cache_bytes() -> u64 {
        256 * 1024 * 1024
    }

    const fn default_shadow_cache_bytes() -> u64 {
        128 * 1024 * 1024
    }

    const fn default_shadow_retain_periods() -> u32 {
        2
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.0, 0.0, 0.0, 1.0]
    }
}
