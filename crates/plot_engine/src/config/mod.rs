//! Configuration system

pub use serde::{Deserialize, Serialize};

use crate::render::api::Color;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Renderer settings loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Lock presentation to the display refresh (FIFO). When false, the
    /// lowest-latency mode the surface supports is used instead.
    pub vsync: bool,
    /// Background clear color as linear RGBA.
    pub clear_color: [f32; 4],
    /// Quiescent interval for resize debouncing, in milliseconds.
    pub resize_debounce_ms: u64,
    /// Directory holding compiled SPIR-V shaders.
    pub shader_dir: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            clear_color: [0.10, 0.10, 0.12, 1.0],
            resize_debounce_ms: 50,
            shader_dir: "shaders/compiled".to_string(),
        }
    }
}

impl Config for RendererConfig {}

impl RendererConfig {
    pub fn clear_color(&self) -> Color {
        Color::rgba(
            self.clear_color[0],
            self.clear_color[1],
            self.clear_color[2],
            self.clear_color[3],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_vsync_with_50ms_debounce() {
        let config = RendererConfig::default();
        assert!(config.vsync);
        assert_eq!(config.resize_debounce_ms, 50);
    }

    #[test]
    fn toml_round_trip_preserves_fields() {
        let mut config = RendererConfig::default();
        config.vsync = false;
        config.resize_debounce_ms = 75;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: RendererConfig = toml::from_str(&text).unwrap();
        assert!(!parsed.vsync);
        assert_eq!(parsed.resize_debounce_ms, 75);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: RendererConfig = toml::from_str("vsync = false\n").unwrap();
        assert!(!parsed.vsync);
        assert_eq!(parsed.resize_debounce_ms, 50);
    }
}
