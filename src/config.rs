// Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::RecordingCodec;
use crate::thumbnail::{ThumbnailOptions, FRAME_OFFSET, JPEG_QUALITY};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the Lance Certo backend API
    pub api_base_url: String,

    /// Preferred recording codec; the capture pipeline falls back
    /// automatically when the encoder is unavailable
    #[serde(default)]
    pub preferred_codec: RecordingCodec,

    /// Whether the capture pipeline opens a local preview window
    #[serde(default = "default_true")]
    pub show_preview: bool,

    /// Offset in milliseconds into a clip for its thumbnail frame
    #[serde(default = "default_thumbnail_offset_ms")]
    pub thumbnail_offset_ms: u64,

    /// JPEG quality for derived thumbnails (1-100)
    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            preferred_codec: RecordingCodec::default(),
            show_preview: true,
            thumbnail_offset_ms: default_thumbnail_offset_ms(),
            thumbnail_quality: default_thumbnail_quality(),
        }
    }
}

impl Config {
    /// Load config from disk or return default
    pub fn load_or_default() -> Self {
        let config_path = get_config_path();

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = get_config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;

        Ok(())
    }

    /// Thumbnail knobs in the form the deriver takes
    pub fn thumbnail_options(&self) -> ThumbnailOptions {
        ThumbnailOptions {
            frame_offset: Duration::from_millis(self.thumbnail_offset_ms),
            jpeg_quality: self.thumbnail_quality,
        }
    }
}

/// Get the config file path
fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lance-certo")
        .join("config.toml")
}

/// Default true value (for serde)
fn default_true() -> bool {
    true
}

/// Default thumbnail frame offset (for serde)
fn default_thumbnail_offset_ms() -> u64 {
    FRAME_OFFSET.as_millis() as u64
}

/// Default thumbnail JPEG quality (for serde)
fn default_thumbnail_quality() -> u8 {
    JPEG_QUALITY
}
