//! Configuration file handling for reelsmith.
//!
//! Loads configuration from `<config dir>/reelsmith/config.toml` or a custom
//! path. Every section is optional; missing keys fall back to defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::provider::retry::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_MAX_ATTEMPTS};
use crate::provider::PollPolicy;

/// Configuration file structure for reelsmith.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub kling: KlingConfig,
    #[serde(default)]
    pub runway: RunwayConfig,
    #[serde(default)]
    pub concat: ConcatConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory under which project directories are created.
    pub root: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("projects"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            backoff_max_ms: DEFAULT_BACKOFF_MAX.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            interval_ms: policy.interval.as_millis() as u64,
            max_polls: policy.max_polls,
        }
    }
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.interval_ms),
            max_polls: self.max_polls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KlingConfig {
    pub base_url: String,
    pub model: String,
    /// `std` or `pro`.
    pub mode: String,
    /// Segment bounds; must lie within the 5 to 10 second range the API
    /// accepts.
    pub min_secs: f64,
    pub max_secs: f64,
    /// Continue later segments with `video-extend` from the previous video
    /// instead of animating its last frame.
    pub extend: bool,
}

impl Default for KlingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-singapore.klingai.com".to_string(),
            model: "kling-v1".to_string(),
            mode: "std".to_string(),
            min_secs: 5.0,
            max_secs: 10.0,
            extend: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunwayConfig {
    pub base_url: String,
    pub model: String,
    /// Length of every generated clip; the API accepts 5 or 10.
    pub clip_secs: u32,
    pub ratio: String,
}

impl Default for RunwayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.dev.runwayml.com".to_string(),
            model: "gen4_turbo".to_string(),
            clip_secs: 5,
            ratio: "720:1280".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcatConfig {
    pub crossfade_secs: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: u32,
}

impl Default for ConcatConfig {
    fn default() -> Self {
        Self {
            crossfade_secs: 0.5,
            width: None,
            height: None,
            fps: 24,
        }
    }
}

impl ConcatConfig {
    /// Explicit output resolution, if both dimensions are configured.
    pub fn target(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Font used for the intro title; ffmpeg's default font when unset.
    pub font_file: Option<PathBuf>,
    /// Titles longer than this many characters are wrapped.
    pub title_wrap_chars: usize,
    /// Font size divisor relative to frame height.
    pub title_font_ratio: f64,
    /// `netflix`, `youtube` or `minimal`.
    pub subtitle_style: String,
    pub watermark: WatermarkConfig,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            font_file: None,
            title_wrap_chars: 16,
            title_font_ratio: 12.0,
            subtitle_style: "netflix".to_string(),
            watermark: WatermarkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// Logo image; no watermark is applied when unset.
    pub logo: Option<PathBuf>,
    /// `top-left`, `top-right`, `bottom-left`, `bottom-right` or `center`.
    pub position: String,
    pub opacity: f64,
    /// Logo width as a fraction of the video width.
    pub scale: f64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            logo: None,
            position: "top-left".to_string(),
            opacity: 0.7,
            scale: 0.12,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// Returns default config if the default file doesn't exist. An
    /// explicitly requested path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(explicit) => Self::load_file(explicit),
            None => {
                let path = default_path();
                if path.exists() {
                    Self::load_file(&path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("reelsmith").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".reelsmith.toml"))
}
