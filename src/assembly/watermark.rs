//! Logo watermark overlay.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::WatermarkConfig;

/// Distance in pixels between the logo and the frame edges.
pub const MARGIN_PX: u32 = 20;

/// Where the logo sits in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

impl WatermarkPosition {
    /// `x:y` expression for the overlay filter.
    pub fn overlay_xy(&self) -> String {
        let m = MARGIN_PX;
        match self {
            WatermarkPosition::TopLeft => format!("{m}:{m}"),
            WatermarkPosition::TopRight => format!("main_w-overlay_w-{m}:{m}"),
            WatermarkPosition::BottomLeft => format!("{m}:main_h-overlay_h-{m}"),
            WatermarkPosition::BottomRight => {
                format!("main_w-overlay_w-{m}:main_h-overlay_h-{m}")
            }
            WatermarkPosition::Center => "(main_w-overlay_w)/2:(main_h-overlay_h)/2".to_string(),
        }
    }
}

impl std::fmt::Display for WatermarkPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WatermarkPosition::TopLeft => "top-left",
            WatermarkPosition::TopRight => "top-right",
            WatermarkPosition::BottomLeft => "bottom-left",
            WatermarkPosition::BottomRight => "bottom-right",
            WatermarkPosition::Center => "center",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for WatermarkPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "top-left" => Ok(WatermarkPosition::TopLeft),
            "top-right" => Ok(WatermarkPosition::TopRight),
            "bottom-left" => Ok(WatermarkPosition::BottomLeft),
            "bottom-right" => Ok(WatermarkPosition::BottomRight),
            "center" | "centre" => Ok(WatermarkPosition::Center),
            other => Err(format!("unknown watermark position '{}'", other)),
        }
    }
}

/// A configured logo overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSettings {
    pub logo: PathBuf,
    pub position: WatermarkPosition,
    /// Logo opacity, 0.0 to 1.0.
    pub opacity: f64,
    /// Logo width as a fraction of the video width.
    pub scale: f64,
}

impl WatermarkSettings {
    pub fn new(logo: impl Into<PathBuf>) -> Self {
        let defaults = WatermarkConfig::default();
        Self {
            logo: logo.into(),
            position: WatermarkPosition::default(),
            opacity: defaults.opacity,
            scale: defaults.scale,
        }
    }

    /// Settings from config, or `None` when no logo is configured.
    pub fn from_config(config: &WatermarkConfig) -> Result<Option<Self>, String> {
        let Some(logo) = config.logo.clone() else {
            return Ok(None);
        };
        let settings = Self {
            logo,
            position: config.position.parse()?,
            opacity: config.opacity,
            scale: config.scale,
        };
        settings.validate()?;
        Ok(Some(settings))
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(format!("opacity must be within 0..1, got {}", self.opacity));
        }
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(format!("scale must be within (0, 1], got {}", self.scale));
        }
        Ok(())
    }

    /// Logo width in pixels for a video `video_width` wide. Even, at least 2.
    pub fn logo_width(&self, video_width: u32) -> u32 {
        let width = (video_width as f64 * self.scale).round() as u32;
        (width / 2 * 2).max(2)
    }

    /// `-filter_complex` graph with the video as input 0 and the logo as
    /// input 1, producing `[vout]`.
    pub fn filter(&self, video_width: u32) -> String {
        format!(
            "[1:v]scale={}:-1,format=rgba,colorchannelmixer=aa={:.2}[logo];\
             [0:v][logo]overlay={}:format=auto,format=yuv420p[vout]",
            self.logo_width(video_width),
            self.opacity,
            self.position.overlay_xy()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_use_margin() {
        assert_eq!(WatermarkPosition::TopLeft.overlay_xy(), "20:20");
        assert_eq!(
            WatermarkPosition::BottomRight.overlay_xy(),
            "main_w-overlay_w-20:main_h-overlay_h-20"
        );
        assert_eq!(
            WatermarkPosition::Center.overlay_xy(),
            "(main_w-overlay_w)/2:(main_h-overlay_h)/2"
        );
    }

    #[test]
    fn test_parse_positions() {
        assert_eq!("top-right".parse(), Ok(WatermarkPosition::TopRight));
        assert_eq!("Bottom_Left".parse(), Ok(WatermarkPosition::BottomLeft));
        assert!("middle".parse::<WatermarkPosition>().is_err());
        assert_eq!(WatermarkPosition::BottomRight.to_string(), "bottom-right");
    }

    #[test]
    fn test_filter_scales_and_fades_logo() {
        let settings = WatermarkSettings {
            position: WatermarkPosition::TopRight,
            ..WatermarkSettings::new("/brand/logo.png")
        };
        assert_eq!(
            settings.filter(1280),
            "[1:v]scale=154:-1,format=rgba,colorchannelmixer=aa=0.70[logo];\
             [0:v][logo]overlay=main_w-overlay_w-20:20:format=auto,format=yuv420p[vout]"
        );
    }

    #[test]
    fn test_logo_width_is_even() {
        let settings = WatermarkSettings::new("logo.png");
        assert_eq!(settings.logo_width(720), 86);
        let tiny = WatermarkSettings {
            scale: 0.001,
            ..settings
        };
        assert_eq!(tiny.logo_width(720), 2);
    }

    #[test]
    fn test_from_config() {
        assert_eq!(WatermarkSettings::from_config(&WatermarkConfig::default()), Ok(None));

        let config = WatermarkConfig {
            logo: Some(PathBuf::from("logo.png")),
            position: "center".to_string(),
            ..WatermarkConfig::default()
        };
        let settings = WatermarkSettings::from_config(&config).unwrap().unwrap();
        assert_eq!(settings.position, WatermarkPosition::Center);

        let bad = WatermarkConfig {
            opacity: 1.5,
            ..config
        };
        assert!(WatermarkSettings::from_config(&bad).is_err());
    }
}
