//! Subtitle burn-in.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::media::{arg, escape_filter_path, secs};

/// ASS colour for white text.
const PRIMARY_COLOUR: &str = "&H00FFFFFF";

/// ASS colour for the black outline.
const OUTLINE_COLOUR: &str = "&H00000000";

/// Bottom center, in ASS numpad alignment.
const ALIGNMENT: u8 = 2;

/// Preset subtitle looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleStyle {
    #[default]
    Netflix,
    Youtube,
    Minimal,
}

impl SubtitleStyle {
    pub fn font_name(&self) -> &'static str {
        match self {
            SubtitleStyle::Netflix | SubtitleStyle::Minimal => "Arial",
            SubtitleStyle::Youtube => "Liberation Sans",
        }
    }

    pub fn font_size(&self) -> u32 {
        match self {
            SubtitleStyle::Netflix | SubtitleStyle::Youtube => 12,
            SubtitleStyle::Minimal => 16,
        }
    }

    pub fn outline(&self) -> u32 {
        match self {
            SubtitleStyle::Netflix => 2,
            SubtitleStyle::Youtube | SubtitleStyle::Minimal => 1,
        }
    }

    /// Value for the `force_style` option.
    pub fn force_style(&self) -> String {
        format!(
            "FontName={},FontSize={},PrimaryColour={},OutlineColour={},Outline={},Alignment={},BorderStyle=1",
            self.font_name(),
            self.font_size(),
            PRIMARY_COLOUR,
            OUTLINE_COLOUR,
            self.outline(),
            ALIGNMENT
        )
    }
}

impl std::fmt::Display for SubtitleStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubtitleStyle::Netflix => "netflix",
            SubtitleStyle::Youtube => "youtube",
            SubtitleStyle::Minimal => "minimal",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SubtitleStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "netflix" => Ok(SubtitleStyle::Netflix),
            "youtube" => Ok(SubtitleStyle::Youtube),
            "minimal" => Ok(SubtitleStyle::Minimal),
            other => Err(format!(
                "unknown subtitle style '{}' (expected netflix, youtube or minimal)",
                other
            )),
        }
    }
}

/// Build the `-vf` chain burning `subtitles` into the video.
///
/// Cue times are relative to the narration. When the narration starts
/// `offset_secs` into the video (after an intro) the frames are shifted back
/// before rendering the cues and forward again afterwards.
pub fn subtitle_filter(subtitles: &Path, style: SubtitleStyle, offset_secs: f64) -> String {
    let burn = format!(
        "subtitles={}:force_style='{}'",
        escape_filter_path(&arg(subtitles)),
        style.force_style()
    );
    if offset_secs > 0.0 {
        let offset = secs(offset_secs);
        format!("setpts=PTS-{offset}/TB,{burn},setpts=PTS+{offset}/TB")
    } else {
        burn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(
            SubtitleStyle::Netflix.force_style(),
            "FontName=Arial,FontSize=12,PrimaryColour=&H00FFFFFF,OutlineColour=&H00000000,Outline=2,Alignment=2,BorderStyle=1"
        );
        assert!(SubtitleStyle::Youtube
            .force_style()
            .starts_with("FontName=Liberation Sans,FontSize=12"));
        assert_eq!(SubtitleStyle::Minimal.font_size(), 16);
        assert_eq!(SubtitleStyle::Minimal.outline(), 1);
    }

    #[test]
    fn test_parse_style_names() {
        assert_eq!("netflix".parse::<SubtitleStyle>(), Ok(SubtitleStyle::Netflix));
        assert_eq!(" YouTube ".parse::<SubtitleStyle>(), Ok(SubtitleStyle::Youtube));
        assert!("karaoke".parse::<SubtitleStyle>().is_err());
        assert_eq!(SubtitleStyle::Minimal.to_string(), "minimal");
    }

    #[test]
    fn test_filter_without_offset() {
        let filter = subtitle_filter(Path::new("/p/subs.srt"), SubtitleStyle::Netflix, 0.0);
        assert!(filter.starts_with("subtitles=/p/subs.srt:force_style='FontName=Arial"));
        assert!(!filter.contains("setpts"));
    }

    #[test]
    fn test_filter_shifts_cues_past_intro() {
        let filter = subtitle_filter(Path::new("/p/subs.srt"), SubtitleStyle::Minimal, 4.5);
        assert!(filter.starts_with("setpts=PTS-4.500/TB,subtitles="));
        assert!(filter.ends_with(",setpts=PTS+4.500/TB"));
    }

    #[test]
    fn test_filter_escapes_path() {
        let filter = subtitle_filter(Path::new("/p/a:b.srt"), SubtitleStyle::Netflix, 0.0);
        assert!(filter.starts_with("subtitles=/p/a\\:b.srt:"));
    }
}
