//! Intro title overlay.
//!
//! Titles are stripped of characters that break filter quoting, uppercased
//! and split over two lines when they run long. Each line becomes its own
//! `drawtext` filter, centered horizontally and stacked around the vertical
//! center of the frame.

use std::path::PathBuf;

use crate::media::{arg, escape_drawtext, escape_filter_path, secs};

/// Titles longer than this many characters are wrapped.
pub const DEFAULT_WRAP_CHARS: usize = 16;

/// Default font size divisor relative to frame height.
pub const DEFAULT_FONT_RATIO: f64 = 12.0;

/// Line spacing as a multiple of the font size.
const LINE_SPACING: f64 = 1.2;

/// Characters removed from titles before rendering.
const STRIPPED_CHARS: &[char] = &['\'', '"', ':', ';', '\\'];

/// Look of the rendered title.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleStyle {
    pub font_file: Option<PathBuf>,
    /// Font size is `height / font_ratio`, capped at `width / 16`.
    pub font_ratio: f64,
    pub wrap_chars: usize,
}

impl Default for TitleStyle {
    fn default() -> Self {
        Self {
            font_file: None,
            font_ratio: DEFAULT_FONT_RATIO,
            wrap_chars: DEFAULT_WRAP_CHARS,
        }
    }
}

/// Strip quoting characters, collapse whitespace and uppercase.
pub fn clean_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !STRIPPED_CHARS.contains(c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Split a cleaned title into one or two lines.
///
/// Short titles and single words stay on one line. Otherwise four or more
/// words are split in half (the second line takes the extra word), three
/// words go 2 + 1 and two words get a line each.
pub fn wrap_title(title: &str, wrap_chars: usize) -> Vec<String> {
    let words: Vec<&str> = title.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    if title.chars().count() <= wrap_chars || words.len() == 1 {
        return vec![words.join(" ")];
    }

    let split = match words.len() {
        2 => 1,
        3 => 2,
        n => n / 2,
    };
    vec![words[..split].join(" "), words[split..].join(" ")]
}

/// Font size for a frame of `width` x `height`.
pub fn font_size(width: u32, height: u32, font_ratio: f64) -> u32 {
    let ratio = if font_ratio > 0.0 {
        font_ratio
    } else {
        DEFAULT_FONT_RATIO
    };
    let by_height = (height as f64 / ratio).floor() as u32;
    let by_width = width / 16;
    by_height.min(by_width).max(1)
}

/// Build the `-vf` chain drawing `lines` for the whole of an intro lasting
/// `duration_secs`.
pub fn title_filter(
    lines: &[String],
    width: u32,
    height: u32,
    duration_secs: f64,
    style: &TitleStyle,
) -> String {
    let size = font_size(width, height, style.font_ratio);
    let spacing = size as f64 * LINE_SPACING;
    let middle = (lines.len().saturating_sub(1)) as f64 / 2.0;
    let font = style
        .font_file
        .as_ref()
        .map(|f| format!("fontfile={}:", escape_filter_path(&arg(f))))
        .unwrap_or_default();

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let offset = ((i as f64 - middle) * spacing).round() as i64;
            format!(
                "drawtext={font}text='{text}':fontsize={size}:fontcolor=white:\
                 x=(w-text_w)/2:y=(h-text_h)/2{offset:+}:\
                 shadowcolor=black:shadowx=2:shadowy=2:\
                 enable='between(t,0,{end})'",
                text = escape_drawtext(line),
                end = secs(duration_secs),
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title_strips_and_uppercases() {
        assert_eq!(clean_title("How to: spot a \"scam\";"), "HOW TO SPOT A SCAM");
        assert_eq!(clean_title("  it's   back\\slash "), "ITS BACKSLASH");
    }

    #[test]
    fn test_short_title_stays_on_one_line() {
        assert_eq!(wrap_title("SHORT ONE", 16), vec!["SHORT ONE"]);
        assert_eq!(wrap_title("SUPERCALIFRAGILISTIC", 16), vec!["SUPERCALIFRAGILISTIC"]);
        assert!(wrap_title("", 16).is_empty());
    }

    #[test]
    fn test_two_words_one_per_line() {
        assert_eq!(
            wrap_title("EXTRAORDINARY DISCOVERIES", 16),
            vec!["EXTRAORDINARY", "DISCOVERIES"]
        );
    }

    #[test]
    fn test_three_words_two_then_one() {
        assert_eq!(
            wrap_title("ANCIENT ROMAN ENGINEERING", 16),
            vec!["ANCIENT ROMAN", "ENGINEERING"]
        );
    }

    #[test]
    fn test_four_or_more_words_split_in_half() {
        assert_eq!(
            wrap_title("HOW TO SPOT A SCAM", 16),
            vec!["HOW TO", "SPOT A SCAM"]
        );
        assert_eq!(
            wrap_title("THE RISE AND FALL OF EMPIRES", 16),
            vec!["THE RISE AND", "FALL OF EMPIRES"]
        );
    }

    #[test]
    fn test_font_size_is_capped_by_width() {
        assert_eq!(font_size(1920, 1080, 12.0), 90);
        assert_eq!(font_size(720, 1280, 12.0), 45);
        assert_eq!(font_size(720, 1280, 0.0), 45);
    }

    #[test]
    fn test_filter_draws_each_line_for_full_intro() {
        let lines = vec!["HOW TO".to_string(), "SPOT A SCAM".to_string()];
        let filter = title_filter(&lines, 1920, 1080, 4.5, &TitleStyle::default());
        let parts: Vec<&str> = filter.split(",drawtext=").collect();

        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("drawtext=text='HOW TO':fontsize=90"));
        assert!(parts[0].contains("y=(h-text_h)/2-54"));
        assert!(parts[1].contains("y=(h-text_h)/2+54"));
        assert!(filter.contains("x=(w-text_w)/2"));
        assert!(filter.contains("enable='between(t,0,4.500)'"));
        assert!(filter.contains("shadowcolor=black:shadowx=2:shadowy=2"));
    }

    #[test]
    fn test_filter_includes_font_file() {
        let style = TitleStyle {
            font_file: Some(PathBuf::from("/fonts/Bebas.ttf")),
            ..TitleStyle::default()
        };
        let filter = title_filter(&["TITLE".to_string()], 1280, 720, 3.0, &style);
        assert!(filter.starts_with("drawtext=fontfile=/fonts/Bebas.ttf:text='TITLE'"));
        assert!(filter.contains("y=(h-text_h)/2+0"));
    }
}
