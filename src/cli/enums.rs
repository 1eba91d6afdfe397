//! CLI enum types for provider, logo position and subtitle style options.

use clap::ValueEnum;

use crate::assembly::{SubtitleStyle, WatermarkPosition};
use crate::provider::ProviderKind;

/// Video generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Provider {
    /// Variable-length clips (5-10s) from one image per call
    #[default]
    Kling,
    /// Fixed-length clips chained from last frames
    Runway,
}

impl From<Provider> for ProviderKind {
    fn from(p: Provider) -> Self {
        match p {
            Provider::Kling => ProviderKind::Kling,
            Provider::Runway => ProviderKind::Runway,
        }
    }
}

/// Logo position on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Position {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

impl From<Position> for WatermarkPosition {
    fn from(p: Position) -> Self {
        match p {
            Position::TopLeft => WatermarkPosition::TopLeft,
            Position::TopRight => WatermarkPosition::TopRight,
            Position::BottomLeft => WatermarkPosition::BottomLeft,
            Position::BottomRight => WatermarkPosition::BottomRight,
            Position::Center => WatermarkPosition::Center,
        }
    }
}

/// Subtitle look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Style {
    Netflix,
    Youtube,
    Minimal,
}

impl From<Style> for SubtitleStyle {
    fn from(s: Style) -> Self {
        match s {
            Style::Netflix => SubtitleStyle::Netflix,
            Style::Youtube => SubtitleStyle::Youtube,
            Style::Minimal => SubtitleStyle::Minimal,
        }
    }
}
