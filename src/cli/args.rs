//! CLI argument parsing with clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use super::enums::{Position, Provider, Style};

/// Longest duration accepted on the command line (24 hours).
const MAX_DURATION_SECS: f64 = 86_400.0;

/// Parse and validate a duration in seconds (> 0, at most 24 hours)
fn parse_duration(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|_| format!("'{}' is not a valid number", s))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("Duration must be greater than 0, got {}", secs));
    }
    if secs > MAX_DURATION_SECS {
        return Err(format!(
            "Duration must be at most {} seconds, got {}",
            MAX_DURATION_SECS, secs
        ));
    }
    Ok(secs)
}

/// Parse and validate opacity (0.0-1.0)
fn parse_opacity(s: &str) -> Result<f64, String> {
    let opacity: f64 = s.parse().map_err(|_| format!("'{}' is not a valid number", s))?;
    if !(0.0..=1.0).contains(&opacity) {
        return Err(format!("Opacity must be between 0.0 and 1.0, got {}", opacity));
    }
    Ok(opacity)
}

/// Parse and validate logo scale (0.0-1.0, exclusive of 0)
fn parse_scale(s: &str) -> Result<f64, String> {
    let scale: f64 = s.parse().map_err(|_| format!("'{}' is not a valid number", s))?;
    if !(scale > 0.0 && scale <= 1.0) {
        return Err(format!("Scale must be within (0, 1], got {}", scale));
    }
    Ok(scale)
}

/// Parse and validate a cross-fade length (>= 0)
fn parse_crossfade(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|_| format!("'{}' is not a valid number", s))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("Cross-fade must be 0 or more, got {}", secs));
    }
    Ok(secs)
}

/// Turn one image into a chained, branded video
#[derive(Parser, Debug)]
#[command(name = "reelsmith")]
#[command(version, about = "Image-to-video segment chaining and branded assembly", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the segment lengths planned for a duration
    Plan {
        /// Target duration in seconds
        #[arg(long, short, value_parser = parse_duration)]
        duration: f64,

        /// Provider whose segment bounds apply
        #[arg(long, short, default_value = "kling")]
        provider: Provider,
    },
    /// Generate a segment chain and join it into main.mp4
    Generate(SourceArgs),
    /// Join clips with cross-fades
    Concat {
        /// Clips in playback order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output file
        #[arg(long, short)]
        output: PathBuf,

        /// Fade length at each boundary in seconds
        #[arg(long, value_parser = parse_crossfade)]
        crossfade: Option<f64>,

        /// Trim the result to this many seconds
        #[arg(long, value_parser = parse_duration)]
        max_duration: Option<f64>,
    },
    /// Apply finishing stages to an existing main video
    Assemble {
        /// Main video (concatenated segments)
        #[arg(long)]
        main: PathBuf,

        /// Project directory for scratch files and the tracker
        #[arg(long)]
        project: PathBuf,

        /// Narration to mux onto the main video
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Output file (default: <project>/final.mp4)
        #[arg(long, short)]
        output: Option<PathBuf>,

        #[command(flatten)]
        branding: BrandingArgs,
    },
    /// Generate and assemble in one go
    Run {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        branding: BrandingArgs,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Inputs for segment generation.
#[derive(ClapArgs, Debug, Clone)]
pub struct SourceArgs {
    /// Source artwork seeding the first segment
    #[arg(long, short)]
    pub image: PathBuf,

    /// Target duration in seconds (default: narration length)
    #[arg(long, short, value_parser = parse_duration)]
    pub duration: Option<f64>,

    /// Narration audio; sets the target duration and is muxed in by `run`
    #[arg(long)]
    pub audio: Option<PathBuf>,

    /// Video generation backend
    #[arg(long, short, default_value = "kling")]
    pub provider: Provider,

    /// Project directory
    #[arg(long)]
    pub project: PathBuf,

    /// Motion prompt; repeat to give each segment its own
    #[arg(long)]
    pub prompt: Vec<String>,

    /// Continue from the segments recorded in the project's tracker.json
    #[arg(long)]
    pub resume: bool,
}

/// Optional finishing stages.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct BrandingArgs {
    /// Intro clip placed before the main video
    #[arg(long)]
    pub intro: Option<PathBuf>,

    /// Outro clip placed after the main video
    #[arg(long)]
    pub outro: Option<PathBuf>,

    /// Title drawn over the intro
    #[arg(long)]
    pub title: Option<String>,

    /// Subtitle file to burn in
    #[arg(long)]
    pub subtitles: Option<PathBuf>,

    /// Subtitle look
    #[arg(long)]
    pub subtitle_style: Option<Style>,

    /// Logo image for the watermark
    #[arg(long)]
    pub logo: Option<PathBuf>,

    /// Logo position
    #[arg(long)]
    pub position: Option<Position>,

    /// Logo opacity (0.0-1.0)
    #[arg(long, value_parser = parse_opacity)]
    pub opacity: Option<f64>,

    /// Logo width relative to the video width
    #[arg(long, value_parser = parse_scale)]
    pub scale: Option<f64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}
