//! FFmpeg and ffprobe plumbing shared by the chain, concat and assembly steps.
//!
//! Everything that touches real media goes through the [`MediaTools`] trait so
//! the engines can be exercised without an ffmpeg binary.

mod escape;
mod frames;
mod probe;
mod runner;

use std::path::{Path, PathBuf};

pub use escape::{escape_drawtext, escape_filter_path};
pub use frames::last_frame_args;
pub use probe::{parse_frame_rate, parse_probe_output};
pub use runner::FfmpegTools;

/// Errors that can occur while probing or transforming media.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{tool} not found. Please install FFmpeg (e.g. `brew install ffmpeg` or `apt install ffmpeg`)")]
    FfmpegNotFound { tool: String },

    #[error("Failed to spawn {tool}: {source}")]
    SpawnFailed {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {exit_code:?}\n{stderr}")]
    ProcessFailed {
        tool: String,
        exit_code: Option<i32>,
        /// Last lines of stderr.
        stderr: String,
    },

    #[error("Failed to probe '{}': {reason}", .path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("Expected output was not produced: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream and container facts about one media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second of the first video stream.
    pub fps: f64,
    pub duration_secs: f64,
    pub has_audio: bool,
}

impl MediaInfo {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Blocking access to ffprobe and ffmpeg.
///
/// Implementations must be callable from worker threads; async callers wrap
/// them in `tokio::task::spawn_blocking`.
pub trait MediaTools: Send + Sync {
    /// Probe resolution, frame rate, duration and audio presence.
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError>;

    /// Run ffmpeg with the given arguments (without the program name).
    fn run_ffmpeg(&self, args: &[String]) -> Result<(), MediaError>;

    /// Write the final frame of `video` to `dest` as a JPEG.
    fn extract_last_frame(&self, video: &Path, dest: &Path) -> Result<PathBuf, MediaError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.run_ffmpeg(&last_frame_args(video, dest))?;
        ensure_output(dest)?;
        Ok(dest.to_path_buf())
    }
}

/// Check that ffmpeg actually produced a non-empty file at `path`.
pub fn ensure_output(path: &Path) -> Result<(), MediaError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(MediaError::MissingOutput(path.to_path_buf())),
    }
}

/// Render a path for an ffmpeg argument list.
pub(crate) fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Format seconds for filter expressions with fixed precision.
pub(crate) fn secs(value: f64) -> String {
    format!("{:.3}", value)
}
