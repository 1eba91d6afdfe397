//! Process-spawning implementation of [`MediaTools`].

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use super::probe::parse_probe_output;
use super::{arg, MediaError, MediaInfo, MediaTools};

/// Number of stderr lines kept when ffmpeg fails.
const STDERR_TAIL_LINES: usize = 20;

/// Runs the system `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit binary locations instead of looking them up on `PATH`.
    pub fn with_binaries(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }

    fn execute(&self, program: &Path, args: &[String]) -> Result<Output, MediaError> {
        let tool = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| arg(program));

        log::debug!("{} {}", tool, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MediaError::FfmpegNotFound { tool: tool.clone() }
                } else {
                    MediaError::SpawnFailed {
                        tool: tool.clone(),
                        source: e,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(MediaError::ProcessFailed {
                tool,
                exit_code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(output)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

impl MediaTools for FfmpegTools {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        if !path.exists() {
            return Err(MediaError::Probe {
                path: path.to_path_buf(),
                reason: "file not found".to_string(),
            });
        }
        let args = [
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(arg(path)))
        .collect::<Vec<_>>();

        let output = self.execute(&self.ffprobe, &args)?;
        parse_probe_output(path, &String::from_utf8_lossy(&output.stdout))
    }

    fn run_ffmpeg(&self, args: &[String]) -> Result<(), MediaError> {
        let mut full = vec!["-hide_banner".to_string(), "-nostdin".to_string()];
        full.extend_from_slice(args);
        self.execute(&self.ffmpeg, &full)?;
        Ok(())
    }
}
