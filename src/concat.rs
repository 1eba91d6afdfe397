//! Concatenation of ordered clips into one continuous video.
//!
//! Clips are normalised to one resolution and frame rate and cross-faded: the
//! tail of each clip overlaps the head of the next for the fade window, so
//! the joined length is the sum of the clip lengths minus the fades. Audio is
//! cross-faded in lockstep with video; clips without audio contribute
//! silence. The timeline depends only on the probed inputs and settings, so
//! re-running the same inputs yields the same boundaries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ConcatConfig;
use crate::media::{arg, secs, MediaError, MediaInfo, MediaTools};

/// Clips shorter than this after trimming are dropped.
const MIN_CLIP_SECS: f64 = 0.04;

/// Audio format every clip is converted to before joining.
const AUDIO_FORMAT: &str = "aformat=sample_fmts=fltp:sample_rates=44100:channel_layouts=stereo";

/// Errors that can occur while concatenating clips.
#[derive(Debug, thiserror::Error)]
pub enum ConcatenationError {
    #[error("No input clips to concatenate")]
    NoInputs,

    #[error("Input clip not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Failed to probe '{}': {source}", .path.display())]
    Probe {
        path: PathBuf,
        #[source]
        source: MediaError,
    },

    #[error("Invalid concatenation settings: {0}")]
    InvalidSettings(String),

    #[error("Rendering failed: {0}")]
    Render(#[source] MediaError),
}

/// Parameters for one concatenation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatSettings {
    /// Requested fade length at each boundary, before clamping.
    pub crossfade_secs: f64,
    /// Output resolution; the first clip's resolution when unset.
    pub target: Option<(u32, u32)>,
    pub fps: u32,
    /// Trim the joined result to this length.
    pub max_duration: Option<f64>,
}

impl Default for ConcatSettings {
    fn default() -> Self {
        Self::from(&ConcatConfig::default())
    }
}

impl From<&ConcatConfig> for ConcatSettings {
    fn from(config: &ConcatConfig) -> Self {
        Self {
            crossfade_secs: config.crossfade_secs,
            target: config.target(),
            fps: config.fps,
            max_duration: None,
        }
    }
}

impl ConcatSettings {
    pub fn with_max_duration(mut self, max_duration: Option<f64>) -> Self {
        self.max_duration = max_duration;
        self
    }

    fn validate(&self) -> Result<(), ConcatenationError> {
        if !self.crossfade_secs.is_finite() || self.crossfade_secs < 0.0 {
            return Err(ConcatenationError::InvalidSettings(format!(
                "crossfade must be >= 0, got {}",
                self.crossfade_secs
            )));
        }
        if self.fps == 0 {
            return Err(ConcatenationError::InvalidSettings(
                "fps must be greater than zero".to_string(),
            ));
        }
        if let Some((w, h)) = self.target {
            if w == 0 || h == 0 {
                return Err(ConcatenationError::InvalidSettings(format!(
                    "invalid target resolution {}x{}",
                    w, h
                )));
            }
        }
        if let Some(max) = self.max_duration {
            if !max.is_finite() || max <= 0.0 {
                return Err(ConcatenationError::InvalidSettings(format!(
                    "max duration must be > 0, got {}",
                    max
                )));
            }
        }
        Ok(())
    }
}

/// Overlap at a boundary between clips of the given lengths: the requested
/// crossfade, clamped to half the shorter clip.
pub fn effective_fade(crossfade_secs: f64, left_secs: f64, right_secs: f64) -> f64 {
    crossfade_secs.max(0.0).min(left_secs.min(right_secs) / 2.0)
}

/// Timing of one clip in the joined output.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPlan {
    pub path: PathBuf,
    /// Where the clip starts in the output; its fade-in begins here.
    pub start_secs: f64,
    /// Length used from the clip, after trimming.
    pub duration_secs: f64,
    /// Overlap with the previous clip.
    pub fade_in_secs: f64,
    /// Overlap with the next clip.
    pub fade_out_secs: f64,
    pub has_audio: bool,
}

impl ClipPlan {
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}

/// Full timeline of a concatenation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatPlan {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub clips: Vec<ClipPlan>,
}

impl ConcatPlan {
    pub fn total_secs(&self) -> f64 {
        self.clips.last().map(ClipPlan::end_secs).unwrap_or(0.0)
    }

    /// Timestamps where each cross-fade into the next clip begins.
    pub fn boundaries(&self) -> Vec<f64> {
        self.clips.iter().skip(1).map(|c| c.start_secs).collect()
    }
}

/// Compute the timeline for probed inputs.
pub fn plan_concat(
    inputs: &[(PathBuf, MediaInfo)],
    settings: &ConcatSettings,
) -> Result<ConcatPlan, ConcatenationError> {
    settings.validate()?;
    let (first_path, first) = inputs.first().ok_or(ConcatenationError::NoInputs)?;
    let (width, height) = settings.target.unwrap_or_else(|| first.resolution());
    if width == 0 || height == 0 {
        return Err(ConcatenationError::Probe {
            path: first_path.clone(),
            source: MediaError::Probe {
                path: first_path.clone(),
                reason: "zero resolution".to_string(),
            },
        });
    }

    let mut clips: Vec<ClipPlan> = Vec::with_capacity(inputs.len());
    for (path, info) in inputs {
        let full = info.duration_secs;
        let (start, mut duration, mut fade) = match clips.last() {
            None => (0.0, full, 0.0),
            Some(prev) => {
                let fade = effective_fade(settings.crossfade_secs, prev.duration_secs, full);
                (prev.end_secs() - fade, full, fade)
            }
        };

        if let Some(max) = settings.max_duration {
            match clips.last() {
                None => duration = duration.min(max),
                Some(prev) if start + duration > max => {
                    // Shorten the clip so the output ends at `max`; the
                    // overlap stays within half of the shortened clip.
                    let room = max - prev.end_secs();
                    let cap = effective_fade(settings.crossfade_secs, prev.duration_secs, f64::MAX);
                    fade = cap.min(room.max(0.0));
                    duration = room + fade;
                }
                Some(_) => {}
            }
        }

        if duration < MIN_CLIP_SECS {
            if settings.max_duration.is_some() && !clips.is_empty() {
                log::debug!("Dropping {} after trim", path.display());
                continue;
            }
            return Err(ConcatenationError::Probe {
                path: path.clone(),
                source: MediaError::Probe {
                    path: path.clone(),
                    reason: format!("clip too short ({:.3}s)", duration),
                },
            });
        }

        let start = match clips.last_mut() {
            Some(prev) => {
                prev.fade_out_secs = fade;
                prev.end_secs() - fade
            }
            None => 0.0,
        };
        clips.push(ClipPlan {
            path: path.clone(),
            start_secs: start,
            duration_secs: duration,
            fade_in_secs: fade,
            fade_out_secs: 0.0,
            has_audio: info.has_audio,
        });
    }

    Ok(ConcatPlan {
        width,
        height,
        fps: settings.fps,
        clips,
    })
}

/// Build the `-filter_complex` graph for a plan.
///
/// Every clip is normalised into `[v<i>]`/`[a<i>]`; the streams are then
/// folded left to right with `xfade`/`acrossfade` into `[vout]`/`[aout]`.
/// Joins without a fade fall back to a plain `concat`.
pub fn build_filter_graph(plan: &ConcatPlan) -> String {
    let (w, h) = (plan.width, plan.height);
    let mut parts = Vec::with_capacity(plan.clips.len() * 4);

    for (i, clip) in plan.clips.iter().enumerate() {
        let d = secs(clip.duration_secs);
        parts.push(format!(
            "[{i}:v]trim=duration={d},setpts=PTS-STARTPTS,\
             scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p[v{i}]",
            fps = plan.fps
        ));
        parts.push(if clip.has_audio {
            format!(
                "[{i}:a]atrim=duration={d},asetpts=PTS-STARTPTS,aresample=44100,{AUDIO_FORMAT}[a{i}]"
            )
        } else {
            format!("anullsrc=channel_layout=stereo:sample_rate=44100,atrim=duration={d},{AUDIO_FORMAT}[a{i}]")
        });
    }

    let last = plan.clips.len().saturating_sub(1);
    if last == 0 {
        parts.push("[v0]null[vout]".to_string());
        parts.push("[a0]anull[aout]".to_string());
        return parts.join(";");
    }

    let (mut video, mut audio) = ("v0".to_string(), "a0".to_string());
    for (i, clip) in plan.clips.iter().enumerate().skip(1) {
        let (next_video, next_audio) = if i == last {
            ("vout".to_string(), "aout".to_string())
        } else {
            (format!("vx{i}"), format!("ax{i}"))
        };
        if clip.fade_in_secs > 0.0 {
            let fade = secs(clip.fade_in_secs);
            parts.push(format!(
                "[{video}][v{i}]xfade=transition=fade:duration={fade}:offset={}[{next_video}]",
                secs(clip.start_secs)
            ));
            parts.push(format!("[{audio}][a{i}]acrossfade=d={fade}[{next_audio}]"));
        } else {
            parts.push(format!("[{video}][v{i}]concat=n=2:v=1:a=0[{next_video}]"));
            parts.push(format!("[{audio}][a{i}]concat=n=2:v=0:a=1[{next_audio}]"));
        }
        video = next_video;
        audio = next_audio;
    }

    parts.join(";")
}

/// Full ffmpeg argument list rendering `plan` to `output`.
pub fn build_ffmpeg_args(plan: &ConcatPlan, output: &Path) -> Vec<String> {
    let graph = build_filter_graph(plan);
    let mut args = vec!["-y".to_string()];
    for clip in &plan.clips {
        args.push("-i".to_string());
        args.push(arg(&clip.path));
    }
    args.extend(
        [
            "-filter_complex",
            graph.as_str(),
            "-map",
            "[vout]",
            "-map",
            "[aout]",
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-crf",
            "20",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-movflags",
            "+faststart",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(arg(output));
    args
}

/// Probes, plans and renders concatenations.
pub struct ConcatEngine {
    media: Arc<dyn MediaTools>,
    settings: ConcatSettings,
}

impl ConcatEngine {
    pub fn new(media: Arc<dyn MediaTools>, settings: ConcatSettings) -> Self {
        Self { media, settings }
    }

    pub fn settings(&self) -> &ConcatSettings {
        &self.settings
    }

    /// Probe every input and compute the timeline without rendering.
    pub fn plan(&self, inputs: &[PathBuf]) -> Result<ConcatPlan, ConcatenationError> {
        if inputs.is_empty() {
            return Err(ConcatenationError::NoInputs);
        }
        let mut probed = Vec::with_capacity(inputs.len());
        for path in inputs {
            if !path.exists() {
                return Err(ConcatenationError::MissingInput(path.clone()));
            }
            let info = self
                .media
                .probe(path)
                .map_err(|source| ConcatenationError::Probe {
                    path: path.clone(),
                    source,
                })?;
            probed.push((path.clone(), info));
        }
        plan_concat(&probed, &self.settings)
    }

    /// Join `inputs` into `output`. Blocking.
    pub fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<ConcatPlan, ConcatenationError> {
        let plan = self.plan(inputs)?;
        log::info!(
            "Concatenating {} clip(s) into {} ({}x{}, {:.2}s)",
            plan.clips.len(),
            output.display(),
            plan.width,
            plan.height,
            plan.total_secs()
        );

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConcatenationError::Render(MediaError::Io(e)))?;
        }
        self.media
            .run_ffmpeg(&build_ffmpeg_args(&plan, output))
            .map_err(ConcatenationError::Render)?;
        crate::media::ensure_output(output).map_err(ConcatenationError::Render)?;
        Ok(plan)
    }
}
