//! Finishing pipeline turning the main video into the final deliverable.
//!
//! Stages run in a fixed order: `sync`, `title`, `branding`, `subtitles`,
//! `watermark`, `finalize`. A stage whose inputs are absent from the
//! [`AssemblyPlan`] is skipped and the video passes through unchanged.
//! Intermediate files live in a temporary directory inside the project and
//! are removed whether assembly succeeds or fails. When a stage fails the
//! remaining stages are skipped and the last good intermediate is kept as
//! `partial_after_<stage>.mp4`.

pub mod subtitles;
pub mod sync;
pub mod title;
pub mod watermark;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelFlag;
use crate::concat::{ConcatEngine, ConcatSettings, ConcatenationError};
use crate::config::Config;
use crate::media::{arg, ensure_output, MediaError, MediaTools};
use crate::tracker::{NullTracker, ProgressTracker};

pub use subtitles::{subtitle_filter, SubtitleStyle};
pub use sync::{AudioSync, MuxAudioSync};
pub use title::{clean_title, title_filter, wrap_title, TitleStyle};
pub use watermark::{WatermarkPosition, WatermarkSettings};

/// Prefix of the per-run scratch directory inside the project.
pub const WORKSPACE_PREFIX: &str = ".assembly-";

/// One step of the finishing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Sync,
    Title,
    Branding,
    Subtitles,
    Watermark,
    Finalize,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Sync,
        Stage::Title,
        Stage::Branding,
        Stage::Subtitles,
        Stage::Watermark,
        Stage::Finalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Sync => "sync",
            Stage::Title => "title",
            Stage::Branding => "branding",
            Stage::Subtitles => "subtitles",
            Stage::Watermark => "watermark",
            Stage::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StageOutcome {
    Succeeded,
    Skipped,
    Failed { error: String },
}

impl StageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub duration_ms: u64,
}

impl StageReport {
    fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Skipped,
            duration_ms: 0,
        }
    }
}

/// Which finishing stages to apply, and to what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyPlan {
    /// Concatenated segments.
    pub main_video: PathBuf,
    /// Narration muxed onto the main video.
    pub audio_path: Option<PathBuf>,
    pub intro_path: Option<PathBuf>,
    pub outro_path: Option<PathBuf>,
    /// Drawn over the intro; ignored without an intro.
    pub title_text: Option<String>,
    pub subtitle_path: Option<PathBuf>,
    pub watermark: Option<WatermarkSettings>,
    pub output_path: PathBuf,
}

impl AssemblyPlan {
    /// A plan that only copies `main_video` to `output_path`.
    pub fn new(main_video: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            main_video: main_video.into(),
            audio_path: None,
            intro_path: None,
            outro_path: None,
            title_text: None,
            subtitle_path: None,
            watermark: None,
            output_path: output_path.into(),
        }
    }

    /// Every input file the plan refers to.
    pub fn inputs(&self) -> Vec<&Path> {
        let mut inputs = vec![self.main_video.as_path()];
        inputs.extend(
            [
                &self.audio_path,
                &self.intro_path,
                &self.outro_path,
                &self.subtitle_path,
            ]
            .into_iter()
            .flatten()
            .map(PathBuf::as_path),
        );
        if let Some(watermark) = &self.watermark {
            inputs.push(&watermark.logo);
        }
        inputs
    }

    fn check_inputs(&self) -> Result<(), AssemblyError> {
        match self.inputs().into_iter().find(|p| !p.exists()) {
            Some(missing) => Err(AssemblyError::MissingInput(missing.to_path_buf())),
            None => Ok(()),
        }
    }
}

/// Per-stage outcomes of one assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyResult {
    /// Set only when every stage succeeded or was skipped.
    pub final_path: Option<PathBuf>,
    pub stages: Vec<StageReport>,
}

impl AssemblyResult {
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.outcome)
    }

    /// First stage that failed.
    pub fn failed_stage(&self) -> Option<Stage> {
        self.stages
            .iter()
            .find(|r| r.outcome.is_failed())
            .map(|r| r.stage)
    }
}

/// Errors raised inside a single stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Concat(#[from] ConcatenationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("Assembly input not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Invalid assembly settings: {0}")]
    InvalidSettings(String),

    #[error("Failed to prepare assembly workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },

    #[error("Assembly cancelled before stage '{stage}'")]
    Cancelled { stage: Stage },
}

/// A failed assembly with whatever it managed to produce.
#[derive(Debug)]
pub struct AssemblyFailure {
    pub result: AssemblyResult,
    /// Output of the last successful stage, or the untouched main video.
    pub last_good: Option<PathBuf>,
    pub error: AssemblyError,
}

impl std::fmt::Display for AssemblyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for AssemblyFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Rendering parameters shared by all stages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssemblySettings {
    /// Used by the branding join.
    pub concat: ConcatSettings,
    pub title: TitleStyle,
    pub subtitle_style: SubtitleStyle,
}

impl AssemblySettings {
    pub fn from_config(config: &Config) -> Result<Self, AssemblyError> {
        let subtitle_style = config
            .assembly
            .subtitle_style
            .parse()
            .map_err(AssemblyError::InvalidSettings)?;
        Ok(Self {
            concat: ConcatSettings::from(&config.concat),
            title: TitleStyle {
                font_file: config.assembly.font_file.clone(),
                font_ratio: config.assembly.title_font_ratio,
                wrap_chars: config.assembly.title_wrap_chars,
            },
            subtitle_style,
        })
    }
}

enum Step {
    Ran,
    Skipped,
}

/// Mutable state of one assembly run.
struct Session {
    work_dir: PathBuf,
    /// Latest version of the main video.
    current: PathBuf,
    /// Stage that produced `current`; `None` while it is still the input.
    produced_by: Option<Stage>,
    intro: Option<PathBuf>,
    /// Where the narration starts in the branded video.
    subtitle_offset: f64,
}

impl Session {
    fn scratch(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    fn advance(&mut self, stage: Stage, output: PathBuf) {
        self.current = output;
        self.produced_by = Some(stage);
    }
}

/// Runs the finishing stages for one project.
pub struct AssemblyEngine {
    media: Arc<dyn MediaTools>,
    sync: Arc<dyn AudioSync>,
    settings: AssemblySettings,
    cancel: CancelFlag,
    tracker: Arc<dyn ProgressTracker>,
}

impl AssemblyEngine {
    pub fn new(media: Arc<dyn MediaTools>, settings: AssemblySettings) -> Self {
        Self {
            sync: Arc::new(MuxAudioSync::new(media.clone())),
            media,
            settings,
            cancel: CancelFlag::new(),
            tracker: Arc::new(NullTracker),
        }
    }

    pub fn with_sync(mut self, sync: Arc<dyn AudioSync>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ProgressTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Run every stage of `plan`, keeping scratch files under `project_dir`.
    /// Blocking.
    pub fn assemble(
        &self,
        plan: &AssemblyPlan,
        project_dir: &Path,
    ) -> Result<AssemblyResult, AssemblyFailure> {
        let mut result = AssemblyResult::default();
        let fail_early = |result: AssemblyResult, error| AssemblyFailure {
            result,
            last_good: None,
            error,
        };

        if let Err(error) = plan.check_inputs() {
            return Err(fail_early(result, error));
        }
        if let Err(e) = std::fs::create_dir_all(project_dir) {
            return Err(fail_early(result, AssemblyError::Workspace(e)));
        }
        let workspace = match tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(project_dir)
        {
            Ok(dir) => dir,
            Err(e) => return Err(fail_early(result, AssemblyError::Workspace(e))),
        };

        let mut session = Session {
            work_dir: workspace.path().to_path_buf(),
            current: plan.main_video.clone(),
            produced_by: None,
            intro: plan.intro_path.clone(),
            subtitle_offset: 0.0,
        };
        let mut failure: Option<AssemblyError> = None;

        for stage in Stage::ALL {
            if failure.is_some() {
                self.record(&mut result, StageReport::skipped(stage));
                continue;
            }
            if self.cancel.is_cancelled() {
                log::warn!("Assembly cancelled before stage '{}'", stage);
                failure = Some(AssemblyError::Cancelled { stage });
                self.record(&mut result, StageReport::skipped(stage));
                continue;
            }

            let started = Instant::now();
            let outcome = match self.run_stage(stage, plan, &mut session) {
                Ok(Step::Ran) => {
                    log::info!("Stage '{}' done", stage);
                    StageOutcome::Succeeded
                }
                Ok(Step::Skipped) => {
                    log::debug!("Stage '{}' skipped", stage);
                    StageOutcome::Skipped
                }
                Err(source) => {
                    log::error!("Stage '{}' failed: {}", stage, source);
                    let outcome = StageOutcome::Failed {
                        error: source.to_string(),
                    };
                    failure = Some(AssemblyError::Stage { stage, source });
                    outcome
                }
            };
            self.record(
                &mut result,
                StageReport {
                    stage,
                    outcome,
                    duration_ms: started.elapsed().as_millis() as u64,
                },
            );
        }

        let outcome = match failure {
            None => {
                result.final_path = Some(plan.output_path.clone());
                Ok(result)
            }
            Some(error) => Err(AssemblyFailure {
                last_good: preserve_last_good(&session, project_dir),
                result,
                error,
            }),
        };

        if let Err(e) = workspace.close() {
            log::warn!("Failed to remove assembly workspace: {}", e);
        }
        outcome
    }

    fn record(&self, result: &mut AssemblyResult, report: StageReport) {
        self.tracker.stage_finished(&report);
        result.stages.push(report);
    }

    fn run_stage(
        &self,
        stage: Stage,
        plan: &AssemblyPlan,
        session: &mut Session,
    ) -> Result<Step, StageError> {
        match stage {
            Stage::Sync => self.sync_audio(plan, session),
            Stage::Title => self.draw_title(plan, session),
            Stage::Branding => self.attach_branding(plan, session),
            Stage::Subtitles => self.burn_subtitles(plan, session),
            Stage::Watermark => self.overlay_watermark(plan, session),
            Stage::Finalize => self.finalize(plan, session),
        }
    }

    fn sync_audio(&self, plan: &AssemblyPlan, session: &mut Session) -> Result<Step, StageError> {
        let Some(audio) = &plan.audio_path else {
            return Ok(Step::Skipped);
        };
        let output = session.scratch("synced.mp4");
        self.sync.sync(&session.current, audio, &output)?;
        session.advance(Stage::Sync, output);
        Ok(Step::Ran)
    }

    fn draw_title(&self, plan: &AssemblyPlan, session: &mut Session) -> Result<Step, StageError> {
        let (Some(intro), Some(title)) = (&session.intro, plan.title_text.as_deref()) else {
            return Ok(Step::Skipped);
        };
        let lines = wrap_title(&clean_title(title), self.settings.title.wrap_chars);
        if lines.is_empty() {
            return Ok(Step::Skipped);
        }

        let info = self.media.probe(intro)?;
        log::info!("Drawing title {:?} over {:.2}s intro", lines, info.duration_secs);
        let filter = title_filter(
            &lines,
            info.width,
            info.height,
            info.duration_secs,
            &self.settings.title,
        );
        let output = session.scratch("intro_titled.mp4");
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            arg(intro),
            "-vf".to_string(),
            filter,
            "-c:a".to_string(),
            "copy".to_string(),
            arg(&output),
        ];
        self.media.run_ffmpeg(&args)?;
        ensure_output(&output)?;
        session.intro = Some(output);
        Ok(Step::Ran)
    }

    fn attach_branding(
        &self,
        plan: &AssemblyPlan,
        session: &mut Session,
    ) -> Result<Step, StageError> {
        if session.intro.is_none() && plan.outro_path.is_none() {
            return Ok(Step::Skipped);
        }

        let mut inputs = Vec::with_capacity(3);
        inputs.extend(session.intro.clone());
        inputs.push(session.current.clone());
        inputs.extend(plan.outro_path.clone());

        // Intro and outro are fitted to the main video's frame unless an
        // output resolution is configured.
        let mut settings = self.settings.concat.clone();
        if settings.target.is_none() {
            settings.target = Some(self.media.probe(&session.current)?.resolution());
        }

        let output = session.scratch("branded.mp4");
        let engine = ConcatEngine::new(self.media.clone(), settings);
        let layout = engine.concatenate(&inputs, &output)?;
        if session.intro.is_some() {
            session.subtitle_offset = layout.clips.get(1).map(|c| c.start_secs).unwrap_or(0.0);
        }
        session.advance(Stage::Branding, output);
        Ok(Step::Ran)
    }

    fn burn_subtitles(
        &self,
        plan: &AssemblyPlan,
        session: &mut Session,
    ) -> Result<Step, StageError> {
        let Some(subtitles) = &plan.subtitle_path else {
            return Ok(Step::Skipped);
        };
        let filter = subtitle_filter(
            subtitles,
            self.settings.subtitle_style,
            session.subtitle_offset,
        );
        let output = session.scratch("subtitled.mp4");
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            arg(&session.current),
            "-vf".to_string(),
            filter,
        ];
        args.extend(video_encode_args());
        args.push(arg(&output));

        self.media.run_ffmpeg(&args)?;
        ensure_output(&output)?;
        session.advance(Stage::Subtitles, output);
        Ok(Step::Ran)
    }

    fn overlay_watermark(
        &self,
        plan: &AssemblyPlan,
        session: &mut Session,
    ) -> Result<Step, StageError> {
        let Some(watermark) = &plan.watermark else {
            return Ok(Step::Skipped);
        };
        watermark.validate().map_err(StageError::Invalid)?;

        let info = self.media.probe(&session.current)?;
        let output = session.scratch("watermarked.mp4");
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            arg(&session.current),
            "-i".to_string(),
            arg(&watermark.logo),
            "-filter_complex".to_string(),
            watermark.filter(info.width),
            "-map".to_string(),
            "[vout]".to_string(),
            "-map".to_string(),
            "0:a?".to_string(),
        ];
        args.extend(video_encode_args());
        args.push(arg(&output));

        log::info!(
            "Adding logo at {} with {:.2} opacity",
            watermark.position,
            watermark.opacity
        );
        self.media.run_ffmpeg(&args)?;
        ensure_output(&output)?;
        session.advance(Stage::Watermark, output);
        Ok(Step::Ran)
    }

    fn finalize(&self, plan: &AssemblyPlan, session: &mut Session) -> Result<Step, StageError> {
        let dest = &plan.output_path;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if session.produced_by.is_none() {
            // Nothing ran; the main video belongs to the caller.
            std::fs::copy(&session.current, dest)?;
        } else if std::fs::rename(&session.current, dest).is_err() {
            std::fs::copy(&session.current, dest)?;
        }
        log::info!("Final video written to {}", dest.display());
        session.advance(Stage::Finalize, dest.clone());
        Ok(Step::Ran)
    }
}

/// Re-encode settings for stages that filter the video stream.
fn video_encode_args() -> Vec<String> {
    [
        "-c:v", "libx264", "-preset", "medium", "-crf", "20", "-pix_fmt", "yuv420p", "-c:a",
        "copy",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Copy the newest intermediate out of the workspace before it is removed.
fn preserve_last_good(session: &Session, project_dir: &Path) -> Option<PathBuf> {
    let stage = match session.produced_by {
        None => return Some(session.current.clone()),
        Some(stage) => stage,
    };
    let dest = project_dir.join(format!("partial_after_{}.mp4", stage));
    match std::fs::copy(&session.current, &dest) {
        Ok(_) => {
            log::info!("Kept output of stage '{}' at {}", stage, dest.display());
            Some(dest)
        }
        Err(e) => {
            log::warn!("Failed to keep output of stage '{}': {}", stage, e);
            None
        }
    }
}
