//! End-to-end project run: plan, generate the chain, join the segments into
//! `main.mp4` trimmed to the target, then assemble the final video.
//!
//! Every run ends with a [`RunReport`] handed to the tracker, whether it
//! succeeds, fails or is cancelled.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assembly::{
    AssemblyEngine, AssemblyError, AssemblyFailure, AssemblyPlan, AssemblyResult,
    AssemblySettings, WatermarkSettings,
};
use crate::cancel::CancelFlag;
use crate::chain::{Chain, ChainBuilder, ChainError, ChainFailure, ChainSettings};
use crate::clock::{Sleeper, TokioSleeper};
use crate::concat::{ConcatEngine, ConcatSettings, ConcatenationError};
use crate::config::Config;
use crate::media::{MediaError, MediaTools};
use crate::project::ProjectDir;
use crate::provider::VideoProvider;
use crate::tracker::{JsonTracker, NullTracker, ProgressTracker, TrackerError, TRACKER_FILE};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Failed,
    Cancelled,
}

/// Summary of a run for the tracker and the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// `segment <n>`, `chain`, `concat` or an assembly stage name.
    pub failed_at: Option<String>,
    pub error: Option<String>,
    pub final_path: Option<PathBuf>,
    /// Last good intermediate kept after an assembly failure.
    pub partial_path: Option<PathBuf>,
}

impl RunReport {
    fn complete(final_path: PathBuf) -> Self {
        Self {
            status: RunStatus::Complete,
            failed_at: None,
            error: None,
            final_path: Some(final_path),
            partial_path: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    #[error("Failed to read narration duration: {0}")]
    Narration(#[source] MediaError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Concatenation failed: {0}")]
    Concat(#[from] ConcatenationError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("Cannot resume: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Cancelled before {0}")]
    Cancelled(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// What a run should produce.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunRequest {
    pub source_image: PathBuf,
    /// Target length; the narration's length when unset.
    pub target_secs: Option<f64>,
    pub audio_path: Option<PathBuf>,
    pub intro_path: Option<PathBuf>,
    pub outro_path: Option<PathBuf>,
    pub title_text: Option<String>,
    pub subtitle_path: Option<PathBuf>,
    pub watermark: Option<WatermarkSettings>,
    /// Reuse ready segments recorded in the project's `tracker.json`.
    pub resume: bool,
}

impl RunRequest {
    pub fn new(source_image: impl Into<PathBuf>) -> Self {
        Self {
            source_image: source_image.into(),
            ..Self::default()
        }
    }

    /// Finishing stages applied to `main_video`.
    pub fn assembly_plan(&self, main_video: PathBuf, output_path: PathBuf) -> AssemblyPlan {
        AssemblyPlan {
            audio_path: self.audio_path.clone(),
            intro_path: self.intro_path.clone(),
            outro_path: self.outro_path.clone(),
            title_text: self.title_text.clone(),
            subtitle_path: self.subtitle_path.clone(),
            watermark: self.watermark.clone(),
            ..AssemblyPlan::new(main_video, output_path)
        }
    }
}

/// Successful run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub report: RunReport,
    pub chain: Chain,
    pub assembly: AssemblyResult,
}

/// Failed or cancelled run, with everything produced up to the failure.
#[derive(Debug)]
pub struct RunFailure {
    pub report: RunReport,
    pub chain: Option<Chain>,
    pub error: RunError,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.report.failed_at {
            Some(at) => write!(f, "{} (at {})", self.error, at),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Drives one project from source image to final video.
pub struct ProjectRun {
    provider: Arc<dyn VideoProvider>,
    media: Arc<dyn MediaTools>,
    chain_settings: ChainSettings,
    concat_settings: ConcatSettings,
    assembly_settings: AssemblySettings,
    sleeper: Arc<dyn Sleeper>,
    prompts: Vec<String>,
    cancel: CancelFlag,
    tracker: Arc<dyn ProgressTracker>,
}

impl ProjectRun {
    pub fn new(provider: Arc<dyn VideoProvider>, media: Arc<dyn MediaTools>) -> Self {
        Self {
            provider,
            media,
            chain_settings: ChainSettings::default(),
            concat_settings: ConcatSettings::default(),
            assembly_settings: AssemblySettings::default(),
            sleeper: Arc::new(TokioSleeper),
            prompts: Vec::new(),
            cancel: CancelFlag::new(),
            tracker: Arc::new(NullTracker),
        }
    }

    /// Take retry, concatenation and assembly settings from `config`.
    pub fn with_config(mut self, config: &Config) -> Result<Self, RunError> {
        self.chain_settings = ChainSettings::from(&config.chain);
        self.concat_settings = ConcatSettings::from(&config.concat);
        self.assembly_settings = AssemblySettings::from_config(config)?;
        Ok(self)
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_prompts(mut self, prompts: Vec<String>) -> Self {
        self.prompts = prompts;
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

    /// Target length for `request`: explicit, or probed from the narration.
    pub async fn resolve_target(&self, request: &RunRequest) -> Result<f64, RunError> {
        if let Some(target) = request.target_secs {
            return Ok(target);
        }
        let Some(audio) = request.audio_path.clone() else {
            return Err(RunError::InvalidRequest(
                "a target duration or a narration file is required".to_string(),
            ));
        };
        let media = Arc::clone(&self.media);
        let info = tokio::task::spawn_blocking(move || media.probe(&audio))
            .await
            .map_err(|e| RunError::Task(e.to_string()))?
            .map_err(RunError::Narration)?;
        log::info!("Target duration from narration: {:.2}s", info.duration_secs);
        Ok(info.duration_secs)
    }

    fn chain_builder(&self, project: &ProjectDir) -> ChainBuilder {
        ChainBuilder::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.media),
            project.segments_dir(),
        )
        .with_settings(self.chain_settings)
        .with_sleeper(Arc::clone(&self.sleeper))
        .with_prompts(self.prompts.clone())
        .with_join_overlap(self.concat_settings.crossfade_secs)
        .with_cancel(self.cancel.clone())
        .with_tracker(Arc::clone(&self.tracker))
    }

    /// Generate the chain for `request` and join it into the project's
    /// `main.mp4`.
    pub async fn generate(
        &self,
        project: &ProjectDir,
        request: &RunRequest,
    ) -> Result<Chain, RunFailure> {
        if request.resume {
            return self.resume(project, request).await;
        }
        let target = self
            .resolve_target(request)
            .await
            .map_err(|error| self.fail(None, "chain", error, None))?;

        let chain = self
            .chain_builder(project)
            .build(&request.source_image, target)
            .await
            .map_err(|failure| self.chain_failed(failure))?;
        self.join(project, chain, target).await
    }

    /// Like [`generate`](Self::generate), but starts from the segments an
    /// earlier run left in `tracker.json`.
    ///
    /// The leading ready segments whose clip and last frame still exist are
    /// kept; generation continues from the first one that is not.
    pub async fn resume(
        &self,
        project: &ProjectDir,
        request: &RunRequest,
    ) -> Result<Chain, RunFailure> {
        let target = self
            .resolve_target(request)
            .await
            .map_err(|error| self.fail(None, "chain", error, None))?;

        let builder = self.chain_builder(project);
        let chain = self
            .restore_chain(&builder, project, request, target)
            .map_err(|error| self.fail(None, "chain", error, None))?;
        let chain = builder
            .resume(chain)
            .await
            .map_err(|failure| self.chain_failed(failure))?;
        self.join(project, chain, target).await
    }

    fn restore_chain(
        &self,
        builder: &ChainBuilder,
        project: &ProjectDir,
        request: &RunRequest,
        target: f64,
    ) -> Result<Chain, RunError> {
        let path = project.path().join(TRACKER_FILE);
        let saved = if path.exists() {
            JsonTracker::load(&path)?.segments
        } else {
            log::warn!("No {} in {}, starting over", TRACKER_FILE, project.path().display());
            Vec::new()
        };

        let mut chain = builder.plan(&request.source_image, target)?;
        let mut reused = 0;
        for (segment, previous) in chain.segments.iter_mut().zip(&saved) {
            let same_slot = previous.index == segment.index
                && previous.provider == segment.provider
                && (previous.planned_secs - segment.planned_secs).abs() < 1e-9;
            if !same_slot || !previous.is_ready() || !previous.files_present() {
                break;
            }
            *segment = previous.clone();
            reused += 1;
        }
        log::info!(
            "Reusing {} of {} segment(s) from {}",
            reused,
            chain.segments.len(),
            path.display()
        );
        Ok(chain)
    }

    /// Join the chain's ready clips into `main.mp4`, trimmed to `target`.
    async fn join(
        &self,
        project: &ProjectDir,
        chain: Chain,
        target: f64,
    ) -> Result<Chain, RunFailure> {
        if self.cancel.is_cancelled() {
            return Err(self.fail(
                Some(chain),
                "concat",
                RunError::Cancelled("concat".to_string()),
                None,
            ));
        }

        let engine = ConcatEngine::new(
            Arc::clone(&self.media),
            self.concat_settings.clone().with_max_duration(Some(target)),
        );
        let inputs = chain.ready_paths();
        let main_path = project.main_path();
        let joined = tokio::task::spawn_blocking(move || engine.concatenate(&inputs, &main_path))
            .await
            .map_err(|e| RunError::Task(e.to_string()))
            .and_then(|r| r.map_err(RunError::from));
        match joined {
            Ok(layout) => {
                log::info!(
                    "Joined {} segment(s) into {} ({:.2}s)",
                    layout.clips.len(),
                    project.main_path().display(),
                    layout.total_secs()
                );
                Ok(chain)
            }
            Err(error) => Err(self.fail(Some(chain), "concat", error, None)),
        }
    }

    /// Full run: generate, join and assemble.
    pub async fn execute(
        &self,
        project: &ProjectDir,
        request: &RunRequest,
    ) -> Result<RunOutput, RunFailure> {
        let chain = self.generate(project, request).await?;

        let plan = request.assembly_plan(project.main_path(), project.final_path());
        let engine = AssemblyEngine::new(Arc::clone(&self.media), self.assembly_settings.clone())
            .with_cancel(self.cancel.clone())
            .with_tracker(Arc::clone(&self.tracker));
        let project_dir = project.path().to_path_buf();

        let assembled = tokio::task::spawn_blocking(move || engine.assemble(&plan, &project_dir))
            .await;
        let assembled = match assembled {
            Ok(result) => result,
            Err(e) => {
                return Err(self.fail(Some(chain), "assembly", RunError::Task(e.to_string()), None))
            }
        };

        match assembled {
            Ok(result) => {
                let final_path = result
                    .final_path
                    .clone()
                    .unwrap_or_else(|| project.final_path());
                let report = RunReport::complete(final_path);
                self.tracker.run_finished(&report);
                log::info!("Run complete");
                Ok(RunOutput {
                    report,
                    chain,
                    assembly: result,
                })
            }
            Err(AssemblyFailure {
                result,
                last_good,
                error,
            }) => {
                let stage = match &error {
                    AssemblyError::Stage { stage, .. } | AssemblyError::Cancelled { stage } => {
                        stage.to_string()
                    }
                    _ => result
                        .failed_stage()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "assembly".to_string()),
                };
                Err(self.fail(Some(chain), &stage, RunError::Assembly(error), last_good))
            }
        }
    }

    fn chain_failed(&self, failure: ChainFailure) -> RunFailure {
        let at = match &failure.error {
            ChainError::SegmentFailed { index, .. } => format!("segment {}", index),
            ChainError::MissingFrame { index } => format!("segment {}", index + 1),
            ChainError::Cancelled { next_index } => format!("segment {}", next_index),
            ChainError::Planning(_) | ChainError::ChainIncomplete { .. } => "chain".to_string(),
        };
        self.fail(Some(failure.chain), &at, RunError::Chain(failure.error), None)
    }

    fn fail(
        &self,
        chain: Option<Chain>,
        at: &str,
        error: RunError,
        partial_path: Option<PathBuf>,
    ) -> RunFailure {
        let status = match &error {
            RunError::Cancelled(_)
            | RunError::Chain(ChainError::Cancelled { .. })
            | RunError::Assembly(AssemblyError::Cancelled { .. }) => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        };
        let report = RunReport {
            status,
            failed_at: Some(at.to_string()),
            error: Some(error.to_string()),
            final_path: None,
            partial_path,
        };
        match status {
            RunStatus::Cancelled => log::warn!("Run cancelled at {}", at),
            _ => log::error!("Run failed at {}: {}", at, error),
        }
        self.tracker.run_finished(&report);
        RunFailure {
            report,
            chain,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Stage;
    use crate::chain::test_support::ScriptedProvider;
    use crate::clock::RecordingSleeper;
    use crate::media::test_support::{info, FakeMedia};
    use crate::planner::SegmentBounds;
    use crate::provider::ProviderError;
    use crate::tracker::{JsonTracker, TrackerStatus};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        media: Arc<FakeMedia>,
        provider: Arc<ScriptedProvider>,
    }

    impl Fixture {
        fn new(provider: ScriptedProvider) -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("art.png"), b"png").unwrap();
            Self {
                dir,
                media: Arc::new(FakeMedia::new()),
                provider: Arc::new(provider),
            }
        }

        fn project(&self) -> ProjectDir {
            ProjectDir::acquire(self.dir.path().join("project")).unwrap()
        }

        fn run(&self) -> ProjectRun {
            ProjectRun::new(self.provider.clone(), self.media.clone())
                .with_sleeper(Arc::new(RecordingSleeper::new()))
        }

        fn request(&self, target: f64) -> RunRequest {
            RunRequest {
                target_secs: Some(target),
                ..RunRequest::new(self.dir.path().join("art.png"))
            }
        }
    }

    #[tokio::test]
    async fn test_run_produces_final_video() {
        let fx = Fixture::new(ScriptedProvider::new(SegmentBounds::fixed(5.0)));
        let project = fx.project();
        let tracker = Arc::new(JsonTracker::create(project.path()).unwrap());

        let output = fx
            .run()
            .with_tracker(tracker.clone())
            .execute(&project, &fx.request(12.0))
            .await
            .unwrap();

        assert_eq!(output.report.status, RunStatus::Complete);
        assert_eq!(output.report.final_path, Some(project.final_path()));
        assert!(project.final_path().exists());
        assert!(project.main_path().exists());
        assert_eq!(output.chain.segments.len(), 3);

        let doc = tracker.document();
        assert_eq!(doc.status, TrackerStatus::Complete);
        assert_eq!(doc.segments.len(), 3);
        assert_eq!(doc.stages.len(), Stage::ALL.len());
    }

    #[tokio::test]
    async fn test_main_video_is_trimmed_to_target() {
        let fx = Fixture::new(ScriptedProvider::new(SegmentBounds::fixed(5.0)));
        let project = fx.project();

        fx.run().generate(&project, &fx.request(12.0)).await.unwrap();

        let concat = fx
            .media
            .commands()
            .into_iter()
            .find(|c| c.iter().any(|a| a.contains("xfade=")))
            .unwrap();
        let graph = concat.iter().find(|a| a.contains("xfade=")).unwrap();
        assert!(graph.contains("[2:v]trim=duration=3.000"));
        assert!(graph.contains("offset=9.000[vout]"));
    }

    #[tokio::test]
    async fn test_segment_failure_reports_index() {
        let provider = ScriptedProvider::new(SegmentBounds::fixed(5.0)).with_script(vec![
            Ok(()),
            Err(ProviderError::InvalidRequest("bad image".to_string())),
        ]);
        let fx = Fixture::new(provider);
        let project = fx.project();
        let tracker = Arc::new(JsonTracker::create(project.path()).unwrap());

        let failure = fx
            .run()
            .with_tracker(tracker.clone())
            .execute(&project, &fx.request(10.0))
            .await
            .unwrap_err();

        assert_eq!(failure.report.status, RunStatus::Failed);
        assert_eq!(failure.report.failed_at.as_deref(), Some("segment 1"));
        assert!(failure.chain.unwrap().segments[0].is_ready());
        assert!(!project.main_path().exists());
        assert_eq!(tracker.document().failed_at.as_deref(), Some("segment 1"));
    }

    #[tokio::test]
    async fn test_resume_continues_after_failed_segment() {
        let provider = ScriptedProvider::new(SegmentBounds::fixed(5.0)).with_script(vec![
            Ok(()),
            Err(ProviderError::InvalidRequest("bad image".to_string())),
        ]);
        let fx = Fixture::new(provider);
        let project = fx.project();
        let tracker = Arc::new(JsonTracker::create(project.path()).unwrap());
        let failure = fx
            .run()
            .with_tracker(tracker)
            .generate(&project, &fx.request(10.0))
            .await
            .unwrap_err();
        assert_eq!(failure.report.failed_at.as_deref(), Some("segment 1"));
        let first = failure.chain.unwrap().segments[0].clone();

        let retry = Arc::new(ScriptedProvider::new(SegmentBounds::fixed(5.0)));
        let tracker = Arc::new(JsonTracker::open(project.path()).unwrap());
        let request = RunRequest {
            resume: true,
            ..fx.request(10.0)
        };
        let chain = ProjectRun::new(retry.clone(), fx.media.clone())
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .with_tracker(tracker.clone())
            .generate(&project, &request)
            .await
            .unwrap();

        let indices: Vec<usize> = retry.requests().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2]);
        let second = &retry.requests()[0];
        assert_eq!(Some(&second.source_frame), first.last_frame.as_ref());
        assert_eq!(second.previous_video_id.as_deref(), Some("video-0"));
        assert_eq!(chain.segments[0], first);
        assert!(chain.is_complete());
        assert!(project.main_path().exists());
        assert_eq!(tracker.document().segments.len(), 3);
    }

    #[tokio::test]
    async fn test_resume_regenerates_segments_with_missing_files() {
        let fx = Fixture::new(ScriptedProvider::new(SegmentBounds::fixed(5.0)));
        let project = fx.project();
        let tracker = Arc::new(JsonTracker::create(project.path()).unwrap());
        let chain = fx
            .run()
            .with_tracker(tracker)
            .generate(&project, &fx.request(10.0))
            .await
            .unwrap();
        let lost = chain.segments[1].output_path.clone().unwrap();
        std::fs::remove_file(&lost).unwrap();

        let retry = Arc::new(ScriptedProvider::new(SegmentBounds::fixed(5.0)));
        let request = RunRequest {
            resume: true,
            ..fx.request(10.0)
        };
        ProjectRun::new(retry.clone(), fx.media.clone())
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .with_tracker(Arc::new(JsonTracker::open(project.path()).unwrap()))
            .resume(&project, &request)
            .await
            .unwrap();

        let indices: Vec<usize> = retry.requests().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert!(lost.exists());
    }

    #[tokio::test]
    async fn test_assembly_failure_reports_stage_and_partial() {
        let fx = Fixture::new(ScriptedProvider::new(SegmentBounds::fixed(5.0)));
        let logo = fx.dir.path().join("logo.png");
        let subs = fx.dir.path().join("subs.srt");
        std::fs::write(&logo, b"png").unwrap();
        std::fs::write(&subs, b"1").unwrap();
        fx.media.fail_on("colorchannelmixer");
        let project = fx.project();

        let request = RunRequest {
            subtitle_path: Some(subs),
            watermark: Some(WatermarkSettings::new(logo)),
            ..fx.request(5.0)
        };
        let failure = fx.run().execute(&project, &request).await.unwrap_err();

        assert_eq!(failure.report.failed_at.as_deref(), Some("watermark"));
        assert_eq!(
            failure.report.partial_path,
            Some(project.path().join("partial_after_subtitles.mp4"))
        );
        assert!(!project.final_path().exists());
        assert!(project.main_path().exists());
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let fx = Fixture::new(ScriptedProvider::new(SegmentBounds::fixed(5.0)));
        let project = fx.project();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let failure = fx
            .run()
            .with_cancel(cancel)
            .execute(&project, &fx.request(10.0))
            .await
            .unwrap_err();

        assert_eq!(failure.report.status, RunStatus::Cancelled);
        assert_eq!(failure.report.failed_at.as_deref(), Some("segment 0"));
        assert!(fx.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_target_from_narration() {
        let fx = Fixture::new(ScriptedProvider::new(SegmentBounds::fixed(5.0)));
        let voice = fx.dir.path().join("voice.mp3");
        std::fs::write(&voice, b"mp3").unwrap();
        fx.media.set_info(&voice, info(0, 0, 8.5, true));

        let request = RunRequest {
            audio_path: Some(voice),
            ..RunRequest::new(fx.dir.path().join("art.png"))
        };
        assert_eq!(fx.run().resolve_target(&request).await.unwrap(), 8.5);

        let missing = RunRequest::new(fx.dir.path().join("art.png"));
        assert!(matches!(
            fx.run().resolve_target(&missing).await,
            Err(RunError::InvalidRequest(_))
        ));
    }
}
