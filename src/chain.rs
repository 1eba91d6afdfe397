//! Segment chain building.
//!
//! A chain is the ordered list of clips that together cover a target
//! duration. Segment `i` is seeded with the last frame of segment `i - 1`, so
//! segments are generated strictly one after another. Each segment gets a
//! bounded number of attempts with exponential backoff in between; when a
//! segment runs out of attempts the chain stops, keeps every file produced so
//! far and can later be resumed from the failing index.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelFlag;
use crate::clock::{Sleeper, TokioSleeper};
use crate::config::ChainConfig;
use crate::media::{MediaError, MediaInfo, MediaTools};
use crate::planner::{plan_with_overlap, total_secs, PlanningError, SegmentBounds};
use crate::provider::retry::{backoff_for, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_MAX_ATTEMPTS};
use crate::provider::{GeneratedClip, ProviderError, ProviderKind, SegmentRequest, VideoProvider};
use crate::tracker::{NullTracker, ProgressTracker};

/// Prompt used when none is supplied.
pub const DEFAULT_PROMPT: &str = "Slow cinematic camera movement, subtle natural motion";

/// Realized durations may fall this far short of the target, to absorb
/// frame rounding in the generated clips.
pub const DURATION_SLACK_SECS: f64 = 0.25;

/// Lifecycle of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

/// One provider-generated clip in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    /// Image the clip was seeded from; set when generation starts.
    pub source_frame: Option<PathBuf>,
    /// Length the planner asked for.
    pub planned_secs: f64,
    /// Planned length until the clip is ready, then the probed length.
    pub duration_secs: f64,
    pub provider: ProviderKind,
    pub status: SegmentStatus,
    pub attempts: u32,
    pub output_path: Option<PathBuf>,
    /// Final frame of the clip, used to seed the next segment.
    pub last_frame: Option<PathBuf>,
    /// Backend id of the clip, for backends that can extend it.
    #[serde(default)]
    pub remote_video_id: Option<String>,
    pub last_error: Option<String>,
}

impl Segment {
    fn planned(index: usize, planned_secs: f64, provider: ProviderKind) -> Self {
        Self {
            index,
            source_frame: None,
            planned_secs,
            duration_secs: planned_secs,
            provider,
            status: SegmentStatus::Pending,
            attempts: 0,
            output_path: None,
            last_frame: None,
            remote_video_id: None,
            last_error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SegmentStatus::Ready
    }

    /// Whether a ready segment's clip and last frame are still on disk.
    pub fn files_present(&self) -> bool {
        let exists = |p: &Option<PathBuf>| p.as_deref().map(Path::exists).unwrap_or(false);
        exists(&self.output_path) && exists(&self.last_frame)
    }
}

/// Overall state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStatus {
    Building,
    Complete,
    Failed,
    Cancelled,
}

/// The ordered segments covering one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub provider: ProviderKind,
    /// Artwork that seeds segment 0.
    pub source_image: PathBuf,
    pub target_secs: f64,
    /// Allowed overshoot: one maximum-length segment.
    pub tolerance_secs: f64,
    /// Seconds lost at each join when the segments are cross-faded.
    #[serde(default)]
    pub join_overlap_secs: f64,
    pub segments: Vec<Segment>,
    pub status: ChainStatus,
    pub failed_index: Option<usize>,
}

impl Chain {
    /// Sum of the durations of ready segments.
    pub fn realized_secs(&self) -> f64 {
        self.segments
            .iter()
            .filter(|s| s.is_ready())
            .map(|s| s.duration_secs)
            .sum()
    }

    /// Realized length once ready segments are joined with overlapping fades.
    pub fn joined_secs(&self) -> f64 {
        let joins = self.segments.iter().filter(|s| s.is_ready()).count().saturating_sub(1);
        self.realized_secs() - joins as f64 * self.join_overlap_secs
    }

    /// Clip paths of ready segments, in order.
    pub fn ready_paths(&self) -> Vec<PathBuf> {
        self.segments
            .iter()
            .filter(|s| s.is_ready())
            .filter_map(|s| s.output_path.clone())
            .collect()
    }

    /// Index of the first segment that still needs generating.
    pub fn next_pending_index(&self) -> Option<usize> {
        self.segments.iter().position(|s| !s.is_ready())
    }

    pub fn is_complete(&self) -> bool {
        self.status == ChainStatus::Complete
    }

    fn covers_target(&self) -> bool {
        self.joined_secs() + DURATION_SLACK_SECS >= self.target_secs
    }
}

/// Errors from a single generation attempt.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Post-processing failed: {0}")]
    Media(#[from] MediaError),
}

impl SegmentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SegmentError::Provider(e) => e.is_retryable(),
            SegmentError::Media(MediaError::FfmpegNotFound { .. }) => false,
            SegmentError::Media(_) => true,
        }
    }
}

/// Errors that end a chain build.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("Segment {index} failed after {attempts} attempt(s): {source}")]
    SegmentFailed {
        index: usize,
        attempts: u32,
        #[source]
        source: SegmentError,
    },

    #[error("Cancelled before segment {next_index}")]
    Cancelled { next_index: usize },

    #[error("Segment {index} has no last frame to continue from")]
    MissingFrame { index: usize },

    #[error("Chain incomplete: realized {realized:.2}s of {target:.2}s (tolerance {tolerance:.2}s)")]
    ChainIncomplete {
        realized: f64,
        target: f64,
        tolerance: f64,
    },
}

/// A failed or cancelled chain, returned with its error so it can be resumed.
#[derive(Debug)]
pub struct ChainFailure {
    pub chain: Chain,
    pub error: ChainError,
}

impl std::fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for ChainFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Retry policy for segment generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl From<&ChainConfig> for ChainSettings {
    fn from(config: &ChainConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

/// File name of the clip for segment `index`.
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{:03}.mp4", index)
}

/// File name of the extracted last frame for segment `index`.
pub fn last_frame_file_name(index: usize) -> String {
    format!("last_frame_{:03}.jpg", index)
}

/// Drives a provider through all segments of a chain.
pub struct ChainBuilder {
    provider: Arc<dyn VideoProvider>,
    media: Arc<dyn MediaTools>,
    sleeper: Arc<dyn Sleeper>,
    settings: ChainSettings,
    segment_dir: PathBuf,
    join_overlap_secs: f64,
    prompts: Vec<String>,
    cancel: CancelFlag,
    tracker: Arc<dyn ProgressTracker>,
}

impl ChainBuilder {
    pub fn new(
        provider: Arc<dyn VideoProvider>,
        media: Arc<dyn MediaTools>,
        segment_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            media,
            sleeper: Arc::new(TokioSleeper),
            settings: ChainSettings::default(),
            segment_dir: segment_dir.into(),
            join_overlap_secs: 0.0,
            prompts: vec![DEFAULT_PROMPT.to_string()],
            cancel: CancelFlag::new(),
            tracker: Arc::new(NullTracker),
        }
    }

    pub fn with_settings(mut self, settings: ChainSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Prompts per segment; the last one is reused for later segments.
    pub fn with_prompts(mut self, prompts: Vec<String>) -> Self {
        if !prompts.is_empty() {
            self.prompts = prompts;
        }
        self
    }

    /// Plan extra length for the cross-fade that will overlap each join.
    pub fn with_join_overlap(mut self, secs: f64) -> Self {
        self.join_overlap_secs = secs.max(0.0);
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

    /// Report a segment change from a blocking thread; trackers may write
    /// to disk.
    async fn report(&self, segment: &Segment) {
        let tracker = Arc::clone(&self.tracker);
        let segment = segment.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || tracker.segment_updated(&segment)).await
        {
            log::warn!("Tracker update failed: {}", e);
        }
    }

    fn prompt_for(&self, index: usize) -> &str {
        self.prompts
            .get(index)
            .or_else(|| self.prompts.last())
            .map(String::as_str)
            .unwrap_or(DEFAULT_PROMPT)
    }

    /// Plan a chain of pending segments without generating anything.
    pub fn plan(&self, source_image: &Path, target_secs: f64) -> Result<Chain, ChainError> {
        let bounds: SegmentBounds = self.provider.bounds();
        let lengths = plan_with_overlap(target_secs, &bounds, self.join_overlap_secs)?;
        let kind = self.provider.kind();

        log::info!(
            "Planned {} segment(s) for {:.2}s with {}: {:?} (total {:.2}s)",
            lengths.len(),
            target_secs,
            kind,
            lengths,
            total_secs(&lengths)
        );

        Ok(Chain {
            provider: kind,
            source_image: source_image.to_path_buf(),
            target_secs,
            tolerance_secs: bounds.max_secs,
            join_overlap_secs: self.join_overlap_secs,
            segments: lengths
                .iter()
                .enumerate()
                .map(|(i, len)| Segment::planned(i, *len, kind))
                .collect(),
            status: ChainStatus::Building,
            failed_index: None,
        })
    }

    /// Plan and generate a full chain.
    pub async fn build(&self, source_image: &Path, target_secs: f64) -> Result<Chain, ChainFailure> {
        let chain = match self.plan(source_image, target_secs) {
            Ok(chain) => chain,
            Err(error) => {
                let chain = Chain {
                    provider: self.provider.kind(),
                    source_image: source_image.to_path_buf(),
                    target_secs,
                    tolerance_secs: 0.0,
                    join_overlap_secs: self.join_overlap_secs,
                    segments: Vec::new(),
                    status: ChainStatus::Failed,
                    failed_index: None,
                };
                return Err(ChainFailure { chain, error });
            }
        };
        self.drive(chain).await
    }

    /// Continue a failed or cancelled chain from its first non-ready segment.
    ///
    /// Ready segments and their files are reused as they are.
    pub async fn resume(&self, mut chain: Chain) -> Result<Chain, ChainFailure> {
        if let Some(index) = chain.next_pending_index() {
            log::info!("Resuming chain at segment {}", index);
        }
        chain.failed_index = None;
        self.drive(chain).await
    }

    async fn drive(&self, mut chain: Chain) -> Result<Chain, ChainFailure> {
        chain.status = ChainStatus::Building;
        std::fs::create_dir_all(&self.segment_dir).map_err(|e| ChainFailure {
            chain: chain.clone(),
            error: ChainError::SegmentFailed {
                index: chain.next_pending_index().unwrap_or(0),
                attempts: 0,
                source: SegmentError::Media(MediaError::Io(e)),
            },
        })?;

        for index in 0..chain.segments.len() {
            if chain.segments[index].is_ready() {
                continue;
            }

            if self.cancel.is_cancelled() {
                log::warn!("Chain cancelled before segment {}", index);
                chain.status = ChainStatus::Cancelled;
                return Err(ChainFailure {
                    chain,
                    error: ChainError::Cancelled { next_index: index },
                });
            }

            let previous_video_id = match index {
                0 => None,
                _ => chain.segments[index - 1].remote_video_id.clone(),
            };
            let source = if index == 0 {
                chain.source_image.clone()
            } else {
                match chain.segments[index - 1].last_frame.clone() {
                    Some(frame) => frame,
                    None => {
                        chain.status = ChainStatus::Failed;
                        chain.failed_index = Some(index);
                        return Err(ChainFailure {
                            chain,
                            error: ChainError::MissingFrame { index: index - 1 },
                        });
                    }
                }
            };

            if let Err(error) = self
                .generate_with_retry(&mut chain.segments[index], source, previous_video_id)
                .await
            {
                chain.status = ChainStatus::Failed;
                chain.failed_index = Some(index);
                return Err(ChainFailure { chain, error });
            }
        }

        if !chain.covers_target() {
            let error = ChainError::ChainIncomplete {
                realized: chain.realized_secs(),
                target: chain.target_secs,
                tolerance: chain.tolerance_secs,
            };
            log::error!("{}", error);
            chain.status = ChainStatus::Failed;
            return Err(ChainFailure { chain, error });
        }

        chain.status = ChainStatus::Complete;
        log::info!(
            "Chain complete: {} segment(s), {:.2}s realized for {:.2}s target",
            chain.segments.len(),
            chain.realized_secs(),
            chain.target_secs
        );
        Ok(chain)
    }

    async fn generate_with_retry(
        &self,
        segment: &mut Segment,
        source: PathBuf,
        previous_video_id: Option<String>,
    ) -> Result<(), ChainError> {
        let max_attempts = self.settings.max_attempts.max(1);
        segment.source_frame = Some(source.clone());
        segment.attempts = 0;

        let request = SegmentRequest {
            index: segment.index,
            source_frame: source,
            duration_secs: segment.planned_secs,
            prompt: self.prompt_for(segment.index).to_string(),
            previous_video_id,
            output_path: self.segment_dir.join(segment_file_name(segment.index)),
        };

        for attempt in 1..=max_attempts {
            segment.status = SegmentStatus::Generating;
            segment.attempts = attempt;
            self.report(segment).await;
            log::info!(
                "Generating segment {} (attempt {}/{})",
                segment.index,
                attempt,
                max_attempts
            );

            match self.generate_once(&request).await {
                Ok((clip, info, frame)) => {
                    segment.status = SegmentStatus::Ready;
                    segment.output_path = Some(clip.path);
                    segment.duration_secs = info.duration_secs;
                    segment.last_frame = Some(frame);
                    segment.remote_video_id = clip.remote_video_id;
                    segment.last_error = None;
                    self.report(segment).await;
                    log::info!(
                        "Segment {} ready ({:.2}s realized, {:.2}s planned)",
                        segment.index,
                        info.duration_secs,
                        segment.planned_secs
                    );
                    return Ok(());
                }
                Err(error) => {
                    segment.status = SegmentStatus::Failed;
                    segment.last_error = Some(error.to_string());
                    self.report(segment).await;

                    if !error.is_retryable() || attempt == max_attempts {
                        log::error!(
                            "Segment {} failed after {} attempt(s): {}",
                            segment.index,
                            attempt,
                            error
                        );
                        return Err(ChainError::SegmentFailed {
                            index: segment.index,
                            attempts: attempt,
                            source: error,
                        });
                    }

                    let delay = match &error {
                        SegmentError::Provider(e) => backoff_for(
                            e,
                            attempt - 1,
                            self.settings.backoff_base,
                            self.settings.backoff_max,
                        ),
                        SegmentError::Media(_) => crate::provider::retry::calculate_backoff(
                            attempt - 1,
                            self.settings.backoff_base,
                            self.settings.backoff_max,
                        ),
                    };
                    log::warn!(
                        "Segment {} attempt {} failed: {}. Retrying in {:?}",
                        segment.index,
                        attempt,
                        error,
                        delay
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }

        // The loop always returns on its last attempt.
        Err(ChainError::SegmentFailed {
            index: segment.index,
            attempts: max_attempts,
            source: SegmentError::Provider(ProviderError::InvalidRequest(
                "no attempts made".to_string(),
            )),
        })
    }

    async fn generate_once(
        &self,
        request: &SegmentRequest,
    ) -> Result<(GeneratedClip, MediaInfo, PathBuf), SegmentError> {
        let clip = self.provider.generate_segment(request).await?;

        let media = Arc::clone(&self.media);
        let clip_path = clip.path.clone();
        let frame_path = self.segment_dir.join(last_frame_file_name(request.index));

        let (info, frame) = tokio::task::spawn_blocking(move || {
            let info = media.probe(&clip_path)?;
            let frame = media.extract_last_frame(&clip_path, &frame_path)?;
            Ok::<_, MediaError>((info, frame))
        })
        .await
        .map_err(|e| MediaError::Io(std::io::Error::other(e.to_string())))??;

        Ok((clip, info, frame))
    }
}
