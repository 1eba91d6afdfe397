//! Video generation backends.
//!
//! A provider turns a still frame plus a duration into a downloaded clip. The
//! chain builder only sees the [`VideoProvider`] trait; Kling and Runway are
//! the two concrete backends.

mod download;
mod job;
pub mod kling;
pub mod retry;
pub mod runway;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::planner::SegmentBounds;

pub use download::download_video;
pub use job::{wait_for_completion, CompletedVideo, GenerationJob, JobStatus, PollPolicy};
pub use kling::KlingClient;
pub use runway::RunwayClient;

/// The supported generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Animates and extends an image to the requested length in one job.
    Kling,
    /// Emits fixed-length clips; longer videos are chained from last frames.
    Runway,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Kling => write!(f, "kling"),
            ProviderKind::Runway => write!(f, "runway"),
        }
    }
}

/// One call's worth of work for a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub index: usize,
    /// Image that seeds the clip: the artwork for segment 0, otherwise the
    /// previous segment's last frame.
    pub source_frame: PathBuf,
    pub duration_secs: f64,
    pub prompt: String,
    /// Backend id of the previous segment's video, when the backend
    /// returned one.
    pub previous_video_id: Option<String>,
    /// Where the downloaded clip must be written.
    pub output_path: PathBuf,
}

/// A clip produced and downloaded by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedClip {
    pub path: PathBuf,
    pub remote_job_id: String,
    /// Backend id of the generated video, if the backend exposes one.
    pub remote_video_id: Option<String>,
    /// Duration actually requested from the backend after rounding.
    pub requested_secs: f64,
}

/// A video generation backend.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Per-call duration capability used by the planner.
    fn bounds(&self) -> SegmentBounds;

    /// Generate one clip and download it to `request.output_path`.
    async fn generate_segment(&self, request: &SegmentRequest)
        -> Result<GeneratedClip, ProviderError>;
}

/// Errors that can occur while talking to a provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Transient provider error: {message}")]
    Transient {
        message: String,
        /// Retry-After header value in seconds, if provided
        retry_after_secs: Option<u64>,
    },

    #[error("Generation timed out after {polls} polls")]
    Timeout { polls: u32 },

    #[error("Generation rejected: {reason}")]
    Rejected { reason: String },

    #[error("{provider} credentials not configured")]
    MissingCredentials { provider: ProviderKind },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected provider response: {0}")]
    Protocol(String),
}

impl ProviderError {
    /// Whether the chain builder should try the segment again.
    ///
    /// Network hiccups, poll timeouts and remote refusals are retried up to
    /// the attempt limit; local and protocol problems are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::Rejected { .. }
        )
    }

    pub(crate) fn transient(message: impl Into<String>) -> Self {
        ProviderError::Transient {
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if retry::is_transient_network_error(&error) {
            ProviderError::transient(error.to_string())
        } else if error.is_decode() {
            ProviderError::Protocol(error.to_string())
        } else if error.is_builder() {
            ProviderError::InvalidRequest(error.to_string())
        } else {
            ProviderError::transient(error.to_string())
        }
    }
}
