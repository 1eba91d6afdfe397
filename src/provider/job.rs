//! Polling of asynchronous remote generation jobs.

use std::future::Future;
use std::time::Duration;

use super::ProviderError;
use crate::clock::Sleeper;

/// Default polling interval for status checks (10 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of status checks before giving up (15 minutes at 10s).
pub const DEFAULT_MAX_POLLS: u32 = 90;

/// How often and how long to poll a remote job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

/// Provider-neutral status of a remote job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Job is queued.
    Pending,
    /// Video is being generated.
    Running,
    /// Generation finished; the video can be downloaded.
    Succeeded {
        video_url: String,
        /// Backend id of the video, for backends that can extend it later.
        video_id: Option<String>,
    },
    /// The backend reported a failure.
    Failed { reason: String },
}

/// A finished remote video.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedVideo {
    pub url: String,
    pub id: Option<String>,
}

/// Book-keeping for one in-flight provider job.
///
/// Lives only as long as a single provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    pub segment_index: usize,
    pub remote_job_id: String,
    pub poll_count: u32,
    pub max_polls: u32,
    pub last_error: Option<String>,
}

impl GenerationJob {
    pub fn new(segment_index: usize, remote_job_id: impl Into<String>, max_polls: u32) -> Self {
        Self {
            segment_index,
            remote_job_id: remote_job_id.into(),
            poll_count: 0,
            max_polls,
            last_error: None,
        }
    }

    pub fn polls_exhausted(&self) -> bool {
        self.poll_count >= self.max_polls
    }
}

/// Poll `check` until the job finishes, fails, or the poll budget runs out.
///
/// Transient errors from a status check are recorded on the job and count
/// against the budget; any other error ends polling immediately.
pub async fn wait_for_completion<F, Fut>(
    job: &mut GenerationJob,
    interval: Duration,
    sleeper: &dyn Sleeper,
    mut check: F,
) -> Result<CompletedVideo, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobStatus, ProviderError>>,
{
    loop {
        if job.polls_exhausted() {
            log::error!(
                "Segment {} job {} timed out after {} polls",
                job.segment_index,
                job.remote_job_id,
                job.poll_count
            );
            return Err(ProviderError::Timeout {
                polls: job.poll_count,
            });
        }

        job.poll_count += 1;
        match check().await {
            Ok(JobStatus::Pending) => {
                log::debug!("Job {}: pending, waiting...", job.remote_job_id);
            }
            Ok(JobStatus::Running) => {
                log::info!(
                    "Job {}: generating (poll {}/{})",
                    job.remote_job_id,
                    job.poll_count,
                    job.max_polls
                );
            }
            Ok(JobStatus::Succeeded { video_url, video_id }) => {
                log::info!("Job {}: complete", job.remote_job_id);
                return Ok(CompletedVideo {
                    url: video_url,
                    id: video_id,
                });
            }
            Ok(JobStatus::Failed { reason }) => {
                log::error!("Job {}: failed: {}", job.remote_job_id, reason);
                job.last_error = Some(reason.clone());
                return Err(ProviderError::Rejected { reason });
            }
            Err(e @ ProviderError::Transient { .. }) => {
                log::warn!("Job {}: status check failed: {}", job.remote_job_id, e);
                job.last_error = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }

        if !job.polls_exhausted() {
            sleeper.sleep(interval).await;
        }
    }
}
