//! Kling image-to-video backend.
//!
//! One job animates the source image straight to the requested length, so a
//! chain usually needs fewer calls than with fixed-length backends. Later
//! segments continue the previous video through `video-extend` when the
//! previous result carried a video id.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::download::download_video;
use super::job::{wait_for_completion, GenerationJob, JobStatus, PollPolicy};
use super::retry::error_for_response;
use super::{GeneratedClip, ProviderError, ProviderKind, SegmentRequest, VideoProvider};
use crate::clock::Sleeper;
use crate::config::KlingConfig;
use crate::planner::SegmentBounds;

/// Environment variable holding the Kling access key.
pub const KLING_ACCESS_KEY_ENV: &str = "KLING_ACCESS_KEY";

/// Environment variable holding the Kling secret key.
pub const KLING_SECRET_KEY_ENV: &str = "KLING_SECRET_KEY";

/// Token lifetime in seconds.
const TOKEN_TTL_SECS: u64 = 1800;

/// Tolerated clock skew for `nbf`.
const TOKEN_SKEW_SECS: u64 = 5;

/// Durations the API accepts, in seconds.
const SUPPORTED_DURATIONS: [u32; 2] = [5, 10];

/// Default timeout for HTTP requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
struct JwtHeader<'a> {
    alg: &'a str,
    typ: &'a str,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct JwtClaims {
    pub iss: String,
    pub exp: u64,
    pub nbf: u64,
}

/// Build an HS256 JWT for the Kling API.
pub fn encode_jwt(access_key: &str, secret_key: &str, now_secs: u64) -> Result<String, ProviderError> {
    let header = JwtHeader {
        alg: "HS256",
        typ: "JWT",
    };
    let claims = JwtClaims {
        iss: access_key.to_string(),
        exp: now_secs + TOKEN_TTL_SECS,
        nbf: now_secs.saturating_sub(TOKEN_SKEW_SECS),
    };

    let signing_input = format!("{}.{}", encode_part(&header)?, encode_part(&claims)?);
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ProviderError::InvalidRequest(format!("Invalid secret key: {}", e)))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

fn encode_part<T: Serialize>(value: &T) -> Result<String, ProviderError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| ProviderError::InvalidRequest(format!("Failed to encode token: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Round a planned length up to the nearest duration the API accepts.
pub fn api_duration(requested_secs: f64) -> u32 {
    SUPPORTED_DURATIONS
        .iter()
        .copied()
        .find(|d| requested_secs <= *d as f64 + crate::planner::DURATION_EPSILON)
        .unwrap_or(SUPPORTED_DURATIONS[SUPPORTED_DURATIONS.len() - 1])
}

/// The two task families the client submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlingTask {
    ImageToVideo,
    Extend,
}

impl KlingTask {
    fn path(self) -> &'static str {
        match self {
            KlingTask::ImageToVideo => "/v1/videos/image2video",
            KlingTask::Extend => "/v1/videos/video-extend",
        }
    }
}

/// Request body for image-to-video generation.
#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    model_name: &'a str,
    /// Base64-encoded image bytes.
    image: String,
    prompt: &'a str,
    duration: String,
    mode: &'a str,
}

/// Envelope every Kling response is wrapped in.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

/// Request body for extending an earlier video.
#[derive(Debug, Serialize)]
struct ExtendRequest<'a> {
    video_id: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task_status: String,
    #[serde(default)]
    task_status_msg: Option<String>,
    #[serde(default)]
    task_result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    videos: Vec<TaskVideo>,
}

#[derive(Debug, Deserialize)]
struct TaskVideo {
    #[serde(default)]
    id: Option<String>,
    url: String,
}

/// Client for the Kling video generation API.
pub struct KlingClient {
    access_key: String,
    secret_key: String,
    base_url: String,
    model: String,
    mode: String,
    extend: bool,
    bounds: SegmentBounds,
    poll: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
    http_client: reqwest::Client,
}

impl KlingClient {
    /// Create a client reading credentials from the environment.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::MissingCredentials` if either
    /// `KLING_ACCESS_KEY` or `KLING_SECRET_KEY` is not set.
    pub fn new(
        config: &KlingConfig,
        poll: PollPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, ProviderError> {
        let missing = || ProviderError::MissingCredentials {
            provider: ProviderKind::Kling,
        };
        let access_key = std::env::var(KLING_ACCESS_KEY_ENV).map_err(|_| missing())?;
        let secret_key = std::env::var(KLING_SECRET_KEY_ENV).map_err(|_| missing())?;
        Self::with_credentials(access_key, secret_key, config, poll, sleeper)
    }

    /// Create a client with explicit credentials.
    pub fn with_credentials(
        access_key: String,
        secret_key: String,
        config: &KlingConfig,
        poll: PollPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, ProviderError> {
        if access_key.is_empty() || secret_key.is_empty() {
            return Err(ProviderError::MissingCredentials {
                provider: ProviderKind::Kling,
            });
        }

        let bounds = SegmentBounds::variable(config.min_secs, config.max_secs);
        bounds
            .validate()
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
        let (lowest, highest) = (
            SUPPORTED_DURATIONS[0] as f64,
            SUPPORTED_DURATIONS[SUPPORTED_DURATIONS.len() - 1] as f64,
        );
        if bounds.min_secs < lowest || bounds.max_secs > highest {
            return Err(ProviderError::InvalidRequest(format!(
                "Kling segment bounds [{}, {}] must lie within [{}, {}]",
                bounds.min_secs, bounds.max_secs, lowest, highest
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            access_key,
            secret_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            mode: config.mode.clone(),
            extend: config.extend,
            bounds,
            poll,
            sleeper,
            http_client,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_header(&self) -> Result<String, ProviderError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(format!(
            "Bearer {}",
            encode_jwt(&self.access_key, &self.secret_key, now)?
        ))
    }

    /// Submit an image-to-video task and return its task id.
    pub async fn submit_generation(
        &self,
        image: &Path,
        prompt: &str,
        duration_secs: u32,
    ) -> Result<String, ProviderError> {
        let image_bytes = tokio::fs::read(image).await?;
        let body = SubmitRequest {
            model_name: &self.model,
            image: STANDARD.encode(image_bytes),
            prompt,
            duration: duration_secs.to_string(),
            mode: &self.mode,
        };
        self.submit(KlingTask::ImageToVideo, &body).await
    }

    /// Submit a task continuing the video `video_id` and return its task id.
    pub async fn submit_extension(
        &self,
        video_id: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        self.submit(KlingTask::Extend, &ExtendRequest { video_id, prompt })
            .await
    }

    async fn submit<B: Serialize>(&self, task: KlingTask, body: &B) -> Result<String, ProviderError> {
        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, task.path()))
            .header("Authorization", self.auth_header()?)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_response(response, "Kling submit").await);
        }

        let envelope: Envelope<SubmitData> = response.json().await?;
        if envelope.code != 0 {
            return Err(rejected(envelope.code, envelope.message));
        }
        envelope
            .data
            .map(|d| d.task_id)
            .ok_or_else(|| ProviderError::Protocol("Kling submit response has no task_id".into()))
    }

    /// Check the status of a submitted task.
    pub async fn poll_status(&self, task: KlingTask, task_id: &str) -> Result<JobStatus, ProviderError> {
        let response = self
            .http_client
            .get(format!("{}{}/{}", self.base_url, task.path(), task_id))
            .header("Authorization", self.auth_header()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_response(response, "Kling status check").await);
        }

        let envelope: Envelope<TaskData> = response.json().await?;
        if envelope.code != 0 {
            return Err(rejected(envelope.code, envelope.message));
        }
        let data = envelope
            .data
            .ok_or_else(|| ProviderError::Protocol("Kling status response has no data".into()))?;

        match data.task_status.as_str() {
            "submitted" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Running),
            "succeed" => data
                .task_result
                .and_then(|r| r.videos.into_iter().next())
                .map(|v| JobStatus::Succeeded {
                    video_url: v.url,
                    video_id: v.id,
                })
                .ok_or_else(|| {
                    ProviderError::Protocol("Kling task succeeded without a video".into())
                }),
            "failed" => Ok(JobStatus::Failed {
                reason: data
                    .task_status_msg
                    .unwrap_or_else(|| "Unknown error occurred during generation".to_string()),
            }),
            unknown => Err(ProviderError::Protocol(format!(
                "Unknown task status: {}",
                unknown
            ))),
        }
    }
}

fn rejected(code: i64, message: Option<String>) -> ProviderError {
    ProviderError::Rejected {
        reason: format!("Kling error {}: {}", code, message.unwrap_or_default()),
    }
}

#[async_trait]
impl VideoProvider for KlingClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Kling
    }

    fn bounds(&self) -> SegmentBounds {
        self.bounds
    }

    async fn generate_segment(
        &self,
        request: &SegmentRequest,
    ) -> Result<GeneratedClip, ProviderError> {
        if !self.bounds.contains(request.duration_secs) {
            return Err(ProviderError::InvalidRequest(format!(
                "Duration {}s outside [{}, {}]",
                request.duration_secs, self.bounds.min_secs, self.bounds.max_secs
            )));
        }
        let duration = api_duration(request.duration_secs);

        let extend_from = request
            .previous_video_id
            .as_deref()
            .filter(|_| self.extend && request.index > 0);
        let (task, task_id) = match extend_from {
            Some(video_id) => {
                log::info!(
                    "Kling: extending video {} for segment {}",
                    video_id,
                    request.index
                );
                let id = self.submit_extension(video_id, &request.prompt).await?;
                (KlingTask::Extend, id)
            }
            None => {
                log::info!(
                    "Kling: submitting segment {} ({}s requested as {}s)",
                    request.index,
                    request.duration_secs,
                    duration
                );
                let id = self
                    .submit_generation(&request.source_frame, &request.prompt, duration)
                    .await?;
                (KlingTask::ImageToVideo, id)
            }
        };
        log::info!("Kling: segment {} submitted, task_id: {}", request.index, task_id);

        let mut job = GenerationJob::new(request.index, task_id.clone(), self.poll.max_polls);
        let video = wait_for_completion(&mut job, self.poll.interval, &*self.sleeper, || {
            self.poll_status(task, &task_id)
        })
        .await?;

        let path = download_video(&self.http_client, &video.url, &request.output_path).await?;
        log::info!("Kling: segment {} downloaded to {}", request.index, path.display());

        Ok(GeneratedClip {
            path,
            remote_job_id: task_id,
            remote_video_id: video.id,
            requested_secs: duration as f64,
        })
    }
}
