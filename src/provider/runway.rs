//! Runway image-to-video backend.
//!
//! Every call yields a clip of the configured fixed length; longer videos are
//! built by the chain builder from successive last frames.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::download::download_video;
use super::job::{wait_for_completion, GenerationJob, JobStatus, PollPolicy};
use super::retry::error_for_response;
use super::{GeneratedClip, ProviderError, ProviderKind, SegmentRequest, VideoProvider};
use crate::clock::Sleeper;
use crate::config::RunwayConfig;
use crate::planner::SegmentBounds;

/// Environment variable holding the Runway API key.
pub const RUNWAY_API_KEY_ENV: &str = "RUNWAY_API_KEY";

/// API version header value.
pub const RUNWAY_API_VERSION: &str = "2024-11-06";

/// Ratios the image-to-video endpoint accepts.
const VALID_RATIOS: &[&str] = &[
    "1280:720", "720:1280", "1104:832", "832:1104", "960:960", "1584:672",
];

/// Fallback output ratio.
const DEFAULT_RATIO: &str = "1280:720";

/// Default timeout for HTTP requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Map an aspect ratio such as `16:9` to a pixel ratio the API accepts.
pub fn normalize_ratio(ratio: &str) -> &'static str {
    let ratio = ratio.trim();
    if let Some(valid) = VALID_RATIOS.iter().find(|r| **r == ratio) {
        return *valid;
    }
    match ratio {
        "16:9" => "1280:720",
        "9:16" => "720:1280",
        "1:1" => "960:960",
        "4:3" => "1104:832",
        "3:4" => "832:1104",
        _ => DEFAULT_RATIO,
    }
}

/// MIME type for an image path, guessed from its extension.
fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Encode an image file as a `data:` URI.
pub async fn image_data_uri(path: &Path) -> Result<String, ProviderError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(format!(
        "data:{};base64,{}",
        image_mime(path),
        STANDARD.encode(bytes)
    ))
}

/// Request body for image-to-video generation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    model: &'a str,
    prompt_image: String,
    prompt_text: &'a str,
    ratio: &'a str,
    duration: u32,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: String,
    #[serde(default)]
    output: Vec<String>,
    #[serde(default)]
    failure: Option<String>,
}

/// Client for the Runway video generation API.
pub struct RunwayClient {
    api_key: String,
    base_url: String,
    model: String,
    ratio: &'static str,
    clip_secs: u32,
    poll: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
    http_client: reqwest::Client,
}

impl RunwayClient {
    /// Create a client reading the API key from `RUNWAY_API_KEY`.
    pub fn new(
        config: &RunwayConfig,
        poll: PollPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, ProviderError> {
        let api_key = std::env::var(RUNWAY_API_KEY_ENV).map_err(|_| {
            ProviderError::MissingCredentials {
                provider: ProviderKind::Runway,
            }
        })?;
        Self::with_api_key(api_key, config, poll, sleeper)
    }

    /// Create a client with an explicit API key.
    pub fn with_api_key(
        api_key: String,
        config: &RunwayConfig,
        poll: PollPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::MissingCredentials {
                provider: ProviderKind::Runway,
            });
        }
        if config.clip_secs != 5 && config.clip_secs != 10 {
            return Err(ProviderError::InvalidRequest(format!(
                "Runway clip length must be 5 or 10 seconds, got {}",
                config.clip_secs
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            ratio: normalize_ratio(&config.ratio),
            clip_secs: config.clip_secs,
            poll,
            sleeper,
            http_client,
        })
    }

    /// Output ratio sent with every request.
    pub fn ratio(&self) -> &str {
        self.ratio
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Runway-Version", RUNWAY_API_VERSION)
    }

    /// Submit an image-to-video task and return its id.
    pub async fn submit_generation(&self, image: &Path, prompt: &str) -> Result<String, ProviderError> {
        let body = SubmitRequest {
            model: &self.model,
            prompt_image: image_data_uri(image).await?,
            prompt_text: prompt,
            ratio: self.ratio,
            duration: self.clip_secs,
        };

        let response = self
            .request(
                self.http_client
                    .post(format!("{}/v1/image_to_video", self.base_url)),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_response(response, "Runway submit").await);
        }

        let submitted: SubmitResponse = response.json().await?;
        Ok(submitted.id)
    }

    /// Check the status of a submitted task.
    pub async fn poll_status(&self, task_id: &str) -> Result<JobStatus, ProviderError> {
        let response = self
            .request(
                self.http_client
                    .get(format!("{}/v1/tasks/{}", self.base_url, task_id)),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_response(response, "Runway status check").await);
        }

        let task: TaskResponse = response.json().await?;
        match task.status.to_uppercase().as_str() {
            "PENDING" | "THROTTLED" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => task
                .output
                .into_iter()
                .next()
                .map(|video_url| JobStatus::Succeeded {
                    video_url,
                    video_id: None,
                })
                .ok_or_else(|| {
                    ProviderError::Protocol("Runway task succeeded without output".into())
                }),
            "FAILED" | "CANCELLED" => Ok(JobStatus::Failed {
                reason: task
                    .failure
                    .unwrap_or_else(|| format!("Task {}", task.status.to_lowercase())),
            }),
            unknown => Err(ProviderError::Protocol(format!(
                "Unknown task status: {}",
                unknown
            ))),
        }
    }
}

#[async_trait]
impl VideoProvider for RunwayClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Runway
    }

    fn bounds(&self) -> SegmentBounds {
        SegmentBounds::fixed(self.clip_secs as f64)
    }

    async fn generate_segment(
        &self,
        request: &SegmentRequest,
    ) -> Result<GeneratedClip, ProviderError> {
        log::info!(
            "Runway: submitting segment {} ({}s clip)",
            request.index,
            self.clip_secs
        );
        let task_id = self
            .submit_generation(&request.source_frame, &request.prompt)
            .await?;
        log::info!("Runway: segment {} submitted, id: {}", request.index, task_id);

        let mut job = GenerationJob::new(request.index, task_id.clone(), self.poll.max_polls);
        let video = wait_for_completion(&mut job, self.poll.interval, &*self.sleeper, || {
            self.poll_status(&task_id)
        })
        .await?;

        let path = download_video(&self.http_client, &video.url, &request.output_path).await?;
        log::info!("Runway: segment {} downloaded to {}", request.index, path.display());

        Ok(GeneratedClip {
            path,
            remote_job_id: task_id,
            remote_video_id: None,
            requested_secs: self.clip_secs as f64,
        })
    }
}
