//! Mock HTTP tests for the Kling and Runway clients.
//!
//! These tests cover:
//! - Request shape and authentication headers
//! - Status mapping while polling
//! - Error classification (transient, rejected, timeout)
//! - Downloading the finished clip

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reelsmith::clock::RecordingSleeper;
use reelsmith::config::{KlingConfig, RunwayConfig};
use reelsmith::provider::kling::JwtClaims;
use reelsmith::provider::runway::RUNWAY_API_VERSION;
use reelsmith::provider::{
    KlingClient, PollPolicy, ProviderError, ProviderKind, RunwayClient, SegmentRequest,
    VideoProvider,
};

const VIDEO_BYTES: &[u8] = b"fake mp4 payload";

fn fast_poll(max_polls: u32) -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(5),
        max_polls,
    }
}

fn kling(server: &MockServer, poll: PollPolicy, sleeper: Arc<RecordingSleeper>) -> KlingClient {
    let config = KlingConfig {
        base_url: server.uri(),
        ..KlingConfig::default()
    };
    KlingClient::with_credentials("ak".to_string(), "sk".to_string(), &config, poll, sleeper)
        .unwrap()
}

fn runway(server: &MockServer, poll: PollPolicy, sleeper: Arc<RecordingSleeper>) -> RunwayClient {
    let config = RunwayConfig {
        base_url: server.uri(),
        ..RunwayConfig::default()
    };
    RunwayClient::with_api_key("rw-key".to_string(), &config, poll, sleeper).unwrap()
}

fn request(dir: &TempDir, index: usize, duration_secs: f64) -> SegmentRequest {
    let frame = dir.path().join("source.png");
    std::fs::write(&frame, b"png bytes").unwrap();
    SegmentRequest {
        index,
        source_frame: frame,
        duration_secs,
        prompt: "slow push in".to_string(),
        previous_video_id: None,
        output_path: dir.path().join(format!("segment_{:03}.mp4", index)),
    }
}

async fn mount_video(server: &MockServer) -> String {
    Mock::given(method("GET"))
        .and(path("/files/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(VIDEO_BYTES))
        .mount(server)
        .await;
    format!("{}/files/clip.mp4", server.uri())
}

fn kling_task(status: &str) -> serde_json::Value {
    serde_json::json!({
        "code": 0,
        "message": "SUCCEED",
        "data": { "task_id": "kt-1", "task_status": status }
    })
}

// === Kling ===

#[tokio::test]
async fn test_kling_full_segment_rounds_duration_and_downloads() {
    let server = MockServer::start().await;
    let video_url = mount_video(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .and(body_partial_json(serde_json::json!({
            "model_name": "kling-v1",
            "duration": "10",
            "mode": "std",
            "prompt": "slow push in"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": { "task_id": "kt-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/videos/image2video/kt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kling_task("submitted")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/image2video/kt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kling_task("processing")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/image2video/kt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": {
                "task_id": "kt-1",
                "task_status": "succeed",
                "task_result": { "videos": [{ "id": "v1", "url": video_url }] }
            }
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let sleeper = Arc::new(RecordingSleeper::new());
    let client = kling(&server, fast_poll(10), sleeper.clone());

    let clip = client.generate_segment(&request(&dir, 0, 7.0)).await.unwrap();

    assert_eq!(clip.remote_job_id, "kt-1");
    assert_eq!(clip.remote_video_id.as_deref(), Some("v1"));
    assert_eq!(clip.requested_secs, 10.0);
    assert_eq!(clip.path, dir.path().join("segment_000.mp4"));
    assert_eq!(std::fs::read(&clip.path).unwrap(), VIDEO_BYTES);
    // Two unfinished polls, each followed by one wait.
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(5); 2]);
    assert!(!dir.path().join("segment_000.part").exists());
}

fn kling_done(task_id: &str, video_id: &str, video_url: &str) -> serde_json::Value {
    serde_json::json!({
        "code": 0,
        "data": {
            "task_id": task_id,
            "task_status": "succeed",
            "task_result": { "videos": [{ "id": video_id, "url": video_url }] }
        }
    })
}

#[tokio::test]
async fn test_kling_later_segment_extends_previous_video() {
    let server = MockServer::start().await;
    let video_url = mount_video(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/videos/video-extend"))
        .and(body_partial_json(serde_json::json!({
            "video_id": "v1",
            "prompt": "slow push in"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": { "task_id": "kt-2" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/video-extend/kt-2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(kling_done("kt-2", "v2", &video_url)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = kling(&server, fast_poll(3), Arc::new(RecordingSleeper::new()));
    let req = SegmentRequest {
        previous_video_id: Some("v1".to_string()),
        ..request(&dir, 1, 5.0)
    };

    let clip = client.generate_segment(&req).await.unwrap();

    assert_eq!(clip.remote_job_id, "kt-2");
    assert_eq!(clip.remote_video_id.as_deref(), Some("v2"));
    assert_eq!(std::fs::read(&clip.path).unwrap(), VIDEO_BYTES);
    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert!(body.get("image").is_none());
}

#[tokio::test]
async fn test_kling_without_extend_uses_last_frame() {
    let server = MockServer::start().await;
    let video_url = mount_video(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": { "task_id": "kt-3" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/image2video/kt-3"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(kling_done("kt-3", "v3", &video_url)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/video-extend"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let config = KlingConfig {
        base_url: server.uri(),
        extend: false,
        ..KlingConfig::default()
    };
    let client = KlingClient::with_credentials(
        "ak".to_string(),
        "sk".to_string(),
        &config,
        fast_poll(3),
        Arc::new(RecordingSleeper::new()),
    )
    .unwrap();
    let dir = TempDir::new().unwrap();
    let req = SegmentRequest {
        previous_video_id: Some("v1".to_string()),
        ..request(&dir, 1, 5.0)
    };

    let clip = client.generate_segment(&req).await.unwrap();
    assert_eq!(clip.remote_job_id, "kt-3");
}

#[tokio::test]
async fn test_kling_sends_signed_jwt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": { "task_id": "kt-9" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = kling(&server, fast_poll(3), Arc::new(RecordingSleeper::new()));
    let req = request(&dir, 0, 5.0);
    let task_id = client
        .submit_generation(&req.source_frame, &req.prompt, 5)
        .await
        .unwrap();
    assert_eq!(task_id, "kt-9");

    let received = server.received_requests().await.unwrap();
    let auth = received[0]
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    let token = auth.strip_prefix("Bearer ").unwrap();
    let parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3);

    let mut mac = Hmac::<Sha256>::new_from_slice(b"sk").unwrap();
    mac.update(format!("{}.{}", parts[0], parts[1]).as_bytes());
    mac.verify_slice(&URL_SAFE_NO_PAD.decode(parts[2]).unwrap())
        .expect("signature must verify with the secret key");

    let claims: JwtClaims =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
    assert_eq!(claims.iss, "ak");
    assert!(claims.exp > claims.nbf);

    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["duration"], "5");
    assert!(body["image"].as_str().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn test_kling_rate_limit_is_transient_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = kling(&server, fast_poll(3), Arc::new(RecordingSleeper::new()));
    let err = client
        .generate_segment(&request(&dir, 0, 5.0))
        .await
        .unwrap_err();

    match err {
        ProviderError::Transient {
            retry_after_secs, ..
        } => assert_eq!(retry_after_secs, Some(7)),
        other => panic!("Expected Transient, got {:?}", other),
    }
}

#[tokio::test]
async fn test_kling_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = kling(&server, fast_poll(3), Arc::new(RecordingSleeper::new()));
    let err = client
        .generate_segment(&request(&dir, 0, 5.0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Transient {
            retry_after_secs: None,
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_kling_error_code_in_envelope_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 1103,
            "message": "account balance not enough"
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = kling(&server, fast_poll(3), Arc::new(RecordingSleeper::new()));
    let err = client
        .generate_segment(&request(&dir, 0, 5.0))
        .await
        .unwrap_err();
    match err {
        ProviderError::Rejected { reason } => {
            assert!(reason.contains("1103"));
            assert!(reason.contains("balance"));
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_kling_failed_task_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": { "task_id": "kt-1" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/image2video/kt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": {
                "task_id": "kt-1",
                "task_status": "failed",
                "task_status_msg": "content policy"
            }
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = kling(&server, fast_poll(5), Arc::new(RecordingSleeper::new()));
    let err = client
        .generate_segment(&request(&dir, 0, 5.0))
        .await
        .unwrap_err();
    match err {
        ProviderError::Rejected { reason } => assert_eq!(reason, "content policy"),
        other => panic!("Expected Rejected, got {:?}", other),
    }
    assert!(!dir.path().join("segment_000.mp4").exists());
}

#[tokio::test]
async fn test_kling_times_out_after_max_polls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": { "task_id": "kt-1" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/image2video/kt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kling_task("processing")))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let sleeper = Arc::new(RecordingSleeper::new());
    let client = kling(&server, fast_poll(3), sleeper.clone());
    let err = client
        .generate_segment(&request(&dir, 0, 5.0))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Timeout { polls: 3 }));
    // No wait after the final poll.
    assert_eq!(sleeper.calls().len(), 2);
}

#[tokio::test]
async fn test_kling_transient_poll_error_counts_against_budget() {
    let server = MockServer::start().await;
    let video_url = mount_video(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/videos/image2video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": { "task_id": "kt-1" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/image2video/kt-1"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/videos/image2video/kt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": {
                "task_id": "kt-1",
                "task_status": "succeed",
                "task_result": { "videos": [{ "url": video_url }] }
            }
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let sleeper = Arc::new(RecordingSleeper::new());
    let client = kling(&server, fast_poll(2), sleeper.clone());
    let clip = client.generate_segment(&request(&dir, 0, 5.0)).await.unwrap();
    assert_eq!(clip.requested_secs, 5.0);
    assert_eq!(sleeper.calls().len(), 1);
}

#[tokio::test]
async fn test_kling_rejects_duration_outside_bounds_without_calling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = kling(&server, fast_poll(3), Arc::new(RecordingSleeper::new()));
    let err = client
        .generate_segment(&request(&dir, 0, 12.0))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest(_)));
    assert!(!err.is_retryable());
}

// === Runway ===

#[tokio::test]
async fn test_runway_full_segment_sends_headers_and_data_uri() {
    let server = MockServer::start().await;
    let video_url = mount_video(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/image_to_video"))
        .and(header("Authorization", "Bearer rw-key"))
        .and(header("X-Runway-Version", RUNWAY_API_VERSION))
        .and(body_partial_json(serde_json::json!({
            "model": "gen4_turbo",
            "promptText": "slow push in",
            "ratio": "720:1280",
            "duration": 5
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "rw-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tasks/rw-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "rw-1",
            "status": "THROTTLED"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tasks/rw-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "rw-1",
            "status": "SUCCEEDED",
            "output": [video_url]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let sleeper = Arc::new(RecordingSleeper::new());
    let client = runway(&server, fast_poll(5), sleeper.clone());
    let clip = client.generate_segment(&request(&dir, 2, 5.0)).await.unwrap();

    assert_eq!(client.kind(), ProviderKind::Runway);
    assert_eq!(clip.remote_job_id, "rw-1");
    assert_eq!(clip.requested_secs, 5.0);
    assert_eq!(clip.path, dir.path().join("segment_002.mp4"));
    assert_eq!(std::fs::read(&clip.path).unwrap(), VIDEO_BYTES);
    assert_eq!(sleeper.calls().len(), 1);

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(
        body["promptImage"],
        "data:image/png;base64,cG5nIGJ5dGVz"
    );
}

#[tokio::test]
async fn test_runway_failed_task_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/image_to_video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "rw-2" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tasks/rw-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "rw-2",
            "status": "FAILED",
            "failure": "Input image flagged"
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = runway(&server, fast_poll(5), Arc::new(RecordingSleeper::new()));
    let err = client
        .generate_segment(&request(&dir, 0, 5.0))
        .await
        .unwrap_err();
    match err {
        ProviderError::Rejected { reason } => assert_eq!(reason, "Input image flagged"),
        other => panic!("Expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_runway_bad_request_is_rejected_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/image_to_video"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid ratio"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = runway(&server, fast_poll(5), Arc::new(RecordingSleeper::new()));
    let err = client
        .generate_segment(&request(&dir, 0, 5.0))
        .await
        .unwrap_err();
    match err {
        ProviderError::Rejected { reason } => {
            assert!(reason.contains("400"));
            assert!(reason.contains("invalid ratio"));
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_runway_unknown_status_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/image_to_video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "rw-3" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tasks/rw-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "rw-3",
            "status": "EXPLODED"
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = runway(&server, fast_poll(5), Arc::new(RecordingSleeper::new()));
    let err = client
        .generate_segment(&request(&dir, 0, 5.0))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Protocol(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_empty_download_is_transient_and_leaves_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/empty.mp4"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/image_to_video"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "rw-4" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tasks/rw-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "SUCCEEDED",
            "output": [format!("{}/files/empty.mp4", server.uri())]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = runway(&server, fast_poll(5), Arc::new(RecordingSleeper::new()));
    let req = request(&dir, 0, 5.0);
    let err = client.generate_segment(&req).await.unwrap_err();

    assert!(matches!(err, ProviderError::Transient { .. }));
    assert!(!req.output_path.exists());
    assert!(!PathBuf::from(&req.output_path).with_extension("part").exists());
}
