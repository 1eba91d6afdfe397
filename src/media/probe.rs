//! ffprobe JSON parsing.

use std::path::Path;

use serde::Deserialize;

use super::{MediaError, MediaInfo};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse an ffprobe rational such as `30000/1001` or `24`.
pub fn parse_frame_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_secs(value: Option<&String>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Turn `ffprobe -print_format json -show_streams -show_format` output into
/// [`MediaInfo`].
pub fn parse_probe_output(path: &Path, json: &str) -> Result<MediaInfo, MediaError> {
    let fail = |reason: String| MediaError::Probe {
        path: path.to_path_buf(),
        reason,
    };

    let output: ProbeOutput =
        serde_json::from_str(json).map_err(|e| fail(format!("invalid ffprobe output: {}", e)))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| fail("no video stream".to_string()))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(fail("video stream has no dimensions".to_string())),
    };

    let fps = video
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.avg_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(24.0);

    let duration_secs = parse_secs(output.format.as_ref().and_then(|f| f.duration.as_ref()))
        .or_else(|| parse_secs(video.duration.as_ref()))
        .ok_or_else(|| fail("unknown duration".to_string()))?;

    let has_audio = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaInfo {
        width,
        height,
        fps,
        duration_secs,
        has_audio,
    })
}
