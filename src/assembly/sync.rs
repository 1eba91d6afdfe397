//! Audio/video sync handoff.

use std::path::Path;
use std::sync::Arc;

use crate::media::{arg, ensure_output, MediaError, MediaTools};

/// Puts the narration onto the main video.
///
/// The default implementation muxes with ffmpeg; an external sync service
/// can be plugged in instead.
pub trait AudioSync: Send + Sync {
    fn sync(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MediaError>;
}

/// Replaces the video's audio with the narration, cut to the shorter stream.
///
/// Stream copy is tried first; if ffmpeg refuses it the video is re-encoded.
pub struct MuxAudioSync {
    media: Arc<dyn MediaTools>,
}

impl MuxAudioSync {
    pub fn new(media: Arc<dyn MediaTools>) -> Self {
        Self { media }
    }
}

/// ffmpeg arguments muxing `audio` onto `video`.
pub fn mux_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), arg(video), "-i".into(), arg(audio)];
    args.extend(
        [
            "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-b:a", "192k",
            "-shortest",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(arg(output));
    args
}

/// Fallback arguments: same mapping, video re-encoded.
pub fn merge_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    let mut args = mux_args(video, audio, output);
    if let Some(pos) = args.iter().position(|a| a == "copy") {
        args.splice(
            pos..=pos,
            ["libx264", "-preset", "medium", "-crf", "20", "-pix_fmt", "yuv420p"]
                .iter()
                .map(|s| s.to_string()),
        );
    }
    args
}

impl AudioSync for MuxAudioSync {
    fn sync(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MediaError> {
        log::info!("Muxing {} onto {}", audio.display(), video.display());
        let muxed = self
            .media
            .run_ffmpeg(&mux_args(video, audio, output))
            .and_then(|_| ensure_output(output));
        match muxed {
            Ok(()) => Ok(()),
            Err(e @ MediaError::FfmpegNotFound { .. }) => Err(e),
            Err(e) => {
                log::warn!("Stream-copy mux failed ({}), re-encoding video", e);
                self.media.run_ffmpeg(&merge_args(video, audio, output))?;
                ensure_output(output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::test_support::FakeMedia;
    use tempfile::TempDir;

    #[test]
    fn test_mux_args_map_video_and_narration() {
        let args = mux_args(Path::new("main.mp4"), Path::new("voice.mp3"), Path::new("out.mp4"));
        assert_eq!(args[..5], ["-y", "-i", "main.mp4", "-i", "voice.mp3"]);
        let joined = args.join(" ");
        assert!(joined.contains("-map 0:v:0 -map 1:a:0 -c:v copy"));
        assert!(joined.contains("-shortest"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_sync_checks_output() {
        let dir = TempDir::new().unwrap();
        let media = Arc::new(FakeMedia::new());
        let sync = MuxAudioSync::new(media.clone());
        let out = dir.path().join("synced.mp4");

        sync.sync(Path::new("main.mp4"), Path::new("voice.mp3"), &out).unwrap();
        assert!(out.exists());
        assert_eq!(media.commands().len(), 1);

        media.fail_on("voice.mp3");
        assert!(sync
            .sync(Path::new("main.mp4"), Path::new("voice.mp3"), &out)
            .is_err());
        // Copy attempt plus the re-encode fallback.
        assert_eq!(media.commands().len(), 3);
    }

    #[test]
    fn test_falls_back_to_reencode_when_copy_fails() {
        let dir = TempDir::new().unwrap();
        let media = Arc::new(FakeMedia::new());
        media.fail_on("copy");
        let sync = MuxAudioSync::new(media.clone());
        let out = dir.path().join("synced.mp4");

        sync.sync(Path::new("main.mp4"), Path::new("voice.mp3"), &out).unwrap();

        let commands = media.commands();
        assert_eq!(commands.len(), 2);
        let fallback = commands[1].join(" ");
        assert!(fallback.contains("-c:v libx264"));
        assert!(!fallback.contains("copy"));
        assert!(fallback.contains("-shortest"));
    }
}
