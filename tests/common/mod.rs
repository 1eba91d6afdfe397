//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use reelsmith::media::{MediaError, MediaInfo, MediaTools};

pub fn info(width: u32, height: u32, duration_secs: f64, has_audio: bool) -> MediaInfo {
    MediaInfo {
        width,
        height,
        fps: 24.0,
        duration_secs,
        has_audio,
    }
}

/// ffmpeg stand-in: records every argument list, writes it into the output
/// file, and answers probes from a table (default 1280x720, 5s, with audio).
pub struct FakeMedia {
    infos: Mutex<HashMap<PathBuf, MediaInfo>>,
    commands: Mutex<Vec<Vec<String>>>,
    fail_when_contains: Mutex<Option<String>>,
    default_info: MediaInfo,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::with_default(info(1280, 720, 5.0, true))
    }

    pub fn with_default(default_info: MediaInfo) -> Self {
        Self {
            infos: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            fail_when_contains: Mutex::new(None),
            default_info,
        }
    }

    pub fn set_info(&self, path: &Path, info: MediaInfo) {
        self.infos.lock().unwrap().insert(path.to_path_buf(), info);
    }

    pub fn fail_on(&self, needle: &str) {
        *self.fail_when_contains.lock().unwrap() = Some(needle.to_string());
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    /// Commands whose argument list contains `needle`.
    pub fn commands_with(&self, needle: &str) -> Vec<Vec<String>> {
        self.commands()
            .into_iter()
            .filter(|c| c.iter().any(|a| a.contains(needle)))
            .collect()
    }
}

impl MediaTools for FakeMedia {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        if let Some(info) = self.infos.lock().unwrap().get(path) {
            return Ok(info.clone());
        }
        if !path.exists() {
            return Err(MediaError::Probe {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            });
        }
        Ok(self.default_info.clone())
    }

    fn run_ffmpeg(&self, args: &[String]) -> Result<(), MediaError> {
        self.commands.lock().unwrap().push(args.to_vec());
        if let Some(needle) = self.fail_when_contains.lock().unwrap().as_deref() {
            if args.iter().any(|a| a.contains(needle)) {
                return Err(MediaError::ProcessFailed {
                    tool: "ffmpeg".to_string(),
                    exit_code: Some(1),
                    stderr: format!("injected failure on {}", needle),
                });
            }
        }
        let output = PathBuf::from(args.last().cloned().unwrap_or_default());
        std::fs::write(&output, args.join(" "))?;
        Ok(())
    }
}

/// Write a small placeholder file and return its path.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, name.as_bytes()).unwrap();
    path
}
