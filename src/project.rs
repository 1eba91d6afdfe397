//! Project directory layout and the single-run lock.
//!
//! A project directory belongs to one run at a time. [`ProjectDir::acquire`]
//! creates `.reelsmith.lock` with create-new semantics; the lock file is
//! removed when the guard is dropped.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Lock file name inside a project directory.
pub const LOCK_FILE: &str = ".reelsmith.lock";

/// Directory holding generated segments and frames.
pub const SEGMENTS_DIR: &str = "segments";

/// Concatenated segments before assembly.
pub const MAIN_VIDEO: &str = "main.mp4";

/// Finished video.
pub const FINAL_VIDEO: &str = "final.mp4";

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Project '{}' is in use by another run (remove {} if that run is gone)", .path.display(), .lock.display())]
    Busy { path: PathBuf, lock: PathBuf },

    #[error("Failed to prepare project '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive handle on a project directory.
#[derive(Debug)]
pub struct ProjectDir {
    root: PathBuf,
    lock: PathBuf,
}

impl ProjectDir {
    /// Create the directory if needed and take its lock.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, ProjectError> {
        let root = path.into();
        std::fs::create_dir_all(&root).map_err(|e| ProjectError::Io {
            path: root.clone(),
            source: e,
        })?;

        let lock = root.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ProjectError::Busy { path: root, lock });
            }
            Err(e) => {
                return Err(ProjectError::Io {
                    path: root,
                    source: e,
                })
            }
        };
        // Best effort; the lock is the file's existence.
        let _ = writeln!(file, "{}", std::process::id());

        log::debug!("Acquired project lock {}", lock.display());
        Ok(Self { root, lock })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.root.join(SEGMENTS_DIR)
    }

    pub fn main_path(&self) -> PathBuf {
        self.root.join(MAIN_VIDEO)
    }

    pub fn final_path(&self) -> PathBuf {
        self.root.join(FINAL_VIDEO)
    }
}

impl Drop for ProjectDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock) {
            log::warn!("Failed to release project lock {}: {}", self.lock.display(), e);
        }
    }
}
