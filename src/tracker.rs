//! Progress reporting for project runs.
//!
//! The pipeline reports segment, stage and run outcomes through
//! [`ProgressTracker`]. [`JsonTracker`] keeps a `tracker.json` document in the
//! project directory up to date; [`NullTracker`] discards everything.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::assembly::StageReport;
use crate::chain::Segment;
use crate::run::{RunReport, RunStatus};

/// File name of the tracker document inside a project directory.
pub const TRACKER_FILE: &str = "tracker.json";

/// Receives progress from the chain builder, assembly engine and run.
///
/// Reporting never fails the pipeline; implementations log their own errors.
pub trait ProgressTracker: Send + Sync {
    fn segment_updated(&self, _segment: &Segment) {}

    fn stage_finished(&self, _report: &StageReport) {}

    fn run_finished(&self, _report: &RunReport) {}
}

/// Tracker that ignores all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl ProgressTracker for NullTracker {}

/// Errors from reading or writing the tracker document.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Failed to access tracker file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid tracker document '{}': {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Overall status recorded in `tracker.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerStatus {
    #[default]
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl From<RunStatus> for TrackerStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Complete => TrackerStatus::Complete,
            RunStatus::Failed => TrackerStatus::Failed,
            RunStatus::Cancelled => TrackerStatus::Cancelled,
        }
    }
}

/// Contents of `tracker.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerDocument {
    pub status: TrackerStatus,
    /// Stage or segment that stopped the run.
    pub failed_at: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub stages: Vec<StageReport>,
    pub final_path: Option<PathBuf>,
}

/// Tracker persisting a [`TrackerDocument`] after every update.
#[derive(Debug)]
pub struct JsonTracker {
    path: PathBuf,
    document: Mutex<TrackerDocument>,
}

impl JsonTracker {
    /// Start a fresh document in `project_dir`, replacing any previous one.
    pub fn create(project_dir: &Path) -> Result<Self, TrackerError> {
        let tracker = Self {
            path: project_dir.join(TRACKER_FILE),
            document: Mutex::new(TrackerDocument::default()),
        };
        tracker.flush()?;
        Ok(tracker)
    }

    /// Continue the document in `project_dir` for a resumed run.
    ///
    /// Recorded segments are kept; the run status, error and stage results
    /// start over. A missing file starts a fresh document.
    pub fn open(project_dir: &Path) -> Result<Self, TrackerError> {
        let path = project_dir.join(TRACKER_FILE);
        if !path.exists() {
            return Self::create(project_dir);
        }
        let previous = Self::load(&path)?;
        let tracker = Self {
            path,
            document: Mutex::new(TrackerDocument {
                segments: previous.segments,
                ..TrackerDocument::default()
            }),
        };
        tracker.flush()?;
        Ok(tracker)
    }

    /// Read an existing tracker document.
    pub fn load(path: &Path) -> Result<TrackerDocument, TrackerError> {
        let content = std::fs::read_to_string(path).map_err(|e| TrackerError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| TrackerError::Json {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current document.
    pub fn document(&self) -> TrackerDocument {
        match self.document.lock() {
            Ok(doc) => doc.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Write the document to disk.
    pub fn flush(&self) -> Result<(), TrackerError> {
        let doc = self.document();
        let json = serde_json::to_string_pretty(&doc).map_err(|e| TrackerError::Json {
            path: self.path.clone(),
            source: e,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        let io_err = |e| TrackerError::Io {
            path: self.path.clone(),
            source: e,
        };
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut TrackerDocument)) {
        match self.document.lock() {
            Ok(mut doc) => apply(&mut doc),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
        if let Err(e) = self.flush() {
            log::warn!("Failed to update tracker: {}", e);
        }
    }
}

impl ProgressTracker for JsonTracker {
    fn segment_updated(&self, segment: &Segment) {
        self.update(|doc| {
            match doc.segments.iter_mut().find(|s| s.index == segment.index) {
                Some(existing) => *existing = segment.clone(),
                None => {
                    doc.segments.push(segment.clone());
                    doc.segments.sort_by_key(|s| s.index);
                }
            }
        });
    }

    fn stage_finished(&self, report: &StageReport) {
        self.update(|doc| {
            doc.stages.retain(|s| s.stage != report.stage);
            doc.stages.push(report.clone());
        });
    }

    fn run_finished(&self, report: &RunReport) {
        self.update(|doc| {
            doc.status = report.status.into();
            doc.failed_at = report.failed_at.clone();
            doc.error = report.error.clone();
            doc.final_path = report.final_path.clone();
        });
    }
}
