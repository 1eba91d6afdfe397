//! Last-frame extraction arguments.

use std::path::Path;

use super::arg;

/// Seek this far before the end of the clip when grabbing its last frame.
const LAST_FRAME_OFFSET: &str = "-0.5";

/// ffmpeg arguments that write the final frame of `video` to `dest`.
pub fn last_frame_args(video: &Path, dest: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-sseof".to_string(),
        LAST_FRAME_OFFSET.to_string(),
        "-i".to_string(),
        arg(video),
        "-update".to_string(),
        "1".to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "2".to_string(),
        arg(dest),
    ]
}
