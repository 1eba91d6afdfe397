//! Streaming download of finished clips.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use super::retry::error_for_response;
use super::ProviderError;

/// Download a video file from a URL to disk.
///
/// Streams the body into a `.part` file next to `dest` and renames it into
/// place once complete, so a partial download never looks like a finished
/// segment.
pub async fn download_video(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<PathBuf, ProviderError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(error_for_response(response, "Video download").await);
    }

    let partial = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e.into());
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if written == 0 {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(ProviderError::transient(format!(
            "Downloaded video from {} is empty",
            url
        )));
    }

    tokio::fs::rename(&partial, dest).await?;
    log::debug!("Downloaded {} bytes to {}", written, dest.display());
    Ok(dest.to_path_buf())
}
