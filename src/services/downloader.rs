// src/services/downloader.rs
use crate::errors::RedesignError;
use futures_util::TryStreamExt;
use log::info;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Fetches `url` and saves it as `dir/filename`. No retries.
pub async fn download(
    client: &Client,
    url: &str,
    filename: &str,
    dir: &Path,
) -> Result<PathBuf, RedesignError> {
    if filename.is_empty() || filename.contains(['/', '\\']) {
        return Err(RedesignError::Validation(format!(
            "Invalid download file name '{}'",
            filename
        )));
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| RedesignError::DownloadFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(RedesignError::DownloadFailed(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }

    let path = dir.join(filename);
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| {
            RedesignError::DownloadFailed(format!("Cannot create {}: {}", path.display(), e))
        })?;

    let mut stream = response.bytes_stream();
    let mut written = 0usize;
    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(|e| RedesignError::DownloadFailed(e.to_string()))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| RedesignError::DownloadFailed(e.to_string()))?;
        written += chunk.len();
    }
    file.flush()
        .await
        .map_err(|e| RedesignError::DownloadFailed(e.to_string()))?;

    info!("Saved {} ({} bytes) to {}", url, written, path.display());
    Ok(path)
}
