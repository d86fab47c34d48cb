//! Streaming HTTP download for remote sources.

use std::path::Path;
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// Returns true when the URI refers to a remote source that must be
/// downloaded before use.
pub fn is_remote_url(uri: &str) -> bool {
    url::Url::parse(uri)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Download a video to `output_path`, streaming to a sidecar file first so
/// a partial download is never observable at the final path.
pub async fn download_video(url: &str, output_path: impl AsRef<Path>) -> MediaResult<u64> {
    let output_path = output_path.as_ref();

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    info!("Downloading {} to {}", url, output_path.display());

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?;

    let mut response = client.get(url).send().await?.error_for_status()?;

    let part_path = output_path.with_extension("part");
    let mut file = fs::File::create(&part_path).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if written == 0 {
        let _ = fs::remove_file(&part_path).await;
        return Err(MediaError::download_failed(format!(
            "Empty response body from {url}"
        )));
    }

    fs::rename(&part_path, output_path).await?;

    debug!(
        "Downloaded {} ({:.1} MB)",
        output_path.display(),
        written as f64 / (1024.0 * 1024.0)
    );

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_url_detection() {
        assert!(is_remote_url("http://example.com/a.mp4"));
        assert!(is_remote_url("https://example.com/a.mp4"));
        assert!(!is_remote_url("/data/videos/a.mp4"));
        assert!(!is_remote_url("relative/a.mp4"));
    }
}
