//! Region-of-interest detection via ffmpeg cropdetect.
//!
//! Best effort, like shot segmentation: a failure here never aborts
//! indexing. The most frequent crop window over the sampled frames is
//! taken as the primary region.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Primary region of interest in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiInfo {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// How many sampled frames voted for this window
    pub votes: u32,
}

impl RoiInfo {
    /// Serialized form stored in the video's metadata envelope.
    pub fn as_crop_string(&self) -> String {
        format!("{}:{}:{}:{}", self.width, self.height, self.x, self.y)
    }
}

/// Detect the primary region of interest of a video.
///
/// Samples up to `max_frames` frames through ffmpeg's cropdetect filter
/// and returns the modal crop window, or `None` when no stable window
/// emerges.
pub async fn detect_roi(path: impl AsRef<Path>, max_frames: u32) -> MediaResult<Option<RoiInfo>> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-i"])
        .arg(path)
        .args([
            "-vf",
            "cropdetect=24:16:0",
            "-frames:v",
            &max_frames.to_string(),
            "-f",
            "null",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::tool_failed(
            "ffmpeg",
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .last()
                .unwrap_or("cropdetect failed")
                .to_string(),
        ));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let roi = pick_modal_crop(&stderr);

    if let Some(ref roi) = roi {
        debug!(
            "Detected ROI {} in {} ({} votes)",
            roi.as_crop_string(),
            path.display(),
            roi.votes
        );
    }
    Ok(roi)
}

/// Parse `crop=w:h:x:y` suggestions from cropdetect stderr output and
/// return the most frequent one.
fn pick_modal_crop(stderr: &str) -> Option<RoiInfo> {
    let mut votes: HashMap<(u32, u32, u32, u32), u32> = HashMap::new();

    for line in stderr.lines() {
        let Some(idx) = line.find("crop=") else {
            continue;
        };
        let spec: String = line[idx + "crop=".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == ':')
            .collect();
        let parts: Vec<u32> = spec.split(':').filter_map(|p| p.parse().ok()).collect();
        if let [w, h, x, y] = parts[..] {
            if w > 0 && h > 0 {
                *votes.entry((w, h, x, y)).or_insert(0) += 1;
            }
        }
    }

    votes
        .into_iter()
        .max_by_key(|(key, count)| (*count, std::cmp::Reverse(*key)))
        .map(|((width, height, x, y), count)| RoiInfo {
            x,
            y,
            width,
            height,
            votes: count,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modal_crop_wins() {
        let stderr = "\
[Parsed_cropdetect_0 @ 0x1] x1:0 x2:1919 t:0.1 crop=1920:800:0:140\n\
[Parsed_cropdetect_0 @ 0x1] x1:0 x2:1919 t:0.2 crop=1920:800:0:140\n\
[Parsed_cropdetect_0 @ 0x1] x1:0 x2:1919 t:0.3 crop=1920:1080:0:0\n";
        let roi = pick_modal_crop(stderr).unwrap();
        assert_eq!(roi.width, 1920);
        assert_eq!(roi.height, 800);
        assert_eq!(roi.y, 140);
        assert_eq!(roi.votes, 2);
        assert_eq!(roi.as_crop_string(), "1920:800:0:140");
    }

    #[test]
    fn no_crop_lines() {
        assert!(pick_modal_crop("nothing to see").is_none());
    }
}
