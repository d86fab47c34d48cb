//! Shot boundary detection via ffmpeg scene-change scoring.
//!
//! Best effort: indexing proceeds unchanged when this fails. Boundaries
//! come from ffmpeg's `select='gt(scene,t)'` filter; `showinfo` output is
//! parsed from stderr for the presentation timestamps of selected frames.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::probe::get_duration;

/// Shot segmentation configuration.
#[derive(Debug, Clone)]
pub struct ShotConfig {
    /// Scene-change score threshold in [0, 1]
    pub threshold: f64,
    /// Minimum shot length in seconds; shorter shots are merged forward
    pub min_shot_seconds: f64,
}

impl Default for ShotConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            min_shot_seconds: 1.0,
        }
    }
}

/// A contiguous shot.
#[derive(Debug, Clone, PartialEq)]
pub struct Shot {
    pub index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

/// Detect shot boundaries in a video.
pub async fn detect_shots(path: impl AsRef<Path>, config: &ShotConfig) -> MediaResult<Vec<Shot>> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

    let duration = get_duration(path).await?;

    let filter = format!("select='gt(scene,{})',showinfo", config.threshold);
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-i"])
        .arg(path)
        .args(["-vf", &filter, "-f", "null", "-"])
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
                .unwrap_or("scene detection failed")
                .to_string(),
        ));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let cuts = parse_showinfo_timestamps(&stderr);
    let shots = cuts_to_shots(&cuts, duration, config.min_shot_seconds);

    debug!("Detected {} shots in {}", shots.len(), path.display());
    Ok(shots)
}

/// Extract `pts_time:` values from ffmpeg showinfo stderr output.
fn parse_showinfo_timestamps(stderr: &str) -> Vec<f64> {
    let mut times = Vec::new();
    for line in stderr.lines() {
        if !line.contains("showinfo") {
            continue;
        }
        if let Some(idx) = line.find("pts_time:") {
            let rest = &line[idx + "pts_time:".len()..];
            let token: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            if let Ok(t) = token.parse::<f64>() {
                times.push(t);
            }
        }
    }
    times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    times
}

/// Turn cut timestamps into shots, merging shots shorter than `min_len`.
fn cuts_to_shots(cuts: &[f64], duration: f64, min_len: f64) -> Vec<Shot> {
    let mut boundaries = vec![0.0];
    for &cut in cuts {
        if cut > 0.0 && cut < duration {
            boundaries.push(cut);
        }
    }
    boundaries.push(duration.max(0.0));

    let mut shots: Vec<Shot> = Vec::new();
    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);
        if end - start < min_len {
            // Too short: extend the previous shot instead of emitting one
            if let Some(last) = shots.last_mut() {
                last.end_seconds = end;
                continue;
            }
        }
        shots.push(Shot {
            index: shots.len(),
            start_seconds: start,
            end_seconds: end,
        });
    }
    shots
}
