//! ffprobe / ffmpeg backed media capabilities.
//!
//! Both are best-effort: a missing binary or a failed run yields `None` and
//! the upload simply goes out without the enrichment.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::{
    messaging::types::VideoMeta,
    ports::{MediaProber, Thumbnailer},
};

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    /// ffprobe reports durations as decimal strings.
    duration: Option<String>,
}

fn parse_probe(json: &[u8]) -> Option<VideoMeta> {
    let out: ProbeOutput = serde_json::from_slice(json).ok()?;
    let stream = out.streams.first();
    let duration = out
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| d.round() as u32)
        .unwrap_or(0);
    let width = stream.and_then(|s| s.width).unwrap_or(0);
    let height = stream.and_then(|s| s.height).unwrap_or(0);
    if duration == 0 && width == 0 && height == 0 {
        return None;
    }
    Some(VideoMeta {
        duration,
        width,
        height,
    })
}

pub struct FfprobeProber {
    path: PathBuf,
}

impl FfprobeProber {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Option<VideoMeta> {
        let out = Command::new(&self.path)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height:format=duration"])
            .args(["-of", "json"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await;

        match out {
            Ok(o) if o.status.success() => parse_probe(&o.stdout),
            Ok(o) => {
                tracing::debug!(
                    path = %path.display(),
                    status = %o.status,
                    stderr = %String::from_utf8_lossy(&o.stderr).trim(),
                    "ffprobe failed"
                );
                None
            }
            Err(e) => {
                tracing::debug!(binary = %self.path.display(), error = %e, "ffprobe unavailable");
                None
            }
        }
    }
}

/// Grabs one frame from the middle of the video.
pub struct FfmpegThumbnailer {
    path: PathBuf,
}

impl FfmpegThumbnailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn seek_point(duration: u32) -> String {
    (duration / 2).to_string()
}

#[async_trait]
impl Thumbnailer for FfmpegThumbnailer {
    async fn thumbnail(&self, video: &Path, duration: u32, out: &Path) -> Option<PathBuf> {
        let status = Command::new(&self.path)
            .args(["-y", "-v", "error", "-ss", &seek_point(duration), "-i"])
            .arg(video)
            .args(["-vframes", "1", "-vf", "scale=320:-1"])
            .arg(out)
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(s) if s.success() => match tokio::fs::try_exists(out).await {
                Ok(true) => Some(out.to_path_buf()),
                _ => None,
            },
            Ok(s) => {
                tracing::debug!(video = %video.display(), status = %s, "ffmpeg thumbnail failed");
                // ffmpeg may leave a partial file behind.
                let _ = tokio::fs::remove_file(out).await;
                None
            }
            Err(e) => {
                tracing::debug!(binary = %self.path.display(), error = %e, "ffmpeg unavailable");
                None
            }
        }
    }
}
