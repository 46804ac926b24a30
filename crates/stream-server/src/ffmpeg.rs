use std::path::Path;
use std::process::Command;

use serde::Serialize;
use tracing::{info, warn};

use crate::settings::LARGE_FILE_MB;

/// Handle to the ffmpeg/ffprobe pair found on `PATH`. Constructing one proves
/// the tool was present at startup; probing and transcoding go through the
/// plain binary names so the host's install is used as-is.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    version: String,
}

impl Ffmpeg {
    /// Looks for `ffmpeg` on `PATH` and returns `None` when it is missing.
    /// Callers degrade to listing-only behavior in that case.
    pub fn detect() -> Option<Self> {
        let output = Command::new("ffmpeg").arg("-version").output().ok()?;
        if !output.status.success() {
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.lines().next().unwrap_or("unknown").to_string();
        info!("FFmpeg found: {version}");

        Some(Self { version })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Runs one ffprobe single-value query and returns the trimmed output,
    /// or `None` when the probe fails or reports nothing useful.
    async fn probe_value(&self, path: &Path, args: &[&str]) -> Option<String> {
        let output = tokio::process::Command::new("ffprobe")
            .args(["-v", "error"])
            .args(args)
            .arg(path)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            warn!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!value.is_empty() && value != "N/A").then_some(value)
    }

    pub async fn duration_secs(&self, path: &Path) -> f64 {
        self.probe_value(
            path,
            &[
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        )
        .await
        .and_then(|value| value.parse().ok())
        .unwrap_or(0.0)
    }

    pub async fn video_codec(&self, path: &Path) -> String {
        self.probe_value(
            path,
            &[
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        )
        .await
        .unwrap_or_else(|| "unknown".to_string())
    }

    pub async fn video_bitrate_bps(&self, path: &Path) -> Option<u64> {
        self.probe_value(
            path,
            &[
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=bit_rate",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        )
        .await
        .and_then(|value| value.parse().ok())
    }

    /// Probes one file for the derived metadata the listing and the stream
    /// parameter policy consume. `None` when the file cannot be stat'ed.
    pub async fn video_info(&self, path: &Path) -> Option<VideoInfo> {
        let meta = tokio::fs::metadata(path).await.ok()?;

        let duration_secs = self.duration_secs(path).await;
        let codec = self.video_codec(path).await;
        let bitrate_bps = match self.video_bitrate_bps(path).await {
            Some(bitrate) => bitrate,
            None => estimate_bitrate_bps(meta.len(), duration_secs),
        };

        let size_mb = meta.len() as f64 / (1024.0 * 1024.0);
        Some(VideoInfo {
            duration_secs,
            size_mb,
            codec,
            bitrate_mbps: bitrate_bps as f64 / 1_000_000.0,
            large: size_mb > LARGE_FILE_MB,
        })
    }
}

/// Derived per-file metadata. Computed on demand, never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub duration_secs: f64,
    pub size_mb: f64,
    pub codec: String,
    pub bitrate_mbps: f64,
    pub large: bool,
}

/// Fallback when ffprobe reports no bit-rate for the video stream: spread the
/// file size over the duration. A tunable heuristic, not an exact figure.
pub(crate) fn estimate_bitrate_bps(size_bytes: u64, duration_secs: f64) -> u64 {
    if duration_secs > 0.0 {
        (size_bytes as f64 * 8.0 / duration_secs) as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_estimate_spreads_size_over_duration() {
        // 10 MB over 80 seconds -> 1 Mbit/s
        assert_eq!(estimate_bitrate_bps(10_000_000, 80.0), 1_000_000);
    }

    #[test]
    fn bitrate_estimate_zero_duration_is_zero() {
        assert_eq!(estimate_bitrate_bps(10_000_000, 0.0), 0);
    }
}
