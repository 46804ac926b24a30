use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::ffmpeg::VideoInfo;

/// Sources above this size get the optimized (lower-quality, larger-chunk)
/// streaming profile automatically.
pub const LARGE_FILE_MB: f64 = 1000.0;

/// Sources above this size additionally get downscaled to a 720p-equivalent
/// width.
pub const DOWNSCALE_THRESHOLD_MB: f64 = 3000.0;

/// Pipe read buffer scales with core count but never beyond 64 KiB.
const PIPE_BUF_CAP: usize = 64 * 1024;
const PIPE_BUF_PER_CORE: usize = 8192;

/// Snapshot of host resources taken per stream request. The quality tiers
/// below key off total memory; the pipe buffer keys off physical cores.
#[derive(Debug, Clone, Copy)]
pub struct HostResources {
    pub memory_gb: f64,
    pub cpu_cores: usize,
}

impl HostResources {
    pub fn snapshot() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::new()
                .with_memory(MemoryRefreshKind::new().with_ram())
                .with_cpu(CpuRefreshKind::new()),
        );

        let memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.physical_core_count().unwrap_or(2).max(2);

        Self {
            memory_gb,
            cpu_cores,
        }
    }
}

/// Resolved transcode parameters for one live stream. These are configurable
/// policy heuristics; nothing downstream depends on the exact numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub video_bitrate: &'static str,
    pub audio_bitrate: &'static str,
    pub preset: &'static str,
    pub pipe_buf_size: usize,
    pub downscale: Option<&'static str>,
    pub chunk_size: usize,
}

/// Pure function of its inputs: probed file metadata, the request's
/// `optimized` flag, and the host snapshot.
pub fn resolve(
    info: Option<&VideoInfo>,
    explicit_optimized: bool,
    host: &HostResources,
) -> StreamSettings {
    let optimized = explicit_optimized || info.is_some_and(|info| info.large);

    if optimized {
        // Reduced quality for large sources, tiered by available memory.
        let (video_bitrate, preset) = if host.memory_gb < 4.0 {
            ("1M", "ultrafast")
        } else if host.memory_gb < 8.0 {
            ("2M", "superfast")
        } else {
            ("3M", "veryfast")
        };

        let downscale = info
            .filter(|info| info.size_mb > DOWNSCALE_THRESHOLD_MB)
            .map(|_| "scale=1280:-2");

        StreamSettings {
            video_bitrate,
            audio_bitrate: "96k",
            preset,
            pipe_buf_size: (PIPE_BUF_PER_CORE * host.cpu_cores).min(PIPE_BUF_CAP),
            downscale,
            chunk_size: 64 * 1024,
        }
    } else {
        StreamSettings {
            video_bitrate: "4M",
            audio_bitrate: "128k",
            preset: "veryfast",
            pipe_buf_size: 16384,
            downscale: None,
            chunk_size: 16 * 1024,
        }
    }
}

/// Seek offsets come straight from the query string. Anything that is not a
/// plain decimal number collapses to 0 instead of erroring.
pub fn parse_start_offset(raw: &str) -> f64 {
    if is_plain_decimal(raw) {
        raw.parse().unwrap_or(0.0)
    } else {
        0.0
    }
}

fn is_plain_decimal(value: &str) -> bool {
    let mut parts = value.splitn(2, '.');
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

    match (parts.next(), parts.next()) {
        (Some(int), None) => all_digits(int),
        (Some(int), Some(frac)) => all_digits(int) && all_digits(frac),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(size_mb: f64) -> VideoInfo {
        VideoInfo {
            duration_secs: 5400.0,
            size_mb,
            codec: "h264".to_string(),
            bitrate_mbps: 4.0,
            large: size_mb > LARGE_FILE_MB,
        }
    }

    fn host(memory_gb: f64, cpu_cores: usize) -> HostResources {
        HostResources {
            memory_gb,
            cpu_cores,
        }
    }

    #[test]
    fn small_source_keeps_full_quality() {
        let settings = resolve(Some(&info(500.0)), false, &host(16.0, 8));
        assert_eq!(settings.video_bitrate, "4M");
        assert_eq!(settings.audio_bitrate, "128k");
        assert_eq!(settings.chunk_size, 16 * 1024);
        assert!(settings.downscale.is_none());
    }

    #[test]
    fn large_source_is_optimized_automatically() {
        let settings = resolve(Some(&info(1500.0)), false, &host(16.0, 8));
        assert_eq!(settings.audio_bitrate, "96k");
        assert_eq!(settings.chunk_size, 64 * 1024);
    }

    #[test]
    fn very_large_source_gets_downscaled() {
        let settings = resolve(Some(&info(3500.0)), false, &host(16.0, 8));
        assert_eq!(settings.downscale, Some("scale=1280:-2"));
    }

    #[test]
    fn large_but_not_huge_source_is_not_downscaled() {
        let settings = resolve(Some(&info(1500.0)), true, &host(16.0, 8));
        assert!(settings.downscale.is_none());
    }

    #[test]
    fn quality_tiers_follow_memory() {
        let low = resolve(Some(&info(1500.0)), false, &host(2.0, 2));
        assert_eq!((low.video_bitrate, low.preset), ("1M", "ultrafast"));

        let mid = resolve(Some(&info(1500.0)), false, &host(6.0, 4));
        assert_eq!((mid.video_bitrate, mid.preset), ("2M", "superfast"));

        let high = resolve(Some(&info(1500.0)), false, &host(16.0, 8));
        assert_eq!((high.video_bitrate, high.preset), ("3M", "veryfast"));
    }

    #[test]
    fn pipe_buffer_scales_with_cores_up_to_the_cap() {
        let two_cores = resolve(None, true, &host(16.0, 2));
        assert_eq!(two_cores.pipe_buf_size, 16384);

        let many_cores = resolve(None, true, &host(16.0, 32));
        assert_eq!(many_cores.pipe_buf_size, PIPE_BUF_CAP);
    }

    #[test]
    fn start_offset_accepts_plain_decimals() {
        assert_eq!(parse_start_offset("0"), 0.0);
        assert_eq!(parse_start_offset("90"), 90.0);
        assert_eq!(parse_start_offset("12.5"), 12.5);
    }

    #[test]
    fn start_offset_collapses_junk_to_zero() {
        assert_eq!(parse_start_offset(""), 0.0);
        assert_eq!(parse_start_offset("-5"), 0.0);
        assert_eq!(parse_start_offset("1e3"), 0.0);
        assert_eq!(parse_start_offset("12."), 0.0);
        assert_eq!(parse_start_offset("abc"), 0.0);
        assert_eq!(parse_start_offset("10; rm -rf /"), 0.0);
    }
}
