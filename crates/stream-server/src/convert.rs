use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{error, info};

use crate::error::StreamError;

/// Suffix appended to converted output names; the listing strips it back off
/// for display.
pub const CONVERTED_SUFFIX: &str = "_converted";

/// Output path for a conversion: `<stem>_converted.mp4` under `converted_dir`.
pub fn converted_path(converted_dir: &Path, source_name: &str) -> PathBuf {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_name.to_string());
    converted_dir.join(format!("{stem}{CONVERTED_SUFFIX}.mp4"))
}

/// Converts `input` to an MP4 (H.264 video, AAC audio), overwriting any prior
/// output. Blocks its caller for the full transcode; this is invoked rarely
/// and explicitly, never on playback.
pub async fn convert_to_mp4(input: &Path, output: &Path) -> Result<(), StreamError> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-i")
        .arg(input)
        .args(["-c:v", "libx264", "-c:a", "aac"])
        .args(["-strict", "experimental"])
        .args(["-b:a", "192k"])
        .args(["-f", "mp4"])
        .arg("-y")
        .arg(output);

    info!("Running conversion command: {cmd:?}");

    let result = cmd.output().await.map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => StreamError::ToolUnavailable,
        _ => StreamError::ConversionFailed(err.to_string()),
    })?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let diagnostic = stderr_tail(&stderr);
        error!("FFmpeg conversion failed: {diagnostic}");
        return Err(StreamError::ConversionFailed(diagnostic));
    }

    info!(
        "Successfully converted {} to {}",
        input.display(),
        output.display()
    );
    Ok(())
}

/// ffmpeg front-loads banners and stream maps; the actionable message is at
/// the end of its stderr.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(6);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converted_path_appends_suffix_and_swaps_extension() {
        let path = converted_path(Path::new("/data/converted"), "movie night.mkv");
        assert_eq!(
            path,
            PathBuf::from("/data/converted/movie night_converted.mp4")
        );
    }

    #[test]
    fn stderr_tail_keeps_only_the_last_lines() {
        let noise = (0..20).map(|i| format!("line {i}")).collect::<Vec<_>>();
        let tail = stderr_tail(&noise.join("\n"));
        assert!(tail.starts_with("line 14"));
        assert!(tail.ends_with("line 19"));
    }
}
