use std::path::PathBuf;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub mod convert;
pub mod error;
pub mod ffmpeg;
pub mod session;
pub mod settings;
pub mod state;
pub mod stream;

pub use error::StreamError;
pub use state::StreamServerState;

pub fn create_router(video_dir: PathBuf, converted_dir: PathBuf) -> Router {
    let ffmpeg = ffmpeg::Ffmpeg::detect();
    if ffmpeg.is_none() {
        warn!("FFmpeg not found. Video conversion and streaming will not be available.");
    }

    let state = StreamServerState {
        ffmpeg,
        sessions: session::SessionManager::new(),
        video_dir,
        converted_dir,
    };

    state.sessions.spawn_sweeper();

    router_with_state(state)
}

/// Router over an explicit state; `create_router` is this plus tool detection
/// and the sweeper.
pub fn router_with_state(state: StreamServerState) -> Router {
    Router::new()
        .route("/api/videos", get(list_videos_handler))
        .route("/stream/{name}", get(stream_handler))
        .route("/stream-stats/{session_id}", get(stream_stats_handler))
        .route("/convert/{name}", get(convert_handler))
        .nest_service("/videos", ServeDir::new(state.video_dir.clone()))
        .nest_service("/converted", ServeDir::new(state.converted_dir.clone()))
        .with_state(state)
}

// --- Listing ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEntry {
    pub title: String,
    pub src: String,
    pub container: String,
    pub streamable: bool,
    pub large: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListing {
    pub videos: Vec<VideoEntry>,
    pub ffmpeg_available: bool,
}

async fn list_videos_handler(State(state): State<StreamServerState>) -> Json<VideoListing> {
    let mut videos = Vec::new();

    for name in files_with_extension(&state.video_dir, "mp4").await {
        videos.push(VideoEntry {
            title: title_of(&name),
            src: format!("/videos/{name}"),
            container: "mp4".to_string(),
            streamable: true,
            large: false,
            duration_secs: None,
            size_mb: None,
            codec: None,
        });
    }

    for name in files_with_extension(&state.converted_dir, "mp4").await {
        let mut title = title_of(&name);
        if let Some(stripped) = title.strip_suffix(convert::CONVERTED_SUFFIX) {
            title = stripped.to_string();
        }
        videos.push(VideoEntry {
            title,
            src: format!("/converted/{name}"),
            container: "mp4".to_string(),
            streamable: true,
            large: false,
            duration_secs: None,
            size_mb: None,
            codec: None,
        });
    }

    for name in files_with_extension(&state.video_dir, "mkv").await {
        match &state.ffmpeg {
            Some(ffmpeg) => {
                let Some(info) = ffmpeg.video_info(&state.video_dir.join(&name)).await else {
                    continue;
                };
                let src = if info.large {
                    format!("/stream/{name}?optimized=1")
                } else {
                    format!("/stream/{name}")
                };
                videos.push(VideoEntry {
                    title: title_of(&name),
                    src,
                    container: "mkv".to_string(),
                    streamable: true,
                    large: info.large,
                    duration_secs: Some(info.duration_secs),
                    size_mb: Some(info.size_mb),
                    codec: (info.codec != "unknown").then_some(info.codec),
                });
            }
            None => {
                // Without the tool the file can only be downloaded raw.
                videos.push(VideoEntry {
                    title: format!("{} (MKV - not supported)", title_of(&name)),
                    src: format!("/videos/{name}"),
                    container: "mkv".to_string(),
                    streamable: false,
                    large: false,
                    duration_secs: None,
                    size_mb: None,
                    codec: None,
                });
            }
        }
    }

    if videos.is_empty() {
        warn!("No video files found in {}", state.video_dir.display());
    }

    Json(VideoListing {
        videos,
        ffmpeg_available: state.ffmpeg.is_some(),
    })
}

// --- Streaming ---

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub start: Option<String>,
    pub optimized: Option<String>,
}

async fn stream_handler(
    State(state): State<StreamServerState>,
    Path(name): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, StreamError> {
    let input = resolve_in_dir(&state.video_dir, &name)?;
    let ffmpeg = state.ffmpeg.as_ref().ok_or(StreamError::ToolUnavailable)?;

    let start_offset = query
        .start
        .as_deref()
        .map(settings::parse_start_offset)
        .unwrap_or(0.0);
    let explicit_optimized = query.optimized.as_deref() == Some("1");

    let info = ffmpeg.video_info(&input).await;
    let host = settings::HostResources::snapshot();
    let resolved = settings::resolve(info.as_ref(), explicit_optimized, &host);

    let live = stream::spawn_live_stream(&state.sessions, &input, &name, start_offset, &resolved)?;

    let session_header = HeaderValue::from_str(&live.session_id)
        .map_err(|err| StreamError::StreamingFailed(err.to_string()))?;

    let mut response = Response::new(axum::body::Body::from_stream(live.body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert("x-stream-session", session_header);

    Ok(response)
}

async fn stream_stats_handler(
    State(state): State<StreamServerState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.stats(&session_id).await {
        Some(stats) => Json(stats).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "running": false, "error": "Stream not found" })),
        )
            .into_response(),
    }
}

// --- Conversion ---

async fn convert_handler(
    State(state): State<StreamServerState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, StreamError> {
    let input = resolve_in_dir(&state.video_dir, &name)?;
    state.ffmpeg.as_ref().ok_or(StreamError::ToolUnavailable)?;

    let output = convert::converted_path(&state.converted_dir, &name);
    convert::convert_to_mp4(&input, &output).await?;

    let output_name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| StreamError::ConversionFailed("bad output path".to_string()))?;

    info!("Successfully converted {name} to {output_name}");
    Ok(Json(json!({
        "success": true,
        "message": "Video converted successfully",
        "url": format!("/converted/{output_name}"),
    })))
}

// --- Helpers ---

/// Resolves a client-supplied name inside `dir`, rejecting anything that
/// could escape it. Missing files are a plain 404.
fn resolve_in_dir(dir: &std::path::Path, name: &str) -> Result<PathBuf, StreamError> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(StreamError::NotFound(name.to_string()));
    }
    let path = dir.join(name);
    if !path.is_file() {
        return Err(StreamError::NotFound(name.to_string()));
    }
    Ok(path)
}

fn title_of(name: &str) -> String {
    std::path::Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

async fn files_with_extension(dir: &std::path::Path, extension: &str) -> Vec<String> {
    let suffix = format!(".{extension}");
    let mut names = Vec::new();

    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.to_lowercase().ends_with(&suffix) {
            names.push(name);
        }
    }

    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn test_dir(name: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("medley-stream-test-{name}-{id}"));
        std::fs::create_dir_all(&dir).expect("failed to create test dir");
        dir
    }

    #[tokio::test]
    async fn test_create_router() {
        let dir = test_dir("router");
        let _router = create_router(dir.join("videos"), dir.join("converted"));
    }

    #[test]
    fn resolve_rejects_traversal_and_absolute_names() {
        let dir = test_dir("resolve");
        std::fs::write(dir.join("ok.mkv"), b"x").expect("write test file");

        assert!(resolve_in_dir(&dir, "ok.mkv").is_ok());
        assert!(resolve_in_dir(&dir, "../ok.mkv").is_err());
        assert!(resolve_in_dir(&dir, "sub/ok.mkv").is_err());
        assert!(resolve_in_dir(&dir, "").is_err());
        assert!(resolve_in_dir(&dir, "missing.mkv").is_err());
    }

    #[test]
    fn titles_drop_the_extension() {
        assert_eq!(title_of("movie night.mkv"), "movie night");
        assert_eq!(title_of("noext"), "noext");
    }

    #[tokio::test]
    async fn listing_scan_filters_by_extension_case_insensitively() {
        let dir = test_dir("scan");
        std::fs::write(dir.join("a.MKV"), b"x").expect("write");
        std::fs::write(dir.join("b.mkv"), b"x").expect("write");
        std::fs::write(dir.join("c.mp4"), b"x").expect("write");
        std::fs::write(dir.join("notes.txt"), b"x").expect("write");

        let mkvs = files_with_extension(&dir, "mkv").await;
        assert_eq!(mkvs, vec!["a.MKV".to_string(), "b.mkv".to_string()]);

        let mp4s = files_with_extension(&dir, "mp4").await;
        assert_eq!(mp4s, vec!["c.mp4".to_string()]);
    }
}
