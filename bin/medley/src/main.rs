use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Context;
use axum::http::{StatusCode, Uri, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use directories::ProjectDirs;
use rust_embed::RustEmbed;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const APP_NAME: &str = "Medley";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(RustEmbed)]
#[folder = "assets"]
struct FrontendAssets;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Sets the IP address to bind the server to
    #[arg(long, default_value = "0.0.0.0", env = "MEDLEY_HOST")]
    host: Ipv4Addr,

    /// Sets the port to bind the server to
    #[arg(long, default_value_t = 8000, env = "MEDLEY_PORT")]
    port: u16,

    /// Data directory (catalog, uploads, converted output)
    #[arg(long, env = "MEDLEY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory scanned for source videos
    #[arg(long, env = "MEDLEY_VIDEO_DIR")]
    video_dir: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("medley-data"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let env_filter = match rust_log.is_empty() {
        true => EnvFilter::builder().parse_lossy("info"),
        false => EnvFilter::builder().parse_lossy(rust_log),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    let video_dir = args.video_dir.unwrap_or_else(|| data_dir.join("videos"));
    let converted_dir = data_dir.join("converted");

    for dir in [&data_dir, &video_dir, &converted_dir] {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    info!("🚀 Starting {APP_NAME} v{APP_VERSION}");
    info!("📂 Data directory: {}", data_dir.display());
    info!("🎬 Video directory: {}", video_dir.display());

    let stream_router = medley_stream_server::create_router(video_dir, converted_dir);
    let catalog_router = medley_catalog_server::create_router(data_dir);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/version", get(version_handler))
        .merge(stream_router)
        .merge(catalog_router)
        .fallback(serve_frontend)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind((args.host, args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;

    info!("🌍 {APP_NAME} running at http://{}:{}", args.host, args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    info!("👋 Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("🛑 Received Ctrl+C, shutting down..."),
        Err(err) => error!("Unable to listen for shutdown signal: {err}"),
    }
}

async fn version_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": APP_VERSION }))
}

async fn serve_frontend(uri: Uri) -> impl IntoResponse {
    let path = uri.path().trim_start_matches('/');

    if !path.is_empty()
        && let Some(content) = FrontendAssets::get(path)
    {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (
            [(header::CONTENT_TYPE, mime.as_ref())],
            content.data,
        )
            .into_response();
    }

    match FrontendAssets::get("index.html") {
        Some(index) => ([(header::CONTENT_TYPE, "text/html")], index.data).into_response(),
        None => (StatusCode::NOT_FOUND, "404 - index.html missing").into_response(),
    }
}
