use std::path::{Path as StdPath, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tower_http::services::ServeDir;
use tracing::{info, warn};
use uuid::Uuid;

pub mod error;
pub mod store;
pub mod upload;

pub use error::CatalogError;
pub use store::{CatalogStore, MovieRecord};

#[derive(Clone)]
pub struct CatalogState {
    pub store: CatalogStore,
    pub upload_dir: PathBuf,
}

pub fn create_router(data_dir: PathBuf) -> Router {
    let upload_dir = data_dir.join("uploads");
    if let Err(err) = std::fs::create_dir_all(&upload_dir) {
        warn!("Failed to create upload dir {}: {err}", upload_dir.display());
    }

    let store = CatalogStore::open(data_dir.join("catalog.json"), upload_dir.clone());
    let state = CatalogState {
        store,
        upload_dir: upload_dir.clone(),
    };

    Router::new()
        .route("/api/movies", get(list_movies_handler))
        .route(
            "/api/movies/{id}",
            get(get_movie_handler).delete(delete_movie_handler),
        )
        .route(
            "/api/upload",
            post(upload_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/health", get(health_handler))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .with_state(state)
}

/// A record as the API returns it: the stored fields plus the derived access
/// URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieResponse {
    #[serde(flatten)]
    pub movie: MovieRecord,
    pub url: String,
}

impl From<MovieRecord> for MovieResponse {
    fn from(movie: MovieRecord) -> Self {
        let url = format!("/uploads/{}", movie.filename);
        Self { movie, url }
    }
}

async fn list_movies_handler(State(state): State<CatalogState>) -> Json<Vec<MovieResponse>> {
    let movies = state
        .store
        .list()
        .into_iter()
        .map(MovieResponse::from)
        .collect();
    Json(movies)
}

async fn get_movie_handler(
    State(state): State<CatalogState>,
    Path(id): Path<String>,
) -> Result<Json<MovieResponse>, CatalogError> {
    let movie = state
        .store
        .get(&id)
        .ok_or_else(|| CatalogError::NotFound(id))?;
    Ok(Json(movie.into()))
}

async fn delete_movie_handler(
    State(state): State<CatalogState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CatalogError> {
    let removed = state.store.remove(&id)?;
    info!(
        "[Catalog] Deleted movie {} ({})",
        removed.id, removed.original_filename
    );
    Ok(Json(json!({ "success": true })))
}

async fn upload_handler(
    State(state): State<CatalogState>,
    mut multipart: Multipart,
) -> Result<Json<MovieResponse>, CatalogError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| CatalogError::InvalidInput(format!("multipart error: {err}")))?
    {
        if field.name() != Some("movie") {
            continue;
        }

        let original = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| CatalogError::InvalidInput("no file selected".to_string()))?;
        let declared_mime = field.content_type().map(str::to_string);

        let sanitized = upload::sanitize_filename(&original);
        let extension = upload::extension_of(&sanitized)
            .ok_or_else(|| CatalogError::UnsupportedType("missing file extension".to_string()))?;
        if !upload::is_allowed(&extension) {
            return Err(CatalogError::UnsupportedType(format!(".{extension}")));
        }

        let stored_name = format!("{}.{extension}", Uuid::new_v4());
        let destination = state.upload_dir.join(&stored_name);
        let size = write_field(field, &destination).await?;

        let record = MovieRecord {
            id: Uuid::new_v4().to_string(),
            title: upload::title_of(&sanitized),
            filename: stored_name,
            original_filename: sanitized,
            size,
            uploaded_at: unix_now(),
            mime_type: declared_mime.unwrap_or_else(|| {
                mime_guess::from_path(&destination)
                    .first_or_octet_stream()
                    .to_string()
            }),
            streamable: upload::is_streamable(&extension),
        };

        if let Err(err) = state.store.append(record.clone()) {
            // Don't leave an orphan file when the catalog write fails.
            let _ = tokio::fs::remove_file(&destination).await;
            return Err(err);
        }

        info!(
            "[Upload] Stored {} as {} ({} bytes)",
            record.original_filename, record.filename, size
        );
        return Ok(Json(record.into()));
    }

    Err(CatalogError::InvalidInput(
        "missing 'movie' file part".to_string(),
    ))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Streams one multipart part to disk. Any failure removes the partial file
/// before the error propagates.
async fn write_field(
    mut field: axum::extract::multipart::Field<'_>,
    destination: &StdPath,
) -> Result<u64, CatalogError> {
    let mut file = tokio::fs::File::create(destination).await?;
    let mut size: u64 = 0;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(destination).await;
                return Err(CatalogError::InvalidInput(format!("upload aborted: {err}")));
            }
        };
        if let Err(err) = file.write_all(&chunk).await {
            drop(file);
            let _ = tokio::fs::remove_file(destination).await;
            return Err(CatalogError::StorageFailure(err));
        }
        size += chunk.len() as u64;
    }

    file.sync_all().await?;
    Ok(size)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn test_dir(name: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("medley-catalog-api-test-{name}-{id}"));
        std::fs::create_dir_all(&dir).expect("failed to create test dir");
        dir
    }

    #[test]
    fn test_create_router() {
        let _router = create_router(test_dir("router"));
    }

    #[test]
    fn movie_response_carries_the_access_url() {
        let record = MovieRecord {
            id: "id".to_string(),
            title: "clip".to_string(),
            filename: "abc.mp4".to_string(),
            original_filename: "clip.mp4".to_string(),
            size: 1,
            uploaded_at: 0,
            mime_type: "video/mp4".to_string(),
            streamable: true,
        };
        let response = MovieResponse::from(record);
        assert_eq!(response.url, "/uploads/abc.mp4");
    }

}
