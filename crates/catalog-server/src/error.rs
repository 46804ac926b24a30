use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("storage failure: {0}")]
    StorageFailure(#[from] std::io::Error),
}

impl CatalogError {
    fn status(&self) -> StatusCode {
        match self {
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CatalogError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            CatalogError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            CatalogError::NotFound(_) => "not_found",
            CatalogError::InvalidInput(_) => "invalid_input",
            CatalogError::UnsupportedType(_) => "unsupported_type",
            CatalogError::StorageFailure(_) => "storage_failure",
        }
    }
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.code(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
