use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("ffmpeg is not installed")]
    ToolUnavailable,
    #[error("conversion failed: {0}")]
    ConversionFailed(String),
    #[error("streaming failed: {0}")]
    StreamingFailed(String),
}

impl StreamError {
    fn status(&self) -> StatusCode {
        match self {
            StreamError::NotFound(_) => StatusCode::NOT_FOUND,
            StreamError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            StreamError::ToolUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            StreamError::ConversionFailed(_) | StreamError::StreamingFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            StreamError::NotFound(_) => "not_found",
            StreamError::InvalidInput(_) => "invalid_input",
            StreamError::ToolUnavailable => "tool_unavailable",
            StreamError::ConversionFailed(_) => "conversion_failed",
            StreamError::StreamingFailed(_) => "streaming_failed",
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.code(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::StreamingFailed(err.to_string())
    }
}
