//! Error types for plexfm-np HTTP handlers
//!
//! JSON errors for API callers, plus an HTML page for Last.fm
//! configuration failures the operator has to fix by hand.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::lastfm::LastFmError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Last.fm credentials could not be persisted (500, HTML page)
    #[error("Last.fm configuration error: {0}")]
    LastFmConfig(String),
}

impl From<LastFmError> for ApiError {
    fn from(err: LastFmError) -> Self {
        match err {
            LastFmError::NoPendingToken => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Minimal HTML escaping for error text shown in the config error page
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn config_error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Last.fm Configuration Error</title>
    <style>
        body {{ font-family: Arial, sans-serif; padding: 20px; }}
        .error-container {{
            background-color: #ffdddd;
            border-left: 6px solid #f44336;
            padding: 15px;
            margin-bottom: 15px;
        }}
        h1 {{ color: #d32f2f; }}
    </style>
</head>
<body>
    <div class="error-container">
        <h1>Last.fm Configuration Error</h1>
        <p>{}</p>
        <p>Please fix this issue and restart the application.</p>
    </div>
</body>
</html>
"#,
        escape_html(message)
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::LastFmConfig(msg) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, Html(config_error_page(&msg)))
                    .into_response();
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
