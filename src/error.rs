use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not Found")]
    NotFound,

    #[error("Unknown suite: {0}")]
    UnknownSuite(String),

    #[error("Unknown test '{test_id}' in suite '{suite_id}'")]
    UnknownTest { suite_id: String, test_id: String },

    #[error("Datapoint '{datapoint_id}' not found for {suite_id}/{test_id}")]
    DatapointNotFound {
        suite_id: String,
        test_id: String,
        datapoint_id: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::UnknownSuite(_) => StatusCode::NOT_FOUND,
            ApiError::UnknownTest { .. } => StatusCode::NOT_FOUND,
            ApiError::DatapointNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render as the public error envelope. The debug chain is only exposed
    /// in dev mode.
    pub fn envelope(self, dev_mode: bool) -> ErrorResponse {
        if self.status().is_server_error() {
            tracing::error!("API error: {}", self);
        }
        ErrorResponse {
            status: self.status(),
            message: self.to_string(),
            detail: dev_mode.then(|| format!("{:?}", self)),
        }
    }
}

#[derive(Debug)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub message: String,
    pub detail: Option<String>,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let error = match self.detail {
            Some(detail) => serde_json::Value::String(detail),
            None => serde_json::json!({}),
        };
        let body = serde_json::json!({
            "error_message": self.message,
            "error": error,
        });

        (self.status, axum::Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.envelope(false).into_response()
    }
}
