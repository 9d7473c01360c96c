use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Shared handler result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Every way a request can fail. All variants except `Storage` are client
/// errors detected before any write.
#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("{0}")]
    InvalidParameter(String),
    #[error("{0}")]
    MissingField(String),
    #[error("{0}")]
    ParseError(String),
    #[error("{0}")]
    SchemaError(String),
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("Invalid salary for \"{name}\"")]
    InvalidSalary { name: String },
    #[error("{public}")]
    Storage {
        public: &'static str,
        cause: Arc<anyhow::Error>,
    },
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidParameter(_) => "INVALID_PARAMETER",
            ApiError::MissingField(_) => "MISSING_FIELD",
            ApiError::ParseError(_) => "PARSE_ERROR",
            ApiError::SchemaError(_) => "SCHEMA_ERROR",
            ApiError::EmptyName => "EMPTY_NAME",
            ApiError::InvalidSalary { .. } => "INVALID_SALARY",
            ApiError::Storage { .. } => "STORAGE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Wrap an engine failure. `public` is the only text the client sees.
    pub fn storage(public: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self::Storage {
            public,
            cause: Arc::new(err.into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Storage { cause, .. } => {
                error!(code = self.code(), error = %cause, "storage failure");
            }
            _ => warn!(code = self.code(), message = %self, "request rejected"),
        }
        let message = self.to_string();
        (self.status(), Json(ErrorBody { error: &message })).into_response()
    }
}
