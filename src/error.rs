use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::tokens::TokenError;

/// Handler-level error taxonomy. Rendered into the failure envelope at the
/// HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing, empty or malformed input.
    #[error("{message}")]
    Validation {
        message: String,
        fields: Vec<String>,
    },

    /// Username or email already taken.
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials or an invalid/expired token.
    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    NotFound(String),

    /// Media upload or persistence failure.
    #[error("{message}")]
    Upstream {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn missing_fields(fields: Vec<String>) -> Self {
        Self::Validation {
            message: "All fields are required".into(),
            fields,
        }
    }

    pub fn upstream(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Upstream {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Auth(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::validation(e.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(e: MultipartRejection) -> Self {
        AppError::validation(e.body_text())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    message: String,
    success: bool,
    errors: Vec<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let AppError::Upstream { message, source } = &self {
            tracing::error!(error = ?source, %message, "upstream failure");
        }
        let message = self.to_string();
        let errors = match self {
            AppError::Validation { fields, .. } => fields,
            _ => Vec::new(),
        };
        let body = ErrorBody {
            status_code: status.as_u16(),
            message,
            success: false,
            errors,
        };
        (status, Json(body)).into_response()
    }
}
