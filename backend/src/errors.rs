use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::ApiResponse;
use thiserror::Error;

/// Error taxonomy surfaced by the services.
///
/// Every variant except `Database` carries a caller-facing message;
/// storage errors are logged and reported as an opaque server error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            AppError::validation("month must be YYYY-MM").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::conflict("Category already exists").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::not_found("Category not found").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn storage_errors_map_to_500() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn display_carries_caller_message() {
        let err = AppError::validation("title must not be empty");
        assert_eq!(err.to_string(), "title must not be empty");
    }
}
