use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::forms::FieldErrors;
use crate::media::MediaError;
use crate::relations::RelationError;
use crate::repository::RepositoryError;
use crate::schedule::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Invalid page")]
    InvalidPage,

    #[error("Authentication credentials were not provided")]
    Unauthenticated,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Forbidden")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0:?}")]
    Validation(FieldErrors),

    #[error("Repository error: {0}")]
    Repository(RepositoryError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(_) => AppError::NotFound,
            RepositoryError::Conflict(msg) => AppError::BadRequest(msg),
            other => AppError::Repository(other),
        }
    }
}

impl From<RelationError> for AppError {
    fn from(err: RelationError) -> Self {
        match err {
            RelationError::SelfReference(relation) => {
                AppError::BadRequest(format!("You cannot {} yourself.", relation.verb()))
            }
            RelationError::Repository(e) => e.into(),
        }
    }
}

impl From<FieldErrors> for AppError {
    fn from(errors: FieldErrors) -> Self {
        AppError::Validation(errors)
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound => detail(StatusCode::NOT_FOUND, "Not found."),
            AppError::InvalidPage => detail(StatusCode::NOT_FOUND, "Invalid page."),
            AppError::Unauthenticated => detail(
                StatusCode::UNAUTHORIZED,
                "Authentication credentials were not provided.",
            ),
            AppError::InvalidToken => detail(StatusCode::UNAUTHORIZED, "Invalid token."),
            AppError::Forbidden => detail(
                StatusCode::FORBIDDEN,
                "You do not have permission to perform this action.",
            ),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            AppError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, Json(errors)).into_response()
            }
            AppError::Repository(e) => {
                tracing::error!("Repository error: {}", e);
                detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Media(e) => {
                tracing::error!("Media error: {}", e);
                detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Queue(e) => {
                tracing::error!("Queue error: {}", e);
                detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
