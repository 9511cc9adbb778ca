use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recorder call failed: {0}")]
    Remote(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for ShareError {
    fn from(e: reqwest::Error) -> Self {
        ShareError::Remote(e.to_string())
    }
}

impl IntoResponse for ShareError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ShareError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ShareError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ShareError::Unsupported(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ShareError::Remote(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ShareError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;
