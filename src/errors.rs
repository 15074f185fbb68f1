use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

// Every failure a handler can produce. Unexpected ones (database, I/O,
// token encoding, hashing) surface as a generic 500; the details only go
// to the log.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Server error")]
    Database(#[from] mongodb::error::Error),
    #[error("Server error")]
    Io(#[from] std::io::Error),
    #[error("Server error")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("Server error")]
    Hash(#[from] argon2::Error),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) | ApiError::Auth(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Database(_) | ApiError::Io(_) | ApiError::Token(_) | ApiError::Hash(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code() == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("request failed: {:?}", self);
        }
        HttpResponse::build(self.status_code()).json(json!({
            "error": true,
            "message": self.to_string(),
        }))
    }
}
