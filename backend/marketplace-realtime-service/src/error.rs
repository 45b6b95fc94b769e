use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Distinguishes between retryable and permanent errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from a client; reported back, nothing persisted
    Client,
    /// Infrastructure failure; logged, operation aborted
    Transient,
    Permanent,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("presence cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("notification error: {0}")]
    Notification(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::BadRequest(_)
            | AppError::Unauthorized
            | AppError::Forbidden(_)
            | AppError::NotFound(_) => ErrorKind::Client,
            AppError::Database(_)
            | AppError::Cache(_)
            | AppError::Embedding(_)
            | AppError::Notification(_) => ErrorKind::Transient,
            AppError::Config(_) | AppError::StartServer(_) => ErrorKind::Permanent,
        }
    }

    /// Returns whether this error is retryable (e.g., database connection timeout)
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => {
                matches!(
                    e,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                )
            }
            AppError::Cache(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            AppError::Embedding(_) | AppError::Notification(_) => true,
            _ => false,
        }
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Embedding(_) => 502,
            AppError::Cache(_) => 503,
            AppError::Database(_) | AppError::Notification(_) => 500,
            AppError::Config(_) | AppError::StartServer(_) => 500,
        }
    }

    /// Text placed in an `error` frame. Infrastructure details stay in the logs.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Client => match self {
                AppError::BadRequest(msg) => msg.clone(),
                AppError::Forbidden(msg) => msg.clone(),
                AppError::NotFound(msg) => msg.clone(),
                other => other.to_string(),
            },
            _ => "internal error, please retry".to_string(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG",
            AppError::StartServer(_) => "START_SERVER",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Database(_) => "DATABASE",
            AppError::Cache(_) => "CACHE",
            AppError::Embedding(_) => "EMBEDDING",
            AppError::Notification(_) => "NOTIFICATION",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(json!({
            "error": self.client_message(),
            "code": self.code(),
        }))
    }
}
