//! Application error types

use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this error means the session token is unusable and the user
    /// must re-authenticate. Transport retries never recover from these.
    pub fn is_auth(&self) -> bool {
        match self {
            AppError::Auth(_) => true,
            AppError::Http(e) => e
                .status()
                .map(|s| s == reqwest::StatusCode::UNAUTHORIZED || s == reqwest::StatusCode::FORBIDDEN)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Serializable error response for the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::Http(_) => "HTTP_ERROR",
            AppError::WebSocket(_) => "WEBSOCKET_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Api(_) => "API_ERROR",
            AppError::Stream(_) => "STREAM_ERROR",
            AppError::Parse(_) => "PARSE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_classification() {
        assert!(AppError::Auth("token expired".to_string()).is_auth());
        assert!(!AppError::Stream("connection reset".to_string()).is_auth());
        assert!(!AppError::NotFound("job j1".to_string()).is_auth());
    }

    #[test]
    fn test_error_response_codes() {
        let resp = ErrorResponse::from(&AppError::Auth("bad token".to_string()));
        assert_eq!(resp.code, "AUTH_ERROR");
        assert!(resp.message.contains("bad token"));
    }
}
