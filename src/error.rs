//! Provider error types

use serde::Serialize;
use thiserror::Error;

/// Provider-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ticker does not reduce to a recognizable code
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Stored payload cannot be reconstructed; the cache store recovers from this itself
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Raised by an injected compute or fetch function
    #[error("Compute error: {0}")]
    Compute(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Zero base share count: {0}")]
    ZeroBase(String),

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

/// Serializable error response for the host platform
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::DuckDb(_) => "DUCKDB_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::InvalidSymbol(_) => "INVALID_SYMBOL",
            AppError::Deserialization(_) => "DESERIALIZATION_ERROR",
            AppError::Compute(_) => "COMPUTE_ERROR",
            AppError::Parse(_) => "PARSE_ERROR",
            AppError::ZeroBase(_) => "ZERO_BASE_ERROR",
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

impl From<AppError> for ErrorResponse {
    fn from(err: AppError) -> Self {
        ErrorResponse::from(&err)
    }
}

// Lets the host hand errors straight to its JSON layer
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        ErrorResponse::from(self).serialize(serializer)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let response = ErrorResponse::from(AppError::InvalidSymbol("ABC".to_string()));
        assert_eq!(response.code, "INVALID_SYMBOL");
        assert_eq!(response.message, "Invalid symbol: ABC");

        let response = ErrorResponse::from(AppError::ZeroBase("0派5元".to_string()));
        assert_eq!(response.code, "ZERO_BASE_ERROR");
    }

    #[test]
    fn test_error_serializes_as_response() {
        let json = serde_json::to_value(AppError::Compute("upstream timeout".to_string())).unwrap();
        assert_eq!(json["code"], "COMPUTE_ERROR");
        assert_eq!(json["message"], "Compute error: upstream timeout");
    }
}
