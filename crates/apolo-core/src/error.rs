//! Unified error handling for the charging engine
//!
//! Every failure of the core maps to one variant of [`AppError`]. The
//! variants follow the engine's error taxonomy (not found, missing mandatory
//! fields, duplicates, insufficient funds, lock timeouts, server errors) and
//! carry an HTTP mapping for the API boundary.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the engine should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // ==================== Validation Errors ====================
    #[error("Mandatory field(s) missing: {}", .0.join(", "))]
    MandatoryFieldMissing(Vec<String>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Business Logic Errors ====================
    #[error("Insufficient funds on {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: String,
        required: String,
        available: String,
    },

    #[error("Account disabled: {0}")]
    AccountDisabled(String),

    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    // ==================== Storage Errors ====================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ==================== Internal Errors ====================
    #[error("Server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Shorthand for a single missing mandatory field
    pub fn missing(field: &str) -> Self {
        AppError::MandatoryFieldMissing(vec![field.to_string()])
    }

    /// Returns true for the `NotFound` class
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::MandatoryFieldMissing(_)
            | AppError::InvalidInput(_)
            | AppError::UnknownAction(_) => StatusCode::BAD_REQUEST,

            // 402 Payment Required
            AppError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,

            // 403 Forbidden
            AppError::AccountDisabled(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,

            // 503 Service Unavailable
            AppError::LockTimeout(_) | AppError::CacheConnection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::MandatoryFieldMissing(_) => "mandatory_field_missing",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::InsufficientFunds { .. } => "insufficient_funds",
            AppError::AccountDisabled(_) => "account_disabled",
            AppError::LockTimeout(_) => "lock_timeout",
            AppError::UnknownAction(_) => "unknown_action",
            AppError::Storage(_) => "storage_error",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Server(_) => "server_error",
            AppError::Config(_) => "config_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Server(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = err
            .field_errors()
            .into_iter()
            .map(|(field, _)| field.to_string())
            .collect();
        fields.sort();
        AppError::MandatoryFieldMissing(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::NotFound("cgrates.org:1001".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InsufficientFunds {
                account: "cgrates.org:1001".to_string(),
                required: "10.00".to_string(),
                available: "5.00".to_string()
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::LockTimeout("cgrates.org:1001".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Server("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::AlreadyExists("x".to_string()).error_code(),
            "already_exists"
        );
        assert_eq!(AppError::missing("Account").error_code(), "mandatory_field_missing");
    }

    #[test]
    fn test_mandatory_field_message_lists_fields() {
        let err = AppError::MandatoryFieldMissing(vec!["Tenant".into(), "Account".into()]);
        assert_eq!(err.to_string(), "Mandatory field(s) missing: Tenant, Account");
    }
}
