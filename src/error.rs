use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::ledger::models::ProviderKind;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Address derivation failed: {0}")]
    Derivation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("A reconciliation cycle is already running")]
    CycleInProgress,

    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Errors raised by a chain data provider.
///
/// These never escape the prober: a failed probe degrades to a "no data"
/// observation for the current cycle.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("HTTP request to {provider} failed: {message}")]
    Http {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} returned HTTP {status}")]
    Status { provider: ProviderKind, status: u16 },

    #[error("{provider} call timed out after {timeout:?}")]
    Timeout {
        provider: ProviderKind,
        timeout: Duration,
    },

    #[error("Malformed response from {provider}: {message}")]
    Malformed {
        provider: ProviderKind,
        message: String,
    },
}

impl ProbeError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProbeError::Http { .. } | ProbeError::Timeout { .. } => true,
            ProbeError::Status { status, .. } => *status == 429 || *status >= 500,
            ProbeError::Malformed { .. } => false,
        }
    }
}

/// Settings-store errors. Fatal for the reconciliation cycle that hit them.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("btc_xpub is not configured")]
    MissingXpub,

    #[error("btc_xpub does not belong to the {expected} network")]
    XpubNetworkMismatch { expected: String },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Missing or invalid cron token".to_string(),
                None,
            ),
            AppError::CycleInProgress => (
                StatusCode::CONFLICT,
                "CYCLE_IN_PROGRESS",
                "A reconciliation cycle is already running".to_string(),
                None,
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded. Please try again later.".to_string(),
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg,
                None,
            ),
            AppError::InvalidAddress(address) => (
                StatusCode::BAD_REQUEST,
                "INVALID_ADDRESS",
                format!("Invalid address: {}", address),
                Some(serde_json::json!({ "address": address })),
            ),
            AppError::Settings(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SETTINGS_ERROR",
                err.to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<bitcoin::util::bip32::Error> for AppError {
    fn from(error: bitcoin::util::bip32::Error) -> Self {
        AppError::Derivation(error.to_string())
    }
}

impl From<bitcoin::util::address::Error> for AppError {
    fn from(error: bitcoin::util::address::Error) -> Self {
        AppError::Derivation(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
