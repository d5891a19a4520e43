use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::store::StoragePhase;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Malformed client input (bad JSON body, missing required parameter)
    InvalidRequest(String),
    /// Storage I/O failure (preserves sqlx::Error for logging)
    Storage(sqlx::Error),
    /// Event data could not be encoded/decoded as JSON
    Serialization(serde_json::Error),
    /// A schema migration failed to apply
    Migration(String),
    /// Requested phase transition is not a legal arrow of the state machine
    IllegalTransition { from: StoragePhase, to: StoragePhase },
    /// Promotion was requested while the active store is not a dual-write composite
    ExpectedDualWrite,
    /// Configuration error
    Config(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            Self::Storage(err) => write!(f, "storage error: {}", err),
            Self::Serialization(err) => write!(f, "serialization error: {}", err),
            Self::Migration(msg) => write!(f, "migration failed: {}", msg),
            Self::IllegalTransition { from, to } => {
                write!(f, "illegal transition: {} -> {}", from, to)
            }
            Self::ExpectedDualWrite => write!(f, "expected dual-write store"),
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::IllegalTransition { .. } | Self::ExpectedDualWrite => StatusCode::CONFLICT,
            Self::Storage(_) | Self::Serialization(_) | Self::Migration(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::InvalidRequest(_) => "invalid_request",
        AppError::Storage(_) => "storage_error",
        AppError::Serialization(_) => "serialization_error",
        AppError::Migration(_) => "migration_error",
        AppError::IllegalTransition { .. } => "illegal_transition",
        AppError::ExpectedDualWrite => "expected_dual_write",
        AppError::Config(_) => "config_error",
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}
