//! Error types for obra-interop
//!
//! Pipeline taxonomy:
//! - [`ConfigurationError`]: programmer error (unknown type, missing rule set), always fatal
//! - [`MappingError`]: record cannot be expressed in the wire format
//! - [`TransportError`]: network, timeout, non-success status, malformed body
//! - [`EligibilityError`]: record stage does not allow submission
//! - [`PipelineError`]: the only error that escapes the coordinator and reconciler
//!
//! Validation problems are data ([`crate::models::ValidationResult`]), not errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{RecordStage, RecordType};

/// Caller or deployment bug; never retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("unknown record type '{0}'")]
    UnknownRecordType(String),

    #[error("no rule set registered for record type '{0}'")]
    MissingRuleSet(RecordType),

    #[error("rule for {record_type} references unknown field '{field}'")]
    UnknownField { record_type: RecordType, field: String },

    #[error("{rule} rule cannot apply to {kind} field '{field}' of {record_type}")]
    IncompatibleRule {
        record_type: RecordType,
        field: String,
        rule: &'static str,
        kind: &'static str,
    },
}

/// Schema mismatch between a record and the wire format
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("wire field '{wire_field}' has no source field '{source_field}' on {record_type}")]
    MissingSource {
        record_type: RecordType,
        wire_field: String,
        source_field: String,
    },

    #[error("wire field '{wire_field}' expects {expected}, source holds {found}")]
    TypeMismatch {
        wire_field: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Failure talking to the Regulator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("regulator returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Record stage does not allow outbound submission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{record_type} {record_id} is not eligible for submission in stage '{}'", .stage.as_str())]
pub struct EligibilityError {
    pub record_id: String,
    pub record_type: RecordType,
    pub stage: RecordStage,
}

/// Errors that abort a whole batch or import run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Requested records could not be loaded; nothing was recorded
    #[error("Batch error: {0}")]
    Batch(String),

    /// Ledger could not be written
    #[error("Storage error: {0}")]
    Storage(#[from] obra_common::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Pipeline error
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// obra-common error
    #[error("Common error: {0}")]
    Common(#[from] obra_common::Error),
}

impl From<ConfigurationError> for ApiError {
    fn from(err: ConfigurationError) -> Self {
        ApiError::Pipeline(PipelineError::Configuration(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Pipeline(PipelineError::Configuration(ref err)) => {
                (StatusCode::BAD_REQUEST, "CONFIGURATION_ERROR", err.to_string())
            }
            ApiError::Pipeline(PipelineError::Batch(ref msg)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BATCH_ERROR", msg.clone())
            }
            ApiError::Pipeline(PipelineError::Storage(ref err)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                err.to_string(),
            ),
            ApiError::Common(obra_common::Error::Config(ref msg)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "CONFIG_ERROR", msg.clone())
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
