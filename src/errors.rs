//! Error handling module
//!
//! Typed, per-layer error enums with `#[from]` conversions at layer
//! boundaries; `anyhow` is reserved for the process-supervisor edge where
//! errors are only ever logged, never matched on.

use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::models::Source;

/// HTTP-facing errors, returned from handlers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("run not found: {0}")]
    RunNotFound(uuid::Uuid),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("a run is already in progress: {0}")]
    RunInProgress(uuid::Uuid),

    #[error("internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, code) = match self {
            AppError::RunNotFound(_) => (actix_web::http::StatusCode::NOT_FOUND, "RUN_NOT_FOUND"),
            AppError::ValidationError(_) => {
                (actix_web::http::StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::RunInProgress(_) => {
                (actix_web::http::StatusCode::ACCEPTED, "RUN_IN_PROGRESS")
            }
            AppError::InternalError(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        };
        HttpResponse::build(status).json(ErrorResponse {
            error: self.to_string(),
            code,
        })
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

/// Errors surfaced by the `DocumentStore` layer.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("duplicate natural key")]
    DuplicateKey,

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("query error: {0}")]
    QueryError(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::InternalError(anyhow::anyhow!(err))
    }
}

/// Per-record validation failure; local to a single record, never fatal to a run.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("{field} failed validation: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Errors surfaced by `SourceExtractor`. Transport/decode failures are
/// deliberately non-fatal: the extractor degrades to an empty sequence and
/// the caller continues.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("network error fetching source {source}: {message}")]
    Network { source: Source, message: String },

    #[error("failed to decode payload from source {source}: {message}")]
    Decode { source: Source, message: String },
}

/// A single batch's terminal failure inside the Orchestrator's per-source loop.
#[derive(Error, Debug)]
pub enum BatchFailure {
    #[error("sink error: {0}")]
    Sink(#[from] RepositoryError),

    #[error("injected fault for testing resume behavior")]
    FaultInjected,

    #[error("unexpected error: {0}")]
    Other(String),
}

/// Failures before per-source processing begins; these abort the whole run.
#[derive(Error, Debug)]
pub enum FatalSetupError {
    #[error("database unreachable: {0}")]
    DatabaseUnreachable(String),

    #[error("failed to create required indexes: {0}")]
    IndexCreationFailed(String),

    #[error("failed to write run ledger entry: {0}")]
    LedgerWriteFailed(String),
}

pub type AppResult<T> = Result<T, AppError>;
pub type RepoResult<T> = Result<T, RepositoryError>;
