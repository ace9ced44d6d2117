//! Engine error types and the flat error taxonomy reported to callers.

use crate::domain::indicator::{IndicatorId, StockId, UserId};
use crate::domain::sandbox::{ExecutionDetails, ExecutionFailure};
use serde::Serialize;
use std::fmt;

/// Caller-facing error categories. Every [`EngineError`] maps onto exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    NoData,
    ExecutionError,
    ValidationError,
    PersistenceError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::NoData => "NoData",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::PersistenceError => "PersistenceError",
        };
        f.write_str(name)
    }
}

/// Top-level error type for the indicator engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("indicator {id} not found")]
    IndicatorNotFound { id: IndicatorId },

    #[error("stock {id} not found")]
    StockNotFound { id: StockId },

    #[error("user {requester_id} may not access private indicator {indicator_id}")]
    AccessDenied {
        indicator_id: IndicatorId,
        requester_id: UserId,
    },

    #[error("no price data for stock {stock_id} in the requested range")]
    NoData { stock_id: StockId },

    #[error("dependency {dependency_id} has no cached values for stock {stock_id}")]
    MissingDependency {
        dependency_id: IndicatorId,
        stock_id: StockId,
    },

    #[error("indicator {id} is malformed: {reason}")]
    InvalidIndicator { id: IndicatorId, reason: String },

    #[error("sandbox execution failed: {}", .0.error)]
    Execution(ExecutionFailure),

    #[error("sandbox unavailable: {reason}")]
    Sandbox { reason: String },

    #[error("invalid sandbox output: {reason}")]
    InvalidOutput { reason: String },

    #[error("group output missing expected keys: {}", .missing.join(", "))]
    MissingOutputs { missing: Vec<String> },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("failed to persist cached values: {reason}")]
    Persistence { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::IndicatorNotFound { .. } | EngineError::StockNotFound { .. } => {
                ErrorKind::NotFound
            }
            EngineError::AccessDenied { .. } => ErrorKind::AccessDenied,
            EngineError::NoData { .. } | EngineError::MissingDependency { .. } => {
                ErrorKind::NoData
            }
            EngineError::Execution(_) | EngineError::Sandbox { .. } => ErrorKind::ExecutionError,
            EngineError::InvalidIndicator { .. }
            | EngineError::InvalidOutput { .. }
            | EngineError::MissingOutputs { .. }
            | EngineError::ConfigParse { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. } => ErrorKind::ValidationError,
            EngineError::Database { .. }
            | EngineError::DatabaseQuery { .. }
            | EngineError::Persistence { .. }
            | EngineError::Io(_) => ErrorKind::PersistenceError,
        }
    }
}

/// Structured failure attached to result records; the sandbox's diagnostic
/// payload is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error: String,
    pub error_kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ExecutionDetails>,
}

impl From<&EngineError> for ErrorReport {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Execution(failure) => ErrorReport {
                error: failure.error.clone(),
                error_kind: ErrorKind::ExecutionError,
                error_type: Some(failure.error_type.clone()),
                details: Some(failure.details.clone()),
            },
            EngineError::Sandbox { reason } => ErrorReport {
                error: reason.clone(),
                error_kind: ErrorKind::ExecutionError,
                error_type: Some("SandboxUnavailable".into()),
                details: None,
            },
            other => ErrorReport {
                error: other.to_string(),
                error_kind: other.kind(),
                error_type: None,
                details: None,
            },
        }
    }
}

impl From<&EngineError> for std::process::ExitCode {
    fn from(err: &EngineError) -> Self {
        let code: u8 = match err {
            EngineError::Io(_) => 1,
            EngineError::ConfigParse { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. } => 2,
            EngineError::Database { .. }
            | EngineError::DatabaseQuery { .. }
            | EngineError::Persistence { .. } => 3,
            EngineError::Execution(_)
            | EngineError::Sandbox { .. }
            | EngineError::InvalidIndicator { .. }
            | EngineError::InvalidOutput { .. }
            | EngineError::MissingOutputs { .. } => 4,
            EngineError::IndicatorNotFound { .. }
            | EngineError::StockNotFound { .. }
            | EngineError::AccessDenied { .. }
            | EngineError::NoData { .. }
            | EngineError::MissingDependency { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
