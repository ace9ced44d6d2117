//! Request and response types of the code-execution sandbox contract.
//!
//! The engine never interprets indicator code. It builds a [`SandboxRequest`],
//! hands it to a [`crate::ports::sandbox_port::Sandbox`], and checks that the
//! response has the shape the indicator promises.

use crate::domain::assembler::Record;
use crate::domain::error::EngineError;
use crate::domain::indicator::ExternalDataset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRequest {
    pub code: String,
    #[serde(rename = "data")]
    pub records: Vec<Record>,
    pub is_group: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub external_datasets: BTreeMap<String, ExternalDataset>,
}

/// Values produced by a successful run, aligned 1:1 with the request records.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SandboxValues {
    Series(Vec<Option<f64>>),
    Named(BTreeMap<String, Vec<Option<f64>>>),
}

/// Diagnostic payload of a failed run, passed to callers verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_line: Option<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFailure {
    pub error: String,
    pub error_type: String,
    pub details: ExecutionDetails,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SandboxResponse {
    Success(SandboxValues),
    Failure(ExecutionFailure),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    success: bool,
    #[serde(default)]
    values: Option<SandboxValues>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "type")]
    error_type: Option<String>,
    #[serde(default)]
    details: Option<ExecutionDetails>,
}

impl SandboxResponse {
    /// Parses the JSON document a sandbox writes back.
    pub fn from_json(payload: &str) -> Result<Self, EngineError> {
        let raw: RawResponse =
            serde_json::from_str(payload).map_err(|e| EngineError::Sandbox {
                reason: format!("unparseable sandbox response: {e}"),
            })?;

        if raw.success {
            let values = raw.values.ok_or_else(|| EngineError::InvalidOutput {
                reason: "successful response carries no values".into(),
            })?;
            return Ok(SandboxResponse::Success(values));
        }

        let mut details = raw.details.unwrap_or_default();
        let error = raw
            .error
            .or_else(|| (!details.message.is_empty()).then(|| details.message.clone()))
            .unwrap_or_else(|| "unknown sandbox error".to_string());
        let error_type = raw
            .error_type
            .or_else(|| (!details.error_type.is_empty()).then(|| details.error_type.clone()))
            .unwrap_or_else(|| "Error".to_string());
        if details.message.is_empty() {
            details.message = error.clone();
        }
        if details.error_type.is_empty() {
            details.error_type = error_type.clone();
        }

        Ok(SandboxResponse::Failure(ExecutionFailure {
            error,
            error_type,
            details,
        }))
    }
}
