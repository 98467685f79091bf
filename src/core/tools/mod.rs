//! Tools the model can call mid-conversation.
//!
//! Each integration is a [`ToolBackend`] exposing one or more named tools. The
//! [`ToolRouter`] owns the backends for one session, filters them by the agent's
//! enabled list, and guarantees that every call produces exactly one
//! [`ToolResult`].

pub mod crm;
pub mod docs;
pub mod router;
pub mod schema;
pub mod sheets;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use crm::{Contact, ContactStatus, ContactStore, CrmTools, InMemoryContactStore};
pub use docs::GoogleDocsTools;
pub use router::{ToolRouter, redact_arguments};
pub use schema::{SchemaError, ToolSchemaDialect};
pub use sheets::GoogleSheetsTools;

/// HTTP timeout for integration backends.
pub const TOOL_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Definitions and calls
// =============================================================================

/// Canonical (flat) tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A model-issued tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Provider call id, echoed back with the result
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: Option<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id,
            name: name.into(),
            arguments,
        }
    }

    /// Build a call from the JSON-encoded arguments string providers send.
    /// Empty arguments mean an empty object.
    pub fn from_raw(
        id: Option<String>,
        name: impl Into<String>,
        raw_arguments: &str,
    ) -> Result<Self, ToolError> {
        let arguments = if raw_arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(raw_arguments)
                .map_err(|e| ToolError::InvalidArgument(format!("Invalid tool arguments: {e}")))?
        };
        Ok(Self::new(id, name, arguments))
    }
}

/// Outcome of one tool call, as returned to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// JSON text handed back to the model.
    pub fn to_model_output(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"success":false,"error":"unserializable tool result"}"#.into())
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        ToolResult::failure(err.to_string())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Tool backend failures. Messages are written for the model to relay.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl ToolError {
    /// Stable error code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ToolError::NotFound(_) | ToolError::UnknownTool(_) => "NOT_FOUND",
            ToolError::PermissionDenied(_) => "PERMISSION_DENIED",
            ToolError::ExecutionFailed(_) | ToolError::Request(_) => "EXECUTION_FAILED",
            ToolError::Timeout { .. } => "TIMEOUT",
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        ToolError::Request(err.to_string())
    }
}

// =============================================================================
// Backend trait
// =============================================================================

/// A group of tools served by one integration.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Integration name, for logs
    fn name(&self) -> &'static str;

    /// Canonical definitions of every tool this backend serves.
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Run `tool` with `arguments`. `Ok` carries the structured payload.
    async fn execute(&self, tool: &str, arguments: &Value) -> Result<Value, ToolError>;

    /// Release backend resources at session end.
    async fn close(&self) {}
}

/// Optional string argument, ignoring blanks.
pub(crate) fn arg_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Required string argument.
pub(crate) fn require_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arg_str(arguments, key)
        .ok_or_else(|| ToolError::InvalidArgument(format!("Missing required argument '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_raw_parses_arguments() {
        let call = ToolCall::from_raw(Some("c1".into()), "sheets_search", r#"{"query":"burger"}"#)
            .unwrap();
        assert_eq!(call.arguments, json!({"query": "burger"}));
    }

    #[test]
    fn test_from_raw_empty_is_object() {
        let call = ToolCall::from_raw(None, "sheets_list_sheets", "").unwrap();
        assert_eq!(call.arguments, json!({}));
    }

    #[test]
    fn test_from_raw_rejects_bad_json() {
        let err = ToolCall::from_raw(None, "x", "{not json").unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_result_model_output() {
        let ok = ToolResult::success(json!({"found": true}));
        assert_eq!(ok.to_model_output(), r#"{"success":true,"data":{"found":true}}"#);
        let failed = ToolResult::from(ToolError::UnknownTool("nope".into()));
        assert_eq!(
            failed.to_model_output(),
            r#"{"success":false,"error":"Unknown tool: nope"}"#
        );
    }

    #[test]
    fn test_require_arg() {
        let args = json!({"query": "  ", "item_name": "Burger"});
        assert!(require_arg(&args, "query").is_err());
        assert_eq!(require_arg(&args, "item_name").unwrap(), "Burger");
    }
}
