//! Tool definitions, calls and results shared between the core and its callers.

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// A tool as advertised to the model: name, description and input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a call with a fresh id.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a call with an id supplied by the model provider.
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// What a call produced: a value or an error message, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(serde_json::Value),
    Failure(String),
}

/// The terminal record of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: ToolCall, value: serde_json::Value) -> Self {
        Self {
            call_id: call.id,
            tool_name: call.name,
            arguments: call.arguments,
            outcome: ToolOutcome::Success(value),
        }
    }

    pub fn failure(call: ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id,
            tool_name: call.name,
            arguments: call.arguments,
            outcome: ToolOutcome::Failure(message.into()),
        }
    }

    /// Turn a per-call error into data the model can read.
    pub fn from_error(call: ToolCall, error: &ToolError) -> Self {
        Self::failure(call, error.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            ToolOutcome::Success(v) => Some(v),
            ToolOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Success(_) => None,
            ToolOutcome::Failure(e) => Some(e),
        }
    }

    /// Text to place in the transcript as the tool's answer.
    pub fn to_content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success(serde_json::Value::String(s)) => s.clone(),
            ToolOutcome::Success(v) => v.to_string(),
            ToolOutcome::Failure(e) => format!("Error: {e}"),
        }
    }
}

/// Wire shape: `{toolName, args, success, result}` or `{toolName, args, success, error}`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireResult<'a> {
    call_id: &'a str,
    tool_name: &'a str,
    args: &'a serde_json::Value,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl Serialize for ToolResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireResult {
            call_id: &self.call_id,
            tool_name: &self.tool_name,
            args: &self.arguments,
            success: self.is_success(),
            result: self.result(),
            error: self.error(),
        }
        .serialize(serializer)
    }
}
