//! Error hierarchy for Relay.

use thiserror::Error;

/// Top-level error type for operations that may abort a caller.
///
/// Per-call tool failures are not in here: they travel as
/// [`ToolResult`](crate::ToolResult) data.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Failures of a single tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool '{name}' not found")]
    UnknownTool { name: String },

    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidInput { tool: String, message: String },

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("Worker unavailable for '{tool}': {message}")]
    Connection { tool: String, message: String },
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_message() {
        let err = ToolError::UnknownTool {
            name: "nope".into(),
        };
        assert_eq!(err.to_string(), "Tool 'nope' not found");
    }

    #[test]
    fn execution_failed_preserves_remote_message() {
        let err = ToolError::ExecutionFailed("Division by zero".into());
        assert_eq!(err.to_string(), "Division by zero");
    }

    #[test]
    fn tool_error_converts_into_relay_error() {
        let err: RelayError = ToolError::Timeout {
            tool: "search".into(),
            timeout_ms: 100,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Tool error: Tool 'search' timed out after 100ms"
        );
    }
}
