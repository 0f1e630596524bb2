//! Error types for MCP operations.

use thiserror::Error;

/// Errors from worker communication and supervision.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP worker '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("Failed to connect to MCP worker '{name}': {reason}")]
    Connect { name: String, reason: String },

    #[error("No MCP worker named '{name}' is configured")]
    UnknownWorker { name: String },

    #[error("MCP worker '{name}' is not ready")]
    NotReady { name: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("{message}")]
    Execution { worker: String, message: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
