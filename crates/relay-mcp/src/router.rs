//! Tool router: the entry point the orchestration loop calls per tool use.
//!
//! Every call goes through existence → validation → execution, in that
//! order, so a call that is unroutable or malformed never reaches a worker.
//! All per-call failures come back as [`ToolResult`] data.

use crate::error::McpError;
use crate::manager::ConnectionManager;
use crate::schema::validate_arguments;
use futures_util::future::join_all;
use relay_types::util::preview;
use relay_types::{ToolCall, ToolDefinition, ToolError, ToolResult};
use std::sync::Arc;
use tracing::Instrument;

/// Longest result preview written to the debug log.
const LOG_PREVIEW_BYTES: usize = 200;

/// Routes tool calls to the worker that owns them.
#[derive(Clone)]
pub struct ToolRouter {
    manager: Arc<ConnectionManager>,
}

impl ToolRouter {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// The combined tool set of every worker that could be connected.
    pub async fn list_all_tools(&self) -> Vec<ToolDefinition> {
        self.manager.all_tools().await.definitions()
    }

    /// Execute one call. Never fails: errors are in the returned result.
    pub async fn call_tool(&self, call: ToolCall) -> ToolResult {
        let span = tracing::info_span!("tool_call", tool = %call.name, id = %call.id);
        async move {
            match self.dispatch(&call).await {
                Ok(value) => {
                    tracing::debug!("Tool succeeded: {}", preview(&value, LOG_PREVIEW_BYTES));
                    ToolResult::success(call, value)
                }
                Err(e) => {
                    tracing::debug!("Tool failed: {e}");
                    ToolResult::from_error(call, &e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Execute one step's calls concurrently; results keep request order.
    ///
    /// Calls to different workers run in parallel; calls to the same worker
    /// share its connection and are correlated by request id.
    pub async fn call_tools(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        join_all(calls.into_iter().map(|call| self.call_tool(call))).await
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<serde_json::Value, ToolError> {
        let registry = self.manager.all_tools().await;
        let tool = registry
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: call.name.clone(),
            })?;

        validate_arguments(&tool.definition.input_schema, &call.arguments).map_err(|message| {
            ToolError::InvalidInput {
                tool: call.name.clone(),
                message,
            }
        })?;

        let conn = self
            .manager
            .get_connection(&tool.worker)
            .await
            .map_err(|e| ToolError::Connection {
                tool: call.name.clone(),
                message: e.to_string(),
            })?;

        let arguments = if call.arguments.is_null() {
            serde_json::json!({})
        } else {
            call.arguments.clone()
        };

        let response = conn
            .call_tool(&tool.remote_name, arguments)
            .await
            .map_err(|e| match e {
                McpError::Execution { message, .. } => ToolError::ExecutionFailed(message),
                McpError::Timeout { timeout_ms, .. } => ToolError::Timeout {
                    tool: call.name.clone(),
                    timeout_ms,
                },
                other => ToolError::ExecutionFailed(other.to_string()),
            })?;

        Ok(response.normalize())
    }
}
