//! A live connection to one worker.
//!
//! Handles the MCP handshake (initialize + initialized notification), tool
//! discovery (paginated tools/list), and tool invocation (tools/call).

use crate::config::WorkerConfig;
use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;
use crate::transport::{Transport, WorkerLauncher};
use chrono::{DateTime, Utc};
use relay_types::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// MCP protocol version we request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Versions we can talk to if the worker answers with something newer.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Lifecycle of a worker connection. Only `Ready` admits tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Ready,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A content block in a tools/call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
    #[serde(other)]
    Unsupported,
}

/// The raw outcome of tools/call, before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolResponse {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolResponse {
    /// Collapse the content blocks into a single value.
    ///
    /// Text-only content becomes one string (blocks joined by newlines, empty
    /// when there are none). Anything carrying binary or embedded data is
    /// returned as the array of blocks.
    pub fn normalize(self) -> serde_json::Value {
        let all_text = self
            .content
            .iter()
            .all(|c| matches!(c, ToolContent::Text { .. }));
        if all_text {
            serde_json::Value::String(self.joined_text())
        } else {
            serde_json::to_value(&self.content).unwrap_or(serde_json::Value::Null)
        }
    }

    /// All text blocks, in order, joined by newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Identity the worker reported during the handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Deserialize)]
struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    protocol_version: Option<String>,
    #[serde(default, rename = "serverInfo")]
    server_info: Option<ServerInfo>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Connection to a single worker. Exists only once the handshake succeeded.
pub struct WorkerConnection {
    name: String,
    config: WorkerConfig,
    transport: Box<dyn Transport>,
    tools: Vec<ToolDefinition>,
    server_info: ServerInfo,
    connected_at: DateTime<Utc>,
    state: AtomicU8,
}

impl WorkerConnection {
    /// Launch a worker, handshake, and discover its tools.
    ///
    /// Everything after the launch runs under the worker's connect timeout.
    /// On any failure the transport is shut down and `McpError::Connect` is
    /// returned; nothing is retried here.
    pub async fn connect(
        name: &str,
        config: &WorkerConfig,
        launcher: &dyn WorkerLauncher,
    ) -> Result<Self, McpError> {
        let connect_error = |reason: String| McpError::Connect {
            name: name.to_string(),
            reason,
        };

        let transport = launcher
            .launch(name, config)
            .map_err(|e| connect_error(e.to_string()))?;

        let handshake = tokio::time::timeout(
            config.connect_timeout(),
            handshake(transport.as_ref(), name, config),
        )
        .await;

        let (server_info, tools) = match handshake {
            Ok(Ok(discovered)) => discovered,
            Ok(Err(e)) => {
                transport.shutdown().await;
                return Err(connect_error(e.to_string()));
            }
            Err(_) => {
                transport.shutdown().await;
                return Err(connect_error(format!(
                    "handshake timed out after {}ms",
                    config.connect_timeout_ms
                )));
            }
        };

        tracing::info!(
            "MCP worker '{}' connected ({} {}) with {} tools",
            name,
            server_info.name,
            server_info.version,
            tools.len()
        );

        Ok(Self {
            name: name.to_string(),
            config: config.clone(),
            transport,
            tools,
            server_info,
            connected_at: Utc::now(),
            state: AtomicU8::new(ConnectionState::Ready as u8),
        })
    }

    /// Call a tool on this worker.
    ///
    /// A remote failure (JSON-RPC error or `isError: true`) is returned as
    /// `McpError::Execution` carrying the remote message; the connection stays
    /// usable.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResponse, McpError> {
        self.ensure_ready()?;

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let resp = self
            .transport
            .send_request("tools/call", Some(params), self.config.call_timeout())
            .await?;

        if let Some(err) = resp.error {
            return Err(McpError::Execution {
                worker: self.name.clone(),
                message: err.message,
            });
        }

        let result = resp.result.ok_or_else(|| {
            McpError::Protocol("tools/call response has neither result nor error".to_string())
        })?;

        let response: ToolResponse = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))?;

        if response.is_error {
            let text = response.joined_text();
            let message = if text.is_empty() {
                format!("Tool '{tool_name}' reported an error")
            } else {
                text
            };
            return Err(McpError::Execution {
                worker: self.name.clone(),
                message,
            });
        }

        Ok(response)
    }

    /// The tools discovered during the handshake.
    pub fn list_tools(&self) -> Result<&[ToolDefinition], McpError> {
        self.ensure_ready()?;
        Ok(&self.tools)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Current lifecycle state. A Ready connection whose worker has gone
    /// away reports `Disconnected`.
    pub fn state(&self) -> ConnectionState {
        match ConnectionState::from_u8(self.state.load(Ordering::SeqCst)) {
            ConnectionState::Ready if self.transport.is_closed() => ConnectionState::Disconnected,
            state => state,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Shut the worker down. Idempotent; only the first caller does the work.
    /// Also releases the transport of a worker that already exited.
    pub async fn close(&self) {
        let won = self
            .state
            .compare_exchange(
                ConnectionState::Ready as u8,
                ConnectionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if !won {
            return;
        }
        self.transport.shutdown().await;
        self.state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
        tracing::info!("MCP worker '{}' closed", self.name);
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(McpError::NotReady {
                name: self.name.clone(),
            })
        }
    }
}

/// Turn a JSON-RPC response into its result, or the worker's error.
fn into_result(resp: JsonRpcResponse, name: &str) -> Result<serde_json::Value, McpError> {
    if let Some(err) = resp.error {
        return Err(McpError::JsonRpc {
            server: name.to_string(),
            code: err.code,
            message: err.message,
        });
    }
    Ok(resp.result.unwrap_or(serde_json::Value::Null))
}

async fn handshake(
    transport: &dyn Transport,
    name: &str,
    config: &WorkerConfig,
) -> Result<(ServerInfo, Vec<ToolDefinition>), McpError> {
    let timeout = config.connect_timeout();

    let init_params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "relay",
            "version": env!("CARGO_PKG_VERSION")
        }
    });
    let resp = transport
        .send_request("initialize", Some(init_params), timeout)
        .await?;
    let init: InitializeResult = serde_json::from_value(into_result(resp, name)?)
        .map_err(|e| McpError::Protocol(format!("Malformed initialize response: {e}")))?;

    match init.protocol_version.as_deref() {
        Some(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v) => {}
        Some(v) => {
            return Err(McpError::Protocol(format!(
                "unsupported protocol version '{v}'"
            )));
        }
        None => tracing::warn!("MCP worker '{}' did not report a protocol version", name),
    }

    transport
        .send_notification("notifications/initialized", None)
        .await?;

    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = cursor
            .as_ref()
            .map(|c| serde_json::json!({ "cursor": c }));
        let resp = transport.send_request("tools/list", params, timeout).await?;
        let page: ToolsListResult = serde_json::from_value(into_result(resp, name)?)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/list response: {e}")))?;

        tools.extend(page.tools.into_iter().map(|t| ToolDefinition {
            name: t.name,
            description: t.description.unwrap_or_default(),
            input_schema: t.input_schema,
        }));

        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }

    Ok((init.server_info.unwrap_or_default(), tools))
}
