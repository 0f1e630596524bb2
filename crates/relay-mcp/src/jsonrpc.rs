//! JSON-RPC 2.0 framing for the worker protocol.

use serde::{Deserialize, Serialize};

/// Error code for a method the receiver does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response correlated to one of our requests.
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// Error reply to a request the worker sent us.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorReply {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    pub error: JsonRpcError,
}

impl JsonRpcErrorReply {
    pub fn method_not_found(id: serde_json::Value, method: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            error: JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            },
        }
    }
}

/// Anything a worker may write on its stdout.
#[derive(Debug, Clone)]
pub enum Incoming {
    Response(JsonRpcResponse),
    Request {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
    },
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Response ids are ours (numeric), but some servers echo them as strings.
fn numeric_id(id: &serde_json::Value) -> Option<u64> {
    match id {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl Incoming {
    /// Parse one line of worker output.
    ///
    /// Returns `None` for anything that is not a JSON-RPC message we can act
    /// on, so stray console output never reaches request correlation.
    pub fn parse(line: &str) -> Option<Self> {
        let raw: RawMessage = serde_json::from_str(line).ok()?;
        match (raw.id, raw.method) {
            (Some(id), Some(method)) => Some(Self::Request { id, method }),
            (None, Some(method)) => Some(Self::Notification { method }),
            (Some(id), None) => {
                if raw.result.is_none() && raw.error.is_none() {
                    return None;
                }
                Some(Self::Response(JsonRpcResponse {
                    id: numeric_id(&id)?,
                    result: raw.result,
                    error: raw.error,
                }))
            }
            (None, None) => None,
        }
    }
}
