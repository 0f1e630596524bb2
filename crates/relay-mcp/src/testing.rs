//! In-process fake workers for exercising the core without subprocesses.

use crate::config::WorkerConfig;
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcError, JsonRpcResponse};
use crate::transport::{Transport, WorkerLauncher, duration_ms};
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a fake worker answers a tools/call.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Text(String),
    /// `isError: true` with the message as a text block.
    ToolError(String),
    /// A JSON-RPC error object.
    RpcError(String),
    /// A verbatim `result` payload.
    Raw(Value),
    /// Never answers.
    Hang,
    /// The worker process goes away mid-call.
    Exit,
}

type Handler = Arc<dyn Fn(&str, &Value) -> FakeReply + Send + Sync>;

#[derive(Default)]
struct Counters {
    sends: AtomicUsize,
    calls: AtomicUsize,
    shutdowns: AtomicUsize,
}

/// Scripted worker. Clones share counters, so a test can keep one handle
/// while the launcher owns another.
#[derive(Clone)]
pub struct FakeWorker {
    server_name: String,
    tools: Vec<Value>,
    handler: Handler,
    protocol_version: String,
    handshake_delay: Duration,
    page_size: usize,
    counters: Arc<Counters>,
}

impl FakeWorker {
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            tools: Vec::new(),
            handler: Arc::new(|name, _| FakeReply::RpcError(format!("Unknown tool: {name}"))),
            protocol_version: "2024-11-05".to_string(),
            handshake_delay: Duration::ZERO,
            page_size: usize::MAX,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn tool(mut self, name: &str, schema: Value) -> Self {
        self.tools.push(json!({
            "name": name,
            "description": format!("{name} tool"),
            "inputSchema": schema,
        }));
        self
    }

    pub fn handler(
        mut self,
        f: impl Fn(&str, &Value) -> FakeReply + Send + Sync + 'static,
    ) -> Self {
        self.handler = Arc::new(f);
        self
    }

    pub fn protocol_version(mut self, version: &str) -> Self {
        self.protocol_version = version.to_string();
        self
    }

    pub fn handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Requests and notifications received across all launches.
    pub fn sends(&self) -> usize {
        self.counters.sends.load(Ordering::SeqCst)
    }

    /// tools/call requests received across all launches.
    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.counters.shutdowns.load(Ordering::SeqCst)
    }

    pub fn was_shut_down(&self) -> bool {
        self.shutdowns() > 0
    }

    fn tools_page(&self, params: Option<&Value>) -> Value {
        let start: usize = params
            .and_then(|p| p.get("cursor"))
            .and_then(|c| c.as_str())
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let end = start.saturating_add(self.page_size).min(self.tools.len());
        let mut page = json!({ "tools": &self.tools[start..end] });
        if end < self.tools.len() {
            page["nextCursor"] = json!(end.to_string());
        }
        page
    }
}

/// `calc` worker: `add(numbers: number[])` and `divide(a, b)`.
pub fn calc_worker() -> FakeWorker {
    FakeWorker::new("calc")
        .tool(
            "add",
            json!({
                "type": "object",
                "properties": {"numbers": {"type": "array", "items": {"type": "number"}}},
                "required": ["numbers"]
            }),
        )
        .tool(
            "divide",
            json!({
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"]
            }),
        )
        .handler(|name, args| match name {
            "add" => {
                let sum: f64 = args["numbers"]
                    .as_array()
                    .map(|n| n.iter().filter_map(Value::as_f64).sum())
                    .unwrap_or(0.0);
                FakeReply::Text(format!("{sum}"))
            }
            "divide" => {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                if b == 0.0 {
                    FakeReply::ToolError("Division by zero".to_string())
                } else {
                    FakeReply::Text(format!("{}", a / b))
                }
            }
            other => FakeReply::RpcError(format!("Unknown tool: {other}")),
        })
}

/// `files` worker: `read_file(path: string)` that never finds anything.
pub fn files_worker() -> FakeWorker {
    FakeWorker::new("files")
        .tool(
            "read_file",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        )
        .handler(|_, args| {
            let path = args["path"].as_str().unwrap_or_default();
            FakeReply::ToolError(format!(
                "Failed to read file: ENOENT: no such file or directory, open '{path}'"
            ))
        })
}

struct FakeTransport {
    worker: FakeWorker,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    exited: AtomicBool,
}

impl FakeTransport {
    async fn respond(&self, method: &str, params: Option<Value>) -> Option<Result<Value, String>> {
        match method {
            "initialize" => {
                tokio::time::sleep(self.worker.handshake_delay).await;
                Some(Ok(json!({
                    "protocolVersion": self.worker.protocol_version,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": self.worker.server_name, "version": "1.0.0"}
                })))
            }
            "tools/list" => Some(Ok(self.worker.tools_page(params.as_ref()))),
            "tools/call" => {
                self.worker.counters.calls.fetch_add(1, Ordering::SeqCst);
                let params = params.unwrap_or(Value::Null);
                let name = params["name"].as_str().unwrap_or_default();
                match (self.worker.handler)(name, &params["arguments"]) {
                    FakeReply::Text(text) => {
                        Some(Ok(json!({"content": [{"type": "text", "text": text}]})))
                    }
                    FakeReply::ToolError(text) => Some(Ok(json!({
                        "content": [{"type": "text", "text": text}],
                        "isError": true
                    }))),
                    FakeReply::RpcError(message) => Some(Err(message)),
                    FakeReply::Raw(value) => Some(Ok(value)),
                    FakeReply::Hang => None,
                    FakeReply::Exit => {
                        self.exited.store(true, Ordering::SeqCst);
                        Some(Err("worker exited".to_string()))
                    }
                }
            }
            other => Some(Err(format!("Method not found: {other}"))),
        }
    }
}

impl Transport for FakeTransport {
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(McpError::Protocol("fake transport is closed".into()));
            }
            self.worker.counters.sends.fetch_add(1, Ordering::SeqCst);
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);

            let answer = async {
                match self.respond(method, params).await {
                    Some(reply) => reply,
                    None => std::future::pending().await,
                }
            };
            let answered = tokio::time::timeout(timeout, answer).await;
            if self.exited.load(Ordering::SeqCst) {
                return Err(McpError::Protocol("fake worker closed its output stream".into()));
            }
            match answered {
                Ok(Ok(result)) => Ok(JsonRpcResponse {
                    id,
                    result: Some(result),
                    error: None,
                }),
                Ok(Err(message)) => Ok(JsonRpcResponse {
                    id,
                    result: None,
                    error: Some(JsonRpcError {
                        code: -32603,
                        message,
                        data: None,
                    }),
                }),
                Err(_) => Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: duration_ms(timeout),
                }),
            }
        })
    }

    fn send_notification<'a>(
        &'a self,
        _method: &'a str,
        _params: Option<Value>,
    ) -> BoxFuture<'a, Result<(), McpError>> {
        Box::pin(async move {
            self.worker.counters.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn is_closed(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst) || self.exited.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.shut_down.swap(true, Ordering::SeqCst) {
                self.worker.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
            }
        })
    }
}

/// Launcher that "spawns" fake workers by name and counts spawns.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    workers: HashMap<String, FakeWorker>,
    launches: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, name: &str, worker: FakeWorker) -> Self {
        self.workers.insert(name.to_string(), worker);
        self
    }

    pub fn launches(&self, name: &str) -> usize {
        self.launches
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_launches(&self) -> usize {
        self.launches.lock().unwrap().values().sum()
    }
}

impl WorkerLauncher for FakeLauncher {
    fn launch(&self, name: &str, _config: &WorkerConfig) -> Result<Box<dyn Transport>, McpError> {
        *self
            .launches
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default() += 1;
        let worker = self
            .workers
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::SpawnFailed {
                name: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such fake worker"),
            })?;
        Ok(Box::new(FakeTransport {
            worker,
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        }))
    }
}

/// Config naming the given workers, with short timeouts.
pub fn fake_config(names: &[&str]) -> crate::config::McpConfig {
    let mut config = crate::config::McpConfig::default();
    for name in names {
        let mut worker = WorkerConfig::new("fake", vec![]);
        worker.connect_timeout_ms = 500;
        worker.timeout_ms = 500;
        config.servers.insert(name.to_string(), worker);
    }
    config
}
