//! Transports between the core and a worker process.
//!
//! [`StdioTransport`] spawns the worker and speaks newline-delimited JSON-RPC
//! over its stdin/stdout. Requests are written in FIFO order by a single writer
//! task; a reader task correlates responses to requests by id, so responses may
//! arrive in any order.

use crate::config::WorkerConfig;
use crate::error::McpError;
use crate::jsonrpc::{
    Incoming, JsonRpcErrorReply, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A bidirectional request/response channel to one worker.
pub trait Transport: Send + Sync {
    /// Send a request and wait up to `timeout` for its correlated response.
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>>;

    /// Send a notification (fire-and-forget).
    fn send_notification<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>>;

    /// True once the worker can no longer answer: its output stream ended
    /// or the transport was shut down.
    fn is_closed(&self) -> bool;

    /// Release the channel and stop the worker. Idempotent.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

/// Creates transports for configured workers.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, name: &str, config: &WorkerConfig) -> Result<Box<dyn Transport>, McpError>;
}

/// Launches workers as child processes speaking over stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioLauncher;

impl WorkerLauncher for StdioLauncher {
    fn launch(&self, name: &str, config: &WorkerConfig) -> Result<Box<dyn Transport>, McpError> {
        Ok(Box::new(StdioTransport::spawn(name, config)?))
    }
}

/// Async stdio transport for communicating with a worker process.
pub struct StdioTransport {
    name: String,
    next_id: AtomicU64,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    pending: Pending,
    output_closed: Arc<AtomicBool>,
    shut_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    child: Arc<Mutex<Child>>,
    shutdown_grace: Duration,
}

impl StdioTransport {
    /// Spawn the worker and start background reader, writer and stderr tasks.
    ///
    /// The child inherits this process's environment with `config.env`
    /// overlaid on top; the overlay applies to this child only.
    pub fn spawn(name: &str, config: &WorkerConfig) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            source: e,
        })?;

        let missing = |pipe: &str| McpError::Protocol(format!("worker {pipe} was not captured"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let output_closed = Arc::new(AtomicBool::new(false));

        // Writer: drains the queue into stdin; dropping every sender closes stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let reader = tokio::spawn(read_loop(
            name.to_string(),
            BufReader::new(stdout),
            Arc::clone(&pending),
            write_tx.downgrade(),
            Arc::clone(&output_closed),
        ));

        let stderr_name = name.to_string();
        let stderr_task = tokio::spawn(async move {
            let mut stderr = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match stderr.read_until(b'\n', &mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        tracing::debug!(worker = %stderr_name, "{}", line.trim_end());
                    }
                }
            }
        });

        Ok(Self {
            name: name.to_string(),
            next_id: AtomicU64::new(1),
            write_tx: Mutex::new(Some(write_tx)),
            pending,
            output_closed,
            shut_down: AtomicBool::new(false),
            tasks: Mutex::new(vec![writer, reader, stderr_task]),
            child: Arc::new(Mutex::new(child)),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    async fn enqueue(&self, line: String) -> Result<(), McpError> {
        let tx = self
            .write_tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::Protocol(format!("transport to '{}' is shut down", self.name)))?;
        tx.send(line)
            .await
            .map_err(|_| McpError::Protocol("Writer channel closed".to_string()))
    }

    fn closed_output_error(&self) -> McpError {
        McpError::Protocol(format!("worker '{}' closed its output stream", self.name))
    }
}

/// Reads worker stdout, dispatching responses to their waiting requests.
async fn read_loop(
    name: String,
    mut stdout: BufReader<tokio::process::ChildStdout>,
    pending: Pending,
    replies: mpsc::WeakSender<String>,
    output_closed: Arc<AtomicBool>,
) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match stdout.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(worker = %name, "Worker output unreadable: {e}");
                break;
            }
        }

        // Console chatter may be any bytes; only UTF-8 JSON-RPC lines matter
        let Ok(line) = std::str::from_utf8(&buf) else {
            tracing::warn!(
                worker = %name,
                "Skipping non-UTF-8 output: {}",
                String::from_utf8_lossy(&buf).trim_end()
            );
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Incoming::parse(line) {
            Some(Incoming::Response(resp)) => {
                if let Some(tx) = pending.lock().await.remove(&resp.id) {
                    let _ = tx.send(resp);
                } else {
                    tracing::debug!(worker = %name, id = resp.id, "Dropping uncorrelated response");
                }
            }
            Some(Incoming::Request { id, method }) => {
                tracing::debug!(worker = %name, %method, "Refusing worker-initiated request");
                let reply = JsonRpcErrorReply::method_not_found(id, &method);
                // Never wait on the writer here; responses must keep flowing
                if let (Some(tx), Ok(line)) = (replies.upgrade(), serde_json::to_string(&reply)) {
                    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(line) {
                        tracing::warn!(worker = %name, %method, "Write queue full; reply dropped");
                    }
                }
            }
            Some(Incoming::Notification { method }) => {
                tracing::debug!(worker = %name, %method, "Ignoring worker notification");
            }
            None => {
                tracing::warn!(worker = %name, "Skipping non-protocol output: {line}");
            }
        }
    }

    // Nothing more will arrive; fail everything still waiting
    output_closed.store(true, Ordering::SeqCst);
    pending.lock().await.clear();
}

impl Transport for StdioTransport {
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>> {
        Box::pin(async move {
            if self.output_closed.load(Ordering::SeqCst) {
                return Err(self.closed_output_error());
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let serialized = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

            let (tx, rx) = oneshot::channel();
            {
                let mut pending = self.pending.lock().await;
                // The reader clears pending under this lock after setting the flag
                if self.output_closed.load(Ordering::SeqCst) {
                    return Err(self.closed_output_error());
                }
                pending.insert(id, tx);
            }

            if let Err(e) = self.enqueue(serialized).await {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }

            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(resp)) => Ok(resp),
                Ok(Err(_)) => Err(self.closed_output_error()),
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    Err(McpError::Timeout {
                        method: method.to_string(),
                        timeout_ms: duration_ms(timeout),
                    })
                }
            }
        })
    }

    fn send_notification<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>> {
        Box::pin(async move {
            let serialized = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
            self.enqueue(serialized).await
        })
    }

    fn is_closed(&self) -> bool {
        self.output_closed.load(Ordering::SeqCst) || self.shut_down.load(Ordering::SeqCst)
    }

    /// Close stdin, give the worker the grace period to exit, then kill it.
    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.shut_down.swap(true, Ordering::SeqCst) {
                return;
            }

            // Dropping the last sender lets the writer finish and close stdin
            self.write_tx.lock().await.take();

            let child = Arc::clone(&self.child);
            let graceful = tokio::time::timeout(self.shutdown_grace, async {
                let mut child = child.lock().await;
                let _ = child.wait().await;
            })
            .await;

            if graceful.is_err() {
                tracing::debug!(worker = %self.name, "Worker ignored EOF, killing");
                let mut child = self.child.lock().await;
                let _ = child.kill().await;
            }

            for task in self.tasks.lock().await.drain(..) {
                task.abort();
            }
            self.pending.lock().await.clear();
        })
    }
}
