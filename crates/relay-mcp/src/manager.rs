//! Connection manager: supervises the configured set of workers.
//!
//! Every configured worker has a slot guarded by its own async mutex, so
//! connecting one worker never waits on another. The slot mutex is held for
//! the whole connect sequence, which makes connecting single-flight: callers
//! that arrive while a connect is in progress wait for it and share its
//! outcome.

use crate::config::{CollisionPolicy, McpConfig, WorkerConfig};
use crate::connection::{ConnectionState, WorkerConnection};
use crate::error::McpError;
use crate::registry::ToolRegistry;
use crate::transport::{StdioLauncher, WorkerLauncher};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct SlotState {
    conn: Option<Arc<WorkerConnection>>,
    last_error: Option<String>,
}

struct Slot {
    config: WorkerConfig,
    state: Mutex<SlotState>,
    /// Connect attempts finished; lets waiters tell whether an attempt
    /// completed while they were queued.
    attempts: AtomicU64,
}

/// Point-in-time view of one worker, for operators.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub name: String,
    pub state: ConnectionState,
    pub tool_count: usize,
    pub server: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Supervises a fixed, named set of workers.
pub struct ConnectionManager {
    slots: BTreeMap<String, Slot>,
    launcher: Arc<dyn WorkerLauncher>,
    collisions: CollisionPolicy,
    /// Bumped whenever a connection is opened or closed.
    generation: AtomicU64,
    registry: RwLock<Option<(u64, Arc<ToolRegistry>)>>,
}

impl ConnectionManager {
    /// Create a manager for `config`. Nothing is spawned until first use.
    pub fn new(config: &McpConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let slots = config
            .servers
            .iter()
            .map(|(name, worker)| {
                let slot = Slot {
                    config: worker.clone(),
                    state: Mutex::new(SlotState::default()),
                    attempts: AtomicU64::new(0),
                };
                (name.clone(), slot)
            })
            .collect();
        Self {
            slots,
            launcher,
            collisions: config.collisions,
            generation: AtomicU64::new(0),
            registry: RwLock::new(None),
        }
    }

    /// Manager that launches workers as stdio child processes.
    pub fn with_stdio(config: &McpConfig) -> Self {
        Self::new(config, Arc::new(StdioLauncher))
    }

    /// Configured worker names, in merge order.
    pub fn worker_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Return the live connection for `name`, connecting if there is none.
    pub async fn get_connection(&self, name: &str) -> Result<Arc<WorkerConnection>, McpError> {
        let slot = self.slot(name)?;
        let seen = slot.attempts.load(Ordering::SeqCst);
        let mut state = slot.state.lock().await;

        if let Some(conn) = state.conn.take() {
            if conn.is_ready() {
                state.conn = Some(Arc::clone(&conn));
                return Ok(conn);
            }
            // The worker went away underneath us; reap it and start over
            tracing::warn!("MCP worker '{}' is {}; reconnecting", name, conn.state());
            conn.close().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        // An attempt finished while we were queued behind it; share its failure
        if slot.attempts.load(Ordering::SeqCst) != seen {
            if let Some(reason) = &state.last_error {
                return Err(McpError::Connect {
                    name: name.to_string(),
                    reason: reason.clone(),
                });
            }
        }

        tracing::debug!("Connecting MCP worker '{}'", name);
        let result = WorkerConnection::connect(name, &slot.config, self.launcher.as_ref()).await;
        slot.attempts.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(conn) => {
                let conn = Arc::new(conn);
                state.conn = Some(Arc::clone(&conn));
                state.last_error = None;
                self.generation.fetch_add(1, Ordering::SeqCst);
                Ok(conn)
            }
            Err(e) => {
                let reason = match &e {
                    McpError::Connect { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                state.last_error = Some(reason);
                Err(e)
            }
        }
    }

    /// Connect every worker and merge their tools.
    ///
    /// Workers that fail to connect are logged and left out. The merged
    /// registry is cached until a connection is opened or closed; a worker
    /// that failed is therefore not retried until a close or restart.
    pub async fn all_tools(&self) -> Arc<ToolRegistry> {
        let current = self.generation.load(Ordering::SeqCst);
        if let Some((generation, registry)) = &*self.registry.read().await {
            if *generation == current {
                return Arc::clone(registry);
            }
        }

        let names: Vec<&str> = self.worker_names().collect();
        let results = join_all(names.iter().map(|name| self.get_connection(name))).await;

        let mut live = Vec::new();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(conn) => live.push(conn),
                Err(e) => tracing::warn!("Skipping MCP worker '{}': {}", name, e),
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let lists = live
            .iter()
            .filter_map(|conn| conn.list_tools().ok().map(|tools| (conn.name(), tools)));
        let registry = Arc::new(ToolRegistry::build(lists, self.collisions));

        *self.registry.write().await = Some((generation, Arc::clone(&registry)));
        registry
    }

    /// Close and evict one worker; the next use respawns it.
    pub async fn close(&self, name: &str) -> Result<(), McpError> {
        let slot = self.slot(name)?;
        // Waits for an in-flight connect so its result is closed, not leaked
        let conn = {
            let mut state = slot.state.lock().await;
            state.last_error = None;
            state.conn.take()
        };
        if let Some(conn) = conn {
            conn.close().await;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Close every live worker and clear the cache.
    pub async fn close_all(&self) {
        join_all(self.slots.keys().map(|name| self.close(name))).await;
        *self.registry.write().await = None;
    }

    /// Close a worker and connect it again right away.
    pub async fn restart(&self, name: &str) -> Result<Arc<WorkerConnection>, McpError> {
        self.close(name).await?;
        self.get_connection(name).await
    }

    /// Names of workers with a Ready connection right now.
    pub fn live_workers(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| {
                slot.state
                    .try_lock()
                    .is_ok_and(|s| s.conn.as_ref().is_some_and(|c| c.is_ready()))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Current state of every configured worker.
    pub fn status(&self) -> Vec<WorkerStatus> {
        self.slots
            .iter()
            .map(|(name, slot)| match slot.state.try_lock() {
                // The slot lock is only held across awaits while connecting
                Err(_) => WorkerStatus {
                    name: name.clone(),
                    state: ConnectionState::Connecting,
                    tool_count: 0,
                    server: None,
                    connected_at: None,
                    last_error: None,
                },
                Ok(state) => match &state.conn {
                    Some(conn) => WorkerStatus {
                        name: name.clone(),
                        state: conn.state(),
                        tool_count: conn.list_tools().map(|t| t.len()).unwrap_or(0),
                        server: Some(conn.server_info().name.clone()),
                        connected_at: Some(conn.connected_at()),
                        last_error: None,
                    },
                    None => WorkerStatus {
                        name: name.clone(),
                        state: ConnectionState::Disconnected,
                        tool_count: 0,
                        server: None,
                        connected_at: None,
                        last_error: state.last_error.clone(),
                    },
                },
            })
            .collect()
    }

    fn slot(&self, name: &str) -> Result<&Slot, McpError> {
        self.slots.get(name).ok_or_else(|| McpError::UnknownWorker {
            name: name.to_string(),
        })
    }
}
