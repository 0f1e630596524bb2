//! Configuration types for MCP workers.

use relay_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

fn default_timeout() -> u64 {
    30000
}

fn default_connect_timeout() -> u64 {
    10000
}

fn default_shutdown_grace() -> u64 {
    5000
}

/// Top-level MCP configuration.
///
/// Workers are kept in name order; that order is also the merge order used
/// when building the tool registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, WorkerConfig>,
    #[serde(default)]
    pub collisions: CollisionPolicy,
}

/// How to launch a single worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Command to run (e.g., "node", "python").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Variables overlaid on the inherited environment, for this worker only.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-call timeout in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Bound on spawn + handshake + tool discovery (default: 10000).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// How long a worker gets to exit after stdin closes before it is killed.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl WorkerConfig {
    /// A worker with default timeouts and no environment overlay.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            timeout_ms: default_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// What happens when two workers expose a tool with the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// The first worker in merge order keeps the name.
    #[default]
    FirstWins,
    /// Later workers overwrite earlier ones.
    LastWins,
    /// A contested name is withdrawn from every worker.
    Reject,
    /// Every tool is exposed as `<worker>__<tool>`.
    Namespace,
}

/// How long worker connections live relative to a conversation turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifetimePolicy {
    /// Keep workers running across turns; close on explicit shutdown.
    #[default]
    Pooled,
    /// Spawn workers for a turn and close them when it ends.
    Ephemeral,
}

impl std::str::FromStr for LifetimePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pooled" => Ok(Self::Pooled),
            "ephemeral" => Ok(Self::Ephemeral),
            other => Err(ConfigError::InvalidValue {
                key: "lifetime".into(),
                message: format!("expected 'pooled' or 'ephemeral', got '{other}'"),
            }),
        }
    }
}

impl McpConfig {
    /// Reject configurations that could never produce a working worker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, worker) in &self.servers {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "mcp.servers".into(),
                    message: "worker name must not be empty".into(),
                });
            }
            if worker.command.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("mcp.servers.{name}.command"),
                    message: "command must not be empty".into(),
                });
            }
            for (key, value) in [
                ("timeout_ms", worker.timeout_ms),
                ("connect_timeout_ms", worker.connect_timeout_ms),
            ] {
                if value == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: format!("mcp.servers.{name}.{key}"),
                        message: "must be greater than zero".into(),
                    });
                }
            }
        }
        Ok(())
    }
}
