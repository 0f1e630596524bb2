//! MCP (Model Context Protocol) tool-invocation core for Relay.
//!
//! Tool workers are independent processes speaking newline-delimited
//! JSON-RPC 2.0 over stdio. The [`ConnectionManager`] spawns and supervises
//! them, the [`ToolRouter`] resolves a model-issued call to the owning worker,
//! validates its arguments and normalizes the outcome into a
//! [`ToolResult`](relay_types::ToolResult), and the [`ToolHost`] scopes worker
//! lifetimes to a conversation turn.

pub mod config;
pub mod connection;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod registry;
pub mod router;
pub mod schema;
pub mod scope;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{CollisionPolicy, LifetimePolicy, McpConfig, WorkerConfig};
pub use connection::{ConnectionState, WorkerConnection};
pub use error::McpError;
pub use manager::{ConnectionManager, WorkerStatus};
pub use registry::{RegisteredTool, ToolRegistry};
pub use router::ToolRouter;
pub use scope::{ToolHost, TurnTools};
pub use transport::{StdioLauncher, StdioTransport, Transport, WorkerLauncher};
