//! Shared tool types and error hierarchy for Relay.

pub mod error;
pub mod tool;
pub mod util;

pub use error::{ConfigError, RelayError, ToolError};
pub use tool::*;
