//! MCP client: JSON-RPC over stdio to local tool servers.
//!
//! This module handles:
//! - Spawning MCP server child processes and closing them on shutdown
//! - Newline-delimited JSON-RPC 2.0 framing with id-matched replies
//! - Tool catalog aggregation across all connected servers
//! - Dispatching tool calls to the owning server

pub mod client;
pub mod errors;
pub mod executor;
pub mod lifecycle;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::RpcClient;
pub use errors::McpError;
pub use executor::{Executor, ToolExecutor};
pub use lifecycle::connect_all;
pub use types::ToolInfo;
