//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start or its pipes could not be captured.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The optional `initialize` handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// I/O failure on the duplex stream (write error, read error, EOF).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// The peer sent a line that is not a valid JSON-RPC envelope.
    #[error("protocol error for server '{server}': {reason}")]
    ProtocolError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("RPC error {code}: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No client is registered under the requested server name.
    #[error("server not found: {name}")]
    ServerNotFound { name: String },

    /// Tool catalog aggregation failed on one server.
    #[error("server {server}: {reason}")]
    ListToolsFailed { server: String, reason: String },
}

impl McpError {
    /// Whether the failure came from the stream itself rather than the peer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            McpError::TransportError { .. } | McpError::SpawnFailed { .. }
        )
    }
}
