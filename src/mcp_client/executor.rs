//! Tool executor: the set of connected servers, seen as one tool catalog.
//!
//! Servers keep their registration order so the aggregated catalog (and
//! therefore first-match tool lookup) is deterministic.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::client::RpcClient;
use super::errors::McpError;
use super::transport::StdioTransport;
use super::types::{ListToolsResult, ToolInfo};

// ─── ToolExecutor ────────────────────────────────────────────────────────────

/// Dispatches a tool invocation to a named server.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `tool` on `server` and return the raw `tools/call` result.
    async fn execute(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError>;
}

// ─── Executor ────────────────────────────────────────────────────────────────

/// Owns every connected RPC client and the processes behind them.
#[derive(Default)]
pub struct Executor {
    servers: Vec<(String, RpcClient)>,
    transports: Mutex<Vec<StdioTransport>>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. A name seen before is replaced in place.
    pub fn add_server(&mut self, name: &str, client: RpcClient) {
        if let Some(slot) = self.servers.iter_mut().find(|(n, _)| n == name) {
            tracing::warn!(server = name, "replacing already registered server");
            slot.1 = client;
            return;
        }
        self.servers.push((name.to_string(), client));
    }

    /// Hand over a live transport so [`shutdown`](Self::shutdown) closes it.
    pub fn attach_transport(&mut self, transport: StdioTransport) {
        self.transports.get_mut().push(transport);
    }

    /// Registered server names, in registration order.
    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    fn client(&self, name: &str) -> Option<&RpcClient> {
        self.servers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Aggregate every server's `tools/list`.
    ///
    /// All or nothing: the first server that fails aborts the whole listing.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let mut all = Vec::new();

        for (name, client) in &self.servers {
            let fail = |reason: String| McpError::ListToolsFailed {
                server: name.clone(),
                reason,
            };

            let result = client
                .call("tools/list", None)
                .await
                .map_err(|e| fail(e.to_string()))?;

            let listed: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| fail(format!("invalid tools/list result: {e}")))?;

            tracing::debug!(server = %name, count = listed.tools.len(), "listed tools");

            all.extend(listed.tools.into_iter().map(|def| ToolInfo {
                server: name.clone(),
                name: def.name,
                description: def.description,
                input_schema: def.input_schema,
            }));
        }

        tracing::info!(
            servers = self.servers.len(),
            tools = all.len(),
            "tool catalog aggregated"
        );
        Ok(all)
    }

    /// Close every attached transport. Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut transports = self.transports.lock().await;
        for transport in transports.iter_mut() {
            transport.close().await;
        }
        transports.clear();
    }
}

#[async_trait]
impl ToolExecutor for Executor {
    async fn execute(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let client = self.client(server).ok_or_else(|| McpError::ServerNotFound {
            name: server.to_string(),
        })?;

        tracing::info!(server, tool, "calling tool");
        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        client.call("tools/call", Some(params)).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
