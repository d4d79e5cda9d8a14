//! JSON-RPC client over a duplex byte stream.
//!
//! One request line out, reply lines in. Replies are matched to requests by
//! `id`; notifications and peer requests read while waiting are logged and
//! dropped, and replies that belong to another in-flight call are parked
//! until their caller picks them up. Replies for ids nobody is waiting on
//! are dropped. An error reply without a usable id (parse errors and the
//! like) goes to whichever caller is reading.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::transport::StdioStream;
use super::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, MCP_PROTOCOL_VERSION};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side: the id counter lives under the same lock as the pipe so ids
/// hit the wire in allocation order.
struct Outbound {
    writer: BoxedWriter,
    next_id: u64,
}

/// Read side plus replies that arrived for someone else.
struct Inbound {
    reader: BufReader<BoxedReader>,
    parked: HashMap<u64, JsonRpcMessage>,
}

// ─── RpcClient ───────────────────────────────────────────────────────────────

/// Request/response JSON-RPC client for a single tool server.
pub struct RpcClient {
    server_name: String,
    outbound: Mutex<Outbound>,
    inbound: Mutex<Inbound>,
    /// Ids sent and not yet answered.
    pending: StdMutex<HashSet<u64>>,
}

/// Forgets a pending id when its call finishes or is cancelled.
struct PendingGuard<'a> {
    client: &'a RpcClient,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.client.pending.lock() {
            pending.remove(&self.id);
        }
        if let Ok(mut inbound) = self.client.inbound.try_lock() {
            inbound.parked.remove(&self.id);
        }
    }
}

impl RpcClient {
    /// Create a client over any reader/writer pair. Ids start at 1.
    pub fn new<R, W>(server_name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            outbound: Mutex::new(Outbound {
                writer: Box::new(writer),
                next_id: 1,
            }),
            inbound: Mutex::new(Inbound {
                reader: BufReader::new(Box::new(reader)),
                parked: HashMap::new(),
            }),
            pending: StdMutex::new(HashSet::new()),
        }
    }

    /// Create a client over a spawned server's stdio.
    pub fn from_stream(server_name: &str, stream: StdioStream) -> Self {
        Self::new(server_name, stream.reader, stream.writer)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Send a request and wait for its reply.
    ///
    /// Returns the `result` payload untouched (`null` when the peer omitted
    /// it). A reply carrying `error` becomes [`McpError::ServerError`].
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let mut out = self.outbound.lock().await;
        let id = out.next_id;
        out.next_id += 1;
        self.mark_pending(id);
        let _guard = PendingGuard { client: self, id };

        let req = JsonRpcRequest::new(id, method, params);
        let line = self.encode(&req)?;
        self.write_line(&mut out.writer, &line).await?;
        drop(out);

        tracing::debug!(server = %self.server_name, id, method, "sent request");

        let reply = self.read_reply(id).await?;

        if let Some(err) = reply.error {
            return Err(McpError::ServerError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(reply.result.unwrap_or(serde_json::Value::Null))
    }

    /// Send a one-way notification. Nothing is read back.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let note = JsonRpcNotification::new(method, params);
        let line = self.encode(&note)?;
        let mut out = self.outbound.lock().await;
        self.write_line(&mut out.writer, &line).await
    }

    /// MCP `initialize` request followed by `notifications/initialized`.
    ///
    /// Only servers that insist on the handshake need this; plain
    /// `tools/list` works against the rest.
    pub async fn initialize(&self) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self
            .call("initialize", Some(params))
            .await
            .map_err(|e| McpError::InitFailed {
                name: self.server_name.clone(),
                reason: e.to_string(),
            })?;

        self.notify("notifications/initialized", None).await?;
        tracing::debug!(server = %self.server_name, "initialize handshake complete");
        Ok(result)
    }

    fn mark_pending(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id);
        }
    }

    fn is_pending(&self, id: u64) -> bool {
        self.pending.lock().is_ok_and(|p| p.contains(&id))
    }

    fn encode<T: serde::Serialize>(&self, msg: &T) -> Result<String, McpError> {
        let mut json = serde_json::to_string(msg).map_err(|e| McpError::ProtocolError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        json.push('\n');
        Ok(json)
    }

    async fn write_line(&self, writer: &mut BoxedWriter, line: &str) -> Result<(), McpError> {
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })
    }

    /// Read lines until the reply for `id` shows up.
    async fn read_reply(&self, id: u64) -> Result<JsonRpcMessage, McpError> {
        let mut inbound = self.inbound.lock().await;

        if let Some(parked) = inbound.parked.remove(&id) {
            return Ok(parked);
        }

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = inbound
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: format!("failed to read from stdout: {e}"),
                })?;

            if bytes_read == 0 {
                return Err(McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: "server stdout closed (process may have exited)".into(),
                });
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let msg: JsonRpcMessage =
                serde_json::from_str(trimmed).map_err(|e| McpError::ProtocolError {
                    server: self.server_name.clone(),
                    reason: format!("malformed JSON-RPC line: {e}"),
                })?;

            if msg.answers(id) {
                return Ok(msg);
            }

            if msg.is_notification() {
                tracing::debug!(
                    server = %self.server_name,
                    method = msg.method.as_deref().unwrap_or_default(),
                    "ignoring server notification"
                );
                continue;
            }

            if let Some(method) = &msg.method {
                tracing::warn!(
                    server = %self.server_name,
                    method = %method,
                    "ignoring server-initiated request"
                );
                continue;
            }

            match msg.id.as_ref().and_then(|v| v.as_u64()) {
                Some(other) if self.is_pending(other) => {
                    tracing::debug!(
                        server = %self.server_name,
                        waiting_for = id,
                        got = other,
                        "parking reply for another request"
                    );
                    inbound.parked.insert(other, msg);
                }
                Some(other) => {
                    tracing::warn!(
                        server = %self.server_name,
                        got = other,
                        "dropping reply for unknown request"
                    );
                }
                None if msg.error.is_some() => {
                    tracing::warn!(
                        server = %self.server_name,
                        waiting_for = id,
                        "error reply without id, handing it to the current request"
                    );
                    return Ok(msg);
                }
                None => {
                    tracing::warn!(
                        server = %self.server_name,
                        id = ?msg.id,
                        "dropping reply with unusable id"
                    );
                }
            }
        }
    }
}

// ─── Test Support ────────────────────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────
