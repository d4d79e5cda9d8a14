//! Child-process stdio transport.
//!
//! Spawns an MCP server and hands its pipes out as a duplex byte stream:
//! - the child's stdin is the write side
//! - the child's stdout is the read side
//! - stderr is drained into the log so a chatty server never blocks on it

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::errors::McpError;

// ─── Stream ──────────────────────────────────────────────────────────────────

/// The two halves of a connected server's stdio.
pub struct StdioStream {
    pub reader: ChildStdout,
    pub writer: ChildStdin,
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Owns one MCP server subprocess.
pub struct StdioTransport {
    server_name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    child: Option<Child>,
}

impl StdioTransport {
    /// Describe a server process. Nothing is spawned until [`connect`](Self::connect).
    pub fn new(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            command: command.to_string(),
            args: args.to_vec(),
            env: env.clone(),
            cwd: None,
            child: None,
        }
    }

    /// Run the server from `cwd` instead of the current directory.
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Spawn the process and return its stdio as a duplex stream.
    ///
    /// Environment overrides are layered on top of the inherited environment.
    /// Must be called from within a tokio runtime (stderr is drained by a task).
    pub fn connect(&mut self) -> Result<StdioStream, McpError> {
        if self.child.is_some() {
            return Err(McpError::SpawnFailed {
                name: self.server_name.clone(),
                reason: "transport is already connected".into(),
            });
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        // Wire stdio for JSON-RPC
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: self.server_name.clone(),
            reason: format!("{}: {e}", self.command),
        })?;

        let writer = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: self.server_name.clone(),
            reason: "failed to capture stdin".into(),
        })?;

        let reader = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: self.server_name.clone(),
            reason: "failed to capture stdout".into(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let server = self.server_name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, stderr = %line, "server stderr");
                }
            });
        }

        tracing::info!(
            server = %self.server_name,
            command = %self.command,
            args = ?self.args,
            pid = child.id(),
            "spawned MCP server"
        );

        self.child = Some(child);
        Ok(StdioStream { reader, writer })
    }

    /// Whether the subprocess is still alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill and reap the subprocess.
    ///
    /// Safe to call on a transport that was never connected or is already closed.
    pub async fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Err(e) = child.kill().await {
            tracing::debug!(
                server = %self.server_name,
                error = %e,
                "kill failed (process may have already exited)"
            );
        }
        tracing::info!(server = %self.server_name, "closed MCP server");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
