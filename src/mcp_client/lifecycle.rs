//! Server startup.
//!
//! Turns the configured server table into a populated [`Executor`]. A server
//! that fails to start is reported and skipped; the others still come up.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::ServerConfig;

use super::client::RpcClient;
use super::errors::McpError;
use super::executor::Executor;
use super::transport::StdioTransport;

/// Timeout for the optional initialize handshake.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected server: its client plus the process that backs it.
pub struct ConnectedServer {
    pub client: RpcClient,
    pub transport: StdioTransport,
}

/// Spawn one server and, if configured, run the initialize handshake.
pub async fn connect_server(name: &str, config: &ServerConfig) -> Result<ConnectedServer, McpError> {
    let command = config.command.as_deref().ok_or_else(|| McpError::SpawnFailed {
        name: name.to_string(),
        reason: "no command configured".into(),
    })?;

    let mut transport =
        StdioTransport::new(name, command, &config.args, &config.env).with_cwd(config.cwd.clone());
    let stream = transport.connect()?;
    let client = RpcClient::from_stream(name, stream);

    if config.handshake {
        let outcome = tokio::time::timeout(INIT_TIMEOUT, client.initialize()).await;
        let failure = match outcome {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(McpError::InitFailed {
                name: name.to_string(),
                reason: format!("initialization timed out after {}s", INIT_TIMEOUT.as_secs()),
            }),
        };
        if let Some(e) = failure {
            transport.close().await;
            return Err(e);
        }
    }

    Ok(ConnectedServer { client, transport })
}

/// Connect every enabled stdio server, in name order.
///
/// Returns the executor plus the servers that failed, so the caller can
/// report them. Disabled and remote-only entries are skipped, not failed.
pub async fn connect_all(
    configs: &BTreeMap<String, ServerConfig>,
) -> (Executor, Vec<(String, McpError)>) {
    let mut executor = Executor::new();
    let mut errors = Vec::new();

    for (name, config) in configs {
        if config.disabled {
            tracing::info!(server = %name, "server disabled, skipping");
            continue;
        }
        if !config.is_stdio() {
            tracing::warn!(
                server = %name,
                transport = config.transport_type.as_deref().unwrap_or("unknown"),
                url = config.url.as_deref().unwrap_or_default(),
                headers = ?config.header_names(),
                "only stdio servers are supported, skipping"
            );
            continue;
        }

        match connect_server(name, config).await {
            Ok(connected) => {
                executor.add_server(name, connected.client);
                executor.attach_transport(connected.transport);
                tracing::info!(server = %name, "server connected");
            }
            Err(e) => {
                tracing::error!(server = %name, error = %e, "server failed to start");
                errors.push((name.clone(), e));
            }
        }
    }

    (executor, errors)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A shell loop that answers every request with a one-tool catalog.
    const FAKE_SERVER: &str = r#"while read line; do
  id=$(echo "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  if [ -n "$id" ]; then
    echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"tools\":[{\"name\":\"echo\",\"description\":\"Echo\"}]}}"
  fi
done"#;

    fn sh_server(script: &str) -> ServerConfig {
        ServerConfig {
            command: Some("sh".into()),
            args: vec!["-c".into(), script.into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_all_skips_disabled_and_remote() {
        let mut configs = BTreeMap::new();
        configs.insert("live".to_string(), sh_server(FAKE_SERVER));
        configs.insert(
            "off".to_string(),
            ServerConfig {
                disabled: true,
                ..sh_server(FAKE_SERVER)
            },
        );
        configs.insert(
            "remote".to_string(),
            ServerConfig {
                transport_type: Some("http".into()),
                url: Some("https://example.invalid/mcp".into()),
                ..Default::default()
            },
        );

        let (executor, errors) = connect_all(&configs).await;
        assert!(errors.is_empty());
        assert_eq!(executor.server_names(), vec!["live"]);

        let tools = executor.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].server, "live");
        assert_eq!(tools[0].name, "echo");

        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_spawn_does_not_block_others() {
        let mut configs = BTreeMap::new();
        configs.insert(
            "broken".to_string(),
            ServerConfig {
                command: Some("/definitely/not/a/real/binary".into()),
                ..Default::default()
            },
        );
        configs.insert("live".to_string(), sh_server(FAKE_SERVER));

        let (executor, errors) = connect_all(&configs).await;
        assert_eq!(executor.server_names(), vec!["live"]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "broken");
        assert!(matches!(errors[0].1, McpError::SpawnFailed { .. }));

        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_handshake_runs_before_listing() {
        let config = ServerConfig {
            handshake: true,
            ..sh_server(FAKE_SERVER)
        };
        let mut connected = connect_server("hs", &config).await.unwrap();
        // initialize took id 1, so the next request gets id 2 and still works.
        let result = connected.client.call("tools/list", None).await.unwrap();
        assert_eq!(result["tools"][0]["name"], "echo");
        connected.transport.close().await;
    }

    #[tokio::test]
    async fn test_handshake_failure_closes_process() {
        let config = ServerConfig {
            handshake: true,
            ..sh_server("exit 0")
        };
        let err = connect_server("dead", &config).await.err().unwrap();
        assert!(matches!(err, McpError::InitFailed { .. }));
    }
}
