pub mod agent_core;
pub mod app;
pub mod cli;
pub mod config;
pub mod hooks;
pub mod inference;
pub mod mcp_client;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;

use agent_core::TurnSettings;
use app::{App, SessionContext};
use cli::Cli;
use hooks::{Hook, HookRunner};
use inference::OllamaClient;

/// Default log filter when neither `RUST_LOG` nor `--log-level` is given.
const DEFAULT_LOG_FILTER: &str = "ollie=info,warn";

/// Number of rotated log files kept next to the current one.
const LOG_FILES_KEPT: u32 = 3;

/// Return the platform-standard data directory for ollie.
///
/// - macOS: `~/Library/Application Support/ollie/`
/// - Windows: `{FOLDERID_RoamingAppData}\ollie\`
/// - Linux: `$XDG_DATA_HOME/ollie/` (fallback `~/.local/share/ollie/`)
///
/// Falls back to `~/.ollie/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("ollie");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ollie")
}

/// Initialize the tracing subscriber, writing to `ollie.log` in the data directory.
///
/// On each startup the existing logs are rotated (ollie.log → ollie.log.1 →
/// .2 → .3) and a fresh file is opened with a line-flushing writer.
/// Returns the path of the new log file.
pub fn init_tracing(log_level: Option<&str>, json: bool) -> Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;

    let log_path = log_dir.join("ollie.log");
    rotate_log_file(&log_path, LOG_FILES_KEPT);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let filter = match (EnvFilter::try_from_default_env(), log_level) {
        (Ok(filter), _) => filter,
        (Err(_), Some(level)) => {
            EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'"))?
        }
        (Err(_), None) => EnvFilter::new(DEFAULT_LOG_FILTER),
    };

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== ollie starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `ollie.log` → `ollie.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Without explicit flushing, log entries may sit in buffers and be lost
/// if the process is killed.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Run a session for the parsed command line.
///
/// Startup order: config, backend client, tool servers, tool catalog. Any
/// server that fails is reported and skipped, but at least one must come up
/// and the catalog must aggregate cleanly. Logging is expected to be set up
/// already (see [`init_tracing`]).
pub async fn run(cli: Cli) -> Result<()> {
    let config = config::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;

    let model = config.resolve_model(cli.model.as_deref());
    let ollama_url = config.resolve_ollama_url(cli.ollama_url.as_deref());
    let backend = OllamaClient::new(
        &ollama_url,
        config.request_timeout_secs.map(Duration::from_secs),
    )?;
    tracing::info!(model = %model, url = %ollama_url, "backend configured");

    let (executor, failures) = mcp_client::connect_all(&config.mcp_servers).await;
    for (name, err) in &failures {
        eprintln!("{} server {name}: {err}", "warning:".yellow().bold());
    }
    if executor.is_empty() {
        anyhow::bail!("No MCP servers connected");
    }
    let executor = Arc::new(executor);

    let catalog = match executor.list_tools().await {
        Ok(catalog) => catalog,
        Err(e) => {
            executor.shutdown().await;
            return Err(e).context("failed to list tools");
        }
    };

    if cli.list_tools {
        print!("{}", app::format_catalog(&catalog));
        executor.shutdown().await;
        return Ok(());
    }

    let hooks = HookRunner::new(config.hooks.clone());
    hooks.fire(Hook::AgentSpawn);

    let ctx = Arc::new(SessionContext {
        backend: Arc::new(backend),
        executor: executor.clone(),
        catalog: Arc::new(catalog),
        settings: TurnSettings {
            model,
            max_tool_rounds: config.max_tool_rounds,
        },
        hooks,
    });

    let (tx, mut rx) = app::channel();
    let mut app = App::new(ctx, tx.clone(), std::io::stdout());
    app.greet()?;
    app::spawn_reader(tx, Some(data_dir().join("history.txt")));

    let result = app::run_loop(&mut app, &mut rx).await;

    executor.shutdown().await;
    tracing::info!("session ended");
    result
}

// ─── Tests ───────────────────────────────────────────────────────────────────
