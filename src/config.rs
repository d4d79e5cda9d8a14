//! Session configuration.
//!
//! Loaded from the file named on the command line. JSON is the primary
//! format; `.yaml` / `.yml` files are read with `serde_yaml`. After parsing,
//! `${VAR}` and `${VAR:-default}` references inside string values are
//! replaced from the environment, so substituted text never has to be valid
//! JSON or YAML. Hook commands are left as written; the shell expands them
//! when the hook runs.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Model used when neither the CLI nor the config names one.
pub const DEFAULT_MODEL: &str = "qwen3:8b";

/// Ollama endpoint used when neither the CLI nor the config names one.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Types ───────────────────────────────────────────────────────────────────

/// Top-level config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Tool servers by name. Iterated in name order.
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub ollama_url: Option<String>,
    /// Upper bound on tool rounds per run; unbounded when absent.
    #[serde(default)]
    pub max_tool_rounds: Option<usize>,
    /// HTTP timeout for backend requests; none when absent.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// One configured tool server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Transport hint (`stdio`, `http`, ...). Only stdio servers are spawned.
    #[serde(default, rename = "type")]
    pub transport_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    /// Send the MCP `initialize` handshake before listing tools.
    #[serde(default)]
    pub handshake: bool,
}

/// Shell commands run at lifecycle points.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HooksConfig {
    #[serde(default)]
    pub agent_spawn: Option<String>,
    #[serde(default)]
    pub user_prompt_submit: Option<String>,
    #[serde(default)]
    pub stop: Option<String>,
}

impl AppConfig {
    /// Model name: CLI value, then config, then [`DEFAULT_MODEL`].
    pub fn resolve_model(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// Backend URL: CLI value, then config, then [`DEFAULT_OLLAMA_URL`].
    pub fn resolve_ollama_url(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.ollama_url.clone())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tool_rounds == Some(0) {
            return Err(ConfigError::Invalid {
                reason: "maxToolRounds must be at least 1".into(),
            });
        }
        for (name, server) in &self.mcp_servers {
            if server.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
                return Err(ConfigError::Invalid {
                    reason: format!("server '{name}' has an empty command"),
                });
            }
        }
        Ok(())
    }
}

impl ServerConfig {
    /// Whether this entry describes a local process we can spawn.
    pub fn is_stdio(&self) -> bool {
        self.command.is_some()
            && self
                .transport_type
                .as_deref()
                .map_or(true, |t| t.eq_ignore_ascii_case("stdio"))
    }

    /// Names of the configured HTTP headers, sorted. Values stay out of logs.
    pub fn header_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.headers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Read, interpolate, parse, and validate a config file.
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let config = parse(&raw, is_yaml(path)).map_err(|reason| ConfigError::Parse {
        path: path.display().to_string(),
        reason,
    })?;

    config.validate()?;

    tracing::debug!(
        path = %path.display(),
        servers = config.mcp_servers.len(),
        "loaded config"
    );
    Ok(config)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

fn parse(text: &str, yaml: bool) -> Result<AppConfig, String> {
    let mut value: serde_json::Value = if yaml {
        serde_yaml::from_str(text).map_err(|e| e.to_string())?
    } else {
        serde_json::from_str(text).map_err(|e| e.to_string())?
    };

    if let serde_json::Value::Object(map) = &mut value {
        for (key, section) in map.iter_mut() {
            if key != "hooks" {
                interpolate_strings(section);
            }
        }
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Apply [`interpolate_env_vars`] to every string value below `value`.
fn interpolate_strings(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => *s = interpolate_env_vars(s),
        serde_json::Value::Array(items) => items.iter_mut().for_each(interpolate_strings),
        serde_json::Value::Object(map) => map.values_mut().for_each(interpolate_strings),
        _ => {}
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
pub fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_json_config() {
        let file = write_config(
            ".json",
            r#"{
                "mcpServers": {
                    "fs": {"command": "mcp-fs", "args": ["--root", "/tmp"], "env": {"A": "1"}},
                    "remote": {"type": "http", "url": "https://example.invalid/mcp"},
                    "off": {"command": "x", "disabled": true}
                },
                "hooks": {"agentSpawn": "echo hi", "stop": "echo bye"}
            }"#,
        );
        let config = load(file.path()).unwrap();

        let names: Vec<&String> = config.mcp_servers.keys().collect();
        assert_eq!(names, vec!["fs", "off", "remote"]);

        let fs = &config.mcp_servers["fs"];
        assert_eq!(fs.command.as_deref(), Some("mcp-fs"));
        assert_eq!(fs.args, vec!["--root", "/tmp"]);
        assert_eq!(fs.env["A"], "1");
        assert!(fs.is_stdio());
        assert!(!fs.handshake);

        assert!(!config.mcp_servers["remote"].is_stdio());
        assert!(config.mcp_servers["off"].disabled);

        assert_eq!(config.hooks.agent_spawn.as_deref(), Some("echo hi"));
        assert_eq!(config.hooks.stop.as_deref(), Some("echo bye"));
        assert!(config.hooks.user_prompt_submit.is_none());
    }

    #[test]
    fn test_load_yaml_config() {
        let file = write_config(
            ".yaml",
            "mcpServers:\n  fs:\n    command: mcp-fs\n    handshake: true\nmodel: llama3.2\nmaxToolRounds: 5\n",
        );
        let config = load(file.path()).unwrap();
        assert!(config.mcp_servers["fs"].handshake);
        assert_eq!(config.model.as_deref(), Some("llama3.2"));
        assert_eq!(config.max_tool_rounds, Some(5));
    }

    #[test]
    fn test_env_interpolation_in_config() {
        std::env::set_var("__OLLIE_CFG_TEST_CMD__", "from-env");
        let file = write_config(
            ".json",
            r#"{"mcpServers": {"s": {"command": "${__OLLIE_CFG_TEST_CMD__}", "args": ["${__OLLIE_MISSING__:-fallback}"]}}}"#,
        );
        let config = load(file.path()).unwrap();
        assert_eq!(config.mcp_servers["s"].command.as_deref(), Some("from-env"));
        assert_eq!(config.mcp_servers["s"].args, vec!["fallback"]);
    }

    #[test]
    fn test_env_value_with_quotes_stays_intact() {
        std::env::set_var("__OLLIE_CFG_QUOTED__", r#"say "hi" \ bye"#);
        let file = write_config(
            ".json",
            r#"{"mcpServers": {"s": {"command": "echo", "env": {"GREETING": "${__OLLIE_CFG_QUOTED__}"}}}}"#,
        );
        let config = load(file.path()).unwrap();
        assert_eq!(config.mcp_servers["s"].env["GREETING"], r#"say "hi" \ bye"#);
    }

    #[test]
    fn test_hook_commands_are_not_interpolated() {
        std::env::set_var("__OLLIE_CFG_HOOK__", "expanded");
        let file = write_config(
            ".yaml",
            "mcpServers:\n  s:\n    command: echo\nhooks:\n  stop: 'echo ${__OLLIE_CFG_HOOK__}'\n",
        );
        let config = load(file.path()).unwrap();
        assert_eq!(config.hooks.stop.as_deref(), Some("echo ${__OLLIE_CFG_HOOK__}"));
    }

    #[test]
    fn test_header_names_sorted() {
        let server = ServerConfig {
            headers: HashMap::from([
                ("X-Token".to_string(), "secret".to_string()),
                ("Accept".to_string(), "json".to_string()),
            ]),
            ..Default::default()
        };
        assert_eq!(server.header_names(), vec!["Accept", "X-Token"]);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let file = write_config(".json", "{ not json");
        let err = load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_tool_rounds_rejected() {
        let file = write_config(".json", r#"{"mcpServers": {}, "maxToolRounds": 0}"#);
        let err = load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_empty_command_rejected() {
        let file = write_config(".json", r#"{"mcpServers": {"s": {"command": "  "}}}"#);
        assert!(matches!(
            load(file.path()).unwrap_err(),
            ConfigError::Invalid { .. }
        ));
    }

    #[test]
    fn test_precedence_cli_then_config_then_default() {
        let mut config = AppConfig::default();
        assert_eq!(config.resolve_model(None), DEFAULT_MODEL);
        assert_eq!(config.resolve_ollama_url(None), DEFAULT_OLLAMA_URL);

        config.model = Some("from-config".into());
        config.ollama_url = Some("http://cfg:1".into());
        assert_eq!(config.resolve_model(None), "from-config");
        assert_eq!(config.resolve_model(Some("from-cli")), "from-cli");
        assert_eq!(config.resolve_ollama_url(Some("http://cli:2")), "http://cli:2");
        assert_eq!(config.resolve_ollama_url(None), "http://cfg:1");
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__OLLIE_NONEXISTENT_VAR__");
        let result = interpolate_env_vars("${__OLLIE_NONEXISTENT_VAR__:-/fallback/path}");
        assert_eq!(result, "/fallback/path");
    }

    #[test]
    fn test_interpolate_no_vars() {
        assert_eq!(interpolate_env_vars("plain $text {x}"), "plain $text {x}");
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/logs");
        assert!(!expanded.starts_with('~') || dirs::home_dir().is_none());
        assert_eq!(expand_tilde("/abs"), "/abs");
    }
}
