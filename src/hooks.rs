//! Lifecycle hooks: shell commands fired at fixed points of a session.
//!
//! Hooks are fire-and-forget. Their exit status is logged and never affects
//! control flow.

use std::process::Stdio;

use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::config::HooksConfig;

/// Points in the session where a hook may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// After startup, before the first prompt.
    AgentSpawn,
    /// After input is accepted, before the run starts.
    UserPromptSubmit,
    /// When a run finishes, however it ended.
    Stop,
}

impl Hook {
    /// Key used for this hook in the config file.
    pub fn config_key(self) -> &'static str {
        match self {
            Hook::AgentSpawn => "agentSpawn",
            Hook::UserPromptSubmit => "userPromptSubmit",
            Hook::Stop => "stop",
        }
    }
}

/// Runs configured hook commands with `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct HookRunner {
    hooks: HooksConfig,
}

impl HookRunner {
    pub fn new(hooks: HooksConfig) -> Self {
        Self { hooks }
    }

    pub fn command(&self, hook: Hook) -> Option<&str> {
        let cmd = match hook {
            Hook::AgentSpawn => &self.hooks.agent_spawn,
            Hook::UserPromptSubmit => &self.hooks.user_prompt_submit,
            Hook::Stop => &self.hooks.stop,
        };
        cmd.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Start the hook in the background, if one is configured.
    ///
    /// The handle is only useful to tests; callers normally drop it.
    pub fn fire(&self, hook: Hook) -> Option<JoinHandle<()>> {
        let command = self.command(hook)?.to_string();
        Some(tokio::spawn(run_hook(hook, command)))
    }
}

async fn run_hook(hook: Hook, command: String) {
    tracing::debug!(hook = hook.config_key(), command = %command, "running hook");

    let status = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(s) if s.success() => {
            tracing::debug!(hook = hook.config_key(), "hook finished");
        }
        Ok(s) => {
            tracing::warn!(hook = hook.config_key(), status = %s, "hook exited with failure");
        }
        Err(e) => {
            tracing::warn!(hook = hook.config_key(), error = %e, "hook could not be started");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
