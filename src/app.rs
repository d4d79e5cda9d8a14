//! Interactive session.
//!
//! Everything that happens arrives as an [`AppEvent`] on one channel and is
//! handled one at a time:
//! - a reader thread (rustyline) sends each line the user enters
//! - a background task per run sends the finished [`TurnOutcome`]
//!
//! Only one run is in flight at a time. Input that arrives meanwhile is
//! turned away, not queued.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;

use crate::agent_core::{run_turn, Note, TurnOutcome, TurnSettings};
use crate::hooks::{Hook, HookRunner};
use crate::inference::{ChatBackend, ChatMessage};
use crate::mcp_client::{ToolExecutor, ToolInfo};

/// Capacity of the event channel.
const EVENT_BUFFER: usize = 1000;

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AppEvent {
    /// A line from the user, untrimmed.
    Input(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    /// Ctrl-D at the prompt.
    Eof,
    /// The line editor failed.
    ReadFailed(String),
    TurnFinished(TurnOutcome),
}

/// Whether the loop keeps going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// Create the event channel.
pub fn channel() -> (mpsc::Sender<AppEvent>, mpsc::Receiver<AppEvent>) {
    mpsc::channel(EVENT_BUFFER)
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// Everything a run needs that stays fixed for the whole session.
pub struct SessionContext {
    pub backend: Arc<dyn ChatBackend>,
    pub executor: Arc<dyn ToolExecutor>,
    pub catalog: Arc<Vec<ToolInfo>>,
    pub settings: TurnSettings,
    pub hooks: HookRunner,
}

/// Session state plus the sink everything is printed to.
pub struct App<W: Write> {
    ctx: Arc<SessionContext>,
    transcript: Vec<ChatMessage>,
    busy: bool,
    tx: mpsc::Sender<AppEvent>,
    out: W,
}

impl<W: Write> App<W> {
    pub fn new(ctx: Arc<SessionContext>, tx: mpsc::Sender<AppEvent>, out: W) -> Self {
        Self {
            ctx,
            transcript: Vec::new(),
            busy: false,
            tx,
            out,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Print the startup banner.
    pub fn greet(&mut self) -> Result<()> {
        writeln!(
            self.out,
            "{} {} with {} tools. Type {} for commands.",
            "ollie".bold(),
            format!("({})", self.ctx.settings.model).dimmed(),
            self.ctx.catalog.len(),
            "/help".cyan()
        )?;
        Ok(())
    }

    pub fn handle(&mut self, event: AppEvent) -> Result<Control> {
        match event {
            AppEvent::Input(line) => self.on_input(line.trim()),
            AppEvent::TurnFinished(outcome) => {
                self.on_turn_finished(outcome)?;
                Ok(Control::Continue)
            }
            AppEvent::Interrupted | AppEvent::Eof => {
                writeln!(self.out, "{}", "goodbye.".dimmed())?;
                Ok(Control::Quit)
            }
            AppEvent::ReadFailed(e) => {
                writeln!(self.out, "{} {e}", "error:".red().bold())?;
                Ok(Control::Quit)
            }
        }
    }

    fn on_input(&mut self, line: &str) -> Result<Control> {
        if line.is_empty() {
            return Ok(Control::Continue);
        }
        if line.starts_with('/') {
            return self.on_command(line);
        }
        if self.busy {
            writeln!(
                self.out,
                "{}",
                "Still working on the previous request, please wait.".yellow()
            )?;
            return Ok(Control::Continue);
        }

        self.print_note(&Note::You(line.to_string()))?;
        self.ctx.hooks.fire(Hook::UserPromptSubmit);
        self.busy = true;

        let ctx = self.ctx.clone();
        let history = self.transcript.clone();
        let tx = self.tx.clone();
        let input = line.to_string();
        tokio::spawn(async move {
            let outcome = run_turn(
                ctx.backend.as_ref(),
                ctx.executor.as_ref(),
                &ctx.settings,
                &ctx.catalog,
                history,
                &input,
            )
            .await;
            if tx.send(AppEvent::TurnFinished(outcome)).await.is_err() {
                tracing::debug!("session closed before run finished");
            }
        });

        Ok(Control::Continue)
    }

    fn on_command(&mut self, line: &str) -> Result<Control> {
        match line {
            "/quit" | "/exit" => return Ok(Control::Quit),
            "/tools" => {
                write!(self.out, "{}", format_catalog(&self.ctx.catalog))?;
            }
            "/clear" if self.busy => {
                writeln!(self.out, "{}", "Cannot clear while a request is running.".yellow())?;
            }
            "/clear" => {
                self.transcript.clear();
                writeln!(self.out, "{}", "Conversation cleared.".dimmed())?;
            }
            "/help" => {
                writeln!(self.out, "  /tools  list available tools")?;
                writeln!(self.out, "  /clear  start a fresh conversation")?;
                writeln!(self.out, "  /quit   exit")?;
            }
            other => {
                writeln!(self.out, "{} Unknown command: {other}", "?".yellow())?;
            }
        }
        Ok(Control::Continue)
    }

    fn on_turn_finished(&mut self, outcome: TurnOutcome) -> Result<()> {
        tracing::debug!(run_id = %outcome.run_id, notes = outcome.notes.len(), "applying run result");
        self.busy = false;
        self.transcript = outcome.messages;
        for note in &outcome.notes {
            self.print_note(note)?;
        }
        self.ctx.hooks.fire(Hook::Stop);
        Ok(())
    }

    fn print_note(&mut self, note: &Note) -> Result<()> {
        let text = note.to_string();
        let painted = match note {
            Note::You(_) => text.bold(),
            Note::Running(_) => text.cyan(),
            Note::SkippedDuplicate(_) | Note::RoundLimit(_) => text.yellow(),
            Note::ToolNotFound(_) | Note::ToolFailed { .. } | Note::Error(_) => text.red(),
            Note::ToolSucceeded { .. } => text.green(),
            Note::Bot(_) => text.normal(),
        };
        writeln!(self.out, "{painted}")?;
        Ok(())
    }
}

/// Render the catalog grouped by server, in catalog order.
pub fn format_catalog(catalog: &[ToolInfo]) -> String {
    if catalog.is_empty() {
        return "No tools available.\n".to_string();
    }

    let mut out = String::new();
    let mut current: Option<&str> = None;
    for tool in catalog {
        if current != Some(tool.server.as_str()) {
            out.push_str(&format!("{}:\n", tool.server));
            current = Some(tool.server.as_str());
        }
        if tool.description.is_empty() {
            out.push_str(&format!("  {}\n", tool.name));
        } else {
            out.push_str(&format!("  {} - {}\n", tool.name, tool.description));
        }
    }
    out
}

// ─── Loop ────────────────────────────────────────────────────────────────────

/// Read lines on a dedicated thread and forward them as events.
///
/// The thread stops after Ctrl-C, Ctrl-D, an editor error, or once the
/// receiving side is gone.
pub fn spawn_reader(
    tx: mpsc::Sender<AppEvent>,
    history_path: Option<PathBuf>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                let _ = tx.blocking_send(AppEvent::ReadFailed(e.to_string()));
                return;
            }
        };
        if let Some(path) = &history_path {
            let _ = rl.load_history(path);
        }

        let prompt = format!("{} ", ">".green().bold());
        loop {
            let event = match rl.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = rl.add_history_entry(line.as_str());
                        if let Some(path) = &history_path {
                            let _ = rl.save_history(path);
                        }
                    }
                    AppEvent::Input(line)
                }
                Err(ReadlineError::Interrupted) => AppEvent::Interrupted,
                Err(ReadlineError::Eof) => AppEvent::Eof,
                Err(e) => AppEvent::ReadFailed(e.to_string()),
            };

            let last = !matches!(event, AppEvent::Input(_));
            if tx.blocking_send(event).is_err() || last {
                break;
            }
        }
    })
}

/// Process events until the user quits or every sender is gone.
pub async fn run_loop<W: Write>(app: &mut App<W>, rx: &mut mpsc::Receiver<AppEvent>) -> Result<()> {
    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => AppEvent::Interrupted,
        };

        if app.handle(event)? == Control::Quit {
            break;
        }
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
