//! Multi-round tool-calling loop.
//!
//! A run starts from one user utterance and alternates between asking the
//! model for a reply and executing the tools it requests, until a reply
//! arrives with no tool calls.
//!
//! The loop is split in two:
//! - [`Turn`] is a pure state machine. It consumes [`Event`]s and emits
//!   [`Effect`]s; it never performs I/O.
//! - [`run_turn`] performs the effects against a [`ChatBackend`] and a
//!   [`ToolExecutor`] and feeds the outcomes back in.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::inference::{ChatBackend, ChatMessage, ChatRequest, InferenceError, ToolCall, ToolDefinition};
use crate::mcp_client::{McpError, ToolExecutor, ToolInfo};

// ─── Notes ───────────────────────────────────────────────────────────────────

/// A user-visible line produced while a run progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    /// The utterance that started the run.
    You(String),
    Running(String),
    SkippedDuplicate(String),
    ToolNotFound(String),
    ToolFailed { tool: String, error: String },
    ToolSucceeded { tool: String, result: String },
    /// Final answer from the model.
    Bot(String),
    Error(String),
    RoundLimit(usize),
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Note::You(text) => write!(f, "You: {text}"),
            Note::Running(tool) => write!(f, "Running tool: {tool}"),
            Note::SkippedDuplicate(tool) => write!(f, "Skipping duplicate tool call: {tool}"),
            Note::ToolNotFound(tool) => write!(f, "→ {tool}: error - tool not found"),
            Note::ToolFailed { tool, error } => write!(f, "→ {tool}: error - {error}"),
            Note::ToolSucceeded { tool, result } => write!(f, "→ {tool}: success - {result}"),
            Note::Bot(text) => write!(f, "Bot: {text}"),
            Note::Error(err) => write!(f, "Error: {err}"),
            Note::RoundLimit(n) => write!(f, "Stopped after {n} tool rounds"),
        }
    }
}

// ─── Dedup ───────────────────────────────────────────────────────────────────

/// Render JSON compactly with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Identity of a tool call for duplicate detection.
pub fn call_key(name: &str, arguments: &Value) -> String {
    format!("{name}:{}", canonical_json(arguments))
}

/// Calls already made during one run.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: HashSet<String>,
}

impl DedupSet {
    /// Record a call. Returns `false` if it was already recorded.
    pub fn insert(&mut self, name: &str, arguments: &Value) -> bool {
        self.seen.insert(call_key(name, arguments))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ─── State Machine ───────────────────────────────────────────────────────────

/// Outcome of the last requested effect.
#[derive(Debug)]
pub enum Event {
    ModelReplied(ChatMessage),
    ModelFailed(InferenceError),
    ToolFinished(Result<Value, McpError>),
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send the transcript and tool catalog to the model.
    CallModel,
    ExecuteTool {
        server: String,
        tool: String,
        arguments: Value,
    },
    /// The run is over.
    Finish,
}

/// A tool call that has been dispatched and is awaiting its result.
#[derive(Debug, Clone)]
struct InFlight {
    server: String,
    tool: String,
    arguments: Value,
}

#[derive(Debug)]
enum State {
    AwaitingModel,
    ExecutingTools {
        queue: VecDeque<ToolCall>,
        in_flight: InFlight,
    },
    Done,
}

/// One orchestration run.
pub struct Turn<'a> {
    catalog: &'a [ToolInfo],
    messages: Vec<ChatMessage>,
    notes: Vec<Note>,
    seen: DedupSet,
    state: State,
    rounds: usize,
    max_rounds: Option<usize>,
    /// Index of this run's user turn; earlier messages are history.
    run_start: usize,
    answer: Option<String>,
}

impl<'a> Turn<'a> {
    /// Append the user turn and ask for the first model call.
    pub fn start(
        history: Vec<ChatMessage>,
        input: &str,
        catalog: &'a [ToolInfo],
        max_rounds: Option<usize>,
    ) -> (Self, Effect) {
        let mut messages = history;
        let run_start = messages.len();
        messages.push(ChatMessage::user(input));

        let turn = Self {
            catalog,
            messages,
            notes: Vec::new(),
            seen: DedupSet::default(),
            state: State::AwaitingModel,
            rounds: 0,
            max_rounds,
            run_start,
            answer: None,
        };
        (turn, Effect::CallModel)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Completed tool rounds so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Final answer of a run that finished without a backend failure.
    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    /// Consume the run, returning the transcript and the notes.
    pub fn into_parts(self) -> (Vec<ChatMessage>, Vec<Note>) {
        (self.messages, self.notes)
    }

    /// Feed the outcome of the last effect and get the next one.
    pub fn handle(&mut self, event: Event) -> Effect {
        let state = std::mem::replace(&mut self.state, State::Done);

        match (state, event) {
            (State::AwaitingModel, Event::ModelFailed(err)) => {
                self.notes.push(Note::Error(err.to_string()));
                self.state = State::Done;
                Effect::Finish
            }
            (State::AwaitingModel, Event::ModelReplied(reply)) => self.on_reply(reply),
            (State::ExecutingTools { queue, in_flight }, Event::ToolFinished(result)) => {
                self.on_tool_result(in_flight, result);
                self.next_tool(queue)
            }
            (state, event) => {
                tracing::warn!(state = ?state, event = ?event, "event does not apply to current state");
                self.state = state;
                self.pending_effect()
            }
        }
    }

    fn on_reply(&mut self, reply: ChatMessage) -> Effect {
        let calls = reply.tool_calls.clone();
        self.messages.push(reply);

        if calls.is_empty() {
            return self.finish();
        }
        self.next_tool(calls.into())
    }

    fn on_tool_result(&mut self, call: InFlight, result: Result<Value, McpError>) {
        match result {
            Ok(value) => {
                let rendered = value.to_string();
                tracing::info!(server = %call.server, tool = %call.tool, "tool succeeded");
                self.messages.push(ChatMessage::tool(rendered.clone()));
                self.notes.push(Note::ToolSucceeded {
                    tool: call.tool,
                    result: rendered,
                });
            }
            Err(err) => {
                tracing::warn!(server = %call.server, tool = %call.tool, error = %err, "tool failed");
                self.notes.push(Note::ToolFailed {
                    tool: call.tool,
                    error: err.to_string(),
                });
            }
        }
    }

    /// Work through the queued calls until one needs executing.
    fn next_tool(&mut self, mut queue: VecDeque<ToolCall>) -> Effect {
        while let Some(call) = queue.pop_front() {
            let name = call.function.name;
            let arguments = call.function.arguments;

            if !self.seen.insert(&name, &arguments) {
                tracing::debug!(tool = %name, "skipping duplicate tool call");
                self.notes.push(Note::SkippedDuplicate(name));
                continue;
            }

            self.notes.push(Note::Running(name.clone()));

            let Some(info) = self.catalog.iter().find(|t| t.name == name) else {
                tracing::warn!(tool = %name, "model requested unknown tool");
                self.notes.push(Note::ToolNotFound(name));
                continue;
            };

            let in_flight = InFlight {
                server: info.server.clone(),
                tool: name,
                arguments,
            };
            let effect = Effect::ExecuteTool {
                server: in_flight.server.clone(),
                tool: in_flight.tool.clone(),
                arguments: in_flight.arguments.clone(),
            };
            self.state = State::ExecutingTools {
                queue,
                in_flight,
            };
            return effect;
        }

        self.rounds += 1;
        if let Some(limit) = self.max_rounds {
            if self.rounds >= limit {
                tracing::warn!(rounds = self.rounds, "tool round limit reached");
                self.notes.push(Note::RoundLimit(self.rounds));
                return self.finish();
            }
        }

        self.state = State::AwaitingModel;
        Effect::CallModel
    }

    fn finish(&mut self) -> Effect {
        self.state = State::Done;
        self.answer = self.latest_reply().map(str::to_string);
        if let Some(answer) = &self.answer {
            self.notes.push(Note::Bot(answer.clone()));
        }
        Effect::Finish
    }

    /// Content of this run's last assistant turn, when non-empty.
    fn latest_reply(&self) -> Option<&str> {
        self.messages[self.run_start..]
            .iter()
            .rev()
            .find(|m| m.role == crate::inference::Role::Assistant)
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
    }

    fn pending_effect(&self) -> Effect {
        match &self.state {
            State::AwaitingModel => Effect::CallModel,
            State::ExecutingTools { in_flight, .. } => Effect::ExecuteTool {
                server: in_flight.server.clone(),
                tool: in_flight.tool.clone(),
                arguments: in_flight.arguments.clone(),
            },
            State::Done => Effect::Finish,
        }
    }
}

// ─── Driver ──────────────────────────────────────────────────────────────────

/// Per-session settings for [`run_turn`].
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub max_tool_rounds: Option<usize>,
}

/// Result of one run.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub run_id: Uuid,
    /// Full transcript after the run.
    pub messages: Vec<ChatMessage>,
    pub notes: Vec<Note>,
    pub answer: Option<String>,
    pub rounds: usize,
}

/// Map the aggregated catalog to the backend's tool format.
pub fn tool_definitions(catalog: &[ToolInfo]) -> Vec<ToolDefinition> {
    catalog
        .iter()
        .map(|t| ToolDefinition::function(&t.name, &t.description, t.input_schema.clone()))
        .collect()
}

/// Drive one run to completion.
pub async fn run_turn(
    backend: &dyn ChatBackend,
    executor: &dyn ToolExecutor,
    settings: &TurnSettings,
    catalog: &[ToolInfo],
    history: Vec<ChatMessage>,
    input: &str,
) -> TurnOutcome {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("turn", run_id = %run_id, model = %settings.model);

    async move {
        let tools = tool_definitions(catalog);
        let (mut turn, mut effect) = Turn::start(history, input, catalog, settings.max_tool_rounds);
        tracing::info!(tools = tools.len(), "run started");

        loop {
            let event = match effect {
                Effect::CallModel => {
                    let request =
                        ChatRequest::new(&settings.model, turn.messages().to_vec(), tools.clone());
                    tracing::debug!(round = turn.rounds(), "calling model");
                    match backend.chat(&request).await {
                        Ok(response) => Event::ModelReplied(response.message),
                        Err(e) => {
                            tracing::error!(error = %e, "model call failed");
                            Event::ModelFailed(e)
                        }
                    }
                }
                Effect::ExecuteTool {
                    server,
                    tool,
                    arguments,
                } => {
                    tracing::info!(server = %server, tool = %tool, round = turn.rounds(), "executing tool");
                    Event::ToolFinished(executor.execute(&server, &tool, arguments).await)
                }
                Effect::Finish => break,
            };
            effect = turn.handle(event);
        }

        let answer = turn.answer().map(str::to_string);
        let rounds = turn.rounds();
        let (messages, notes) = turn.into_parts();
        tracing::info!(rounds, answered = answer.is_some(), "run finished");

        TurnOutcome {
            run_id,
            messages,
            notes,
            answer,
            rounds,
        }
    }
    .instrument(span)
    .await
}

// ─── Tests ───────────────────────────────────────────────────────────────────
