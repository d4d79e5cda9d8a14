//! Wire types for Ollama's native chat API (`POST /api/chat`).

use serde::{Deserialize, Serialize};

// ─── Messages ────────────────────────────────────────────────────────────────

/// One conversation turn.
///
/// `content` is always serialized (as `""` when empty); `tool_calls` only
/// when the assistant requested tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A tool result fed back to the model.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

// ─── Tools ───────────────────────────────────────────────────────────────────

/// Tool definition sent in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

/// Function definition within a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }
    }
}

/// Name and arguments of a requested call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl FunctionCall {
    /// Some models send the arguments object JSON-encoded inside a string.
    /// Unwrap that so every caller sees an object.
    fn normalize(&mut self) {
        if let serde_json::Value::String(raw) = &self.arguments {
            let parsed = serde_json::from_str::<serde_json::Value>(raw);
            if let Ok(object @ serde_json::Value::Object(_)) = parsed {
                self.arguments = object;
            }
        }
        if self.arguments.is_null() {
            self.arguments = serde_json::Value::Object(Default::default());
        }
    }
}

// ─── Request / Response ──────────────────────────────────────────────────────

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
}

impl ChatRequest {
    /// A non-streaming request.
    pub fn new(model: &str, messages: Vec<ChatMessage>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            tools,
            stream: false,
        }
    }
}

/// Non-streaming reply from `/api/chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
}

impl ChatResponse {
    /// Bring tool-call arguments into object form.
    pub fn normalized(mut self) -> Self {
        for call in &mut self.message.tool_calls {
            call.function.normalize();
        }
        self
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let req = ChatRequest::new(
            "qwen3:8b",
            vec![ChatMessage::user("hi")],
            vec![ToolDefinition::function(
                "list_dir",
                "List a directory",
                json!({"type": "object"}),
            )],
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["model"], "qwen3:8b");
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0], json!({"role": "user", "content": "hi"}));
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_tools_omitted_when_empty() {
        let req = ChatRequest::new("m", vec![], vec![]);
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_assistant_tool_calls_round_trip_in_history() {
        let msg = ChatMessage::assistant("")
            .with_tool_calls(vec![ToolCall::new("read", json!({"path": "a"}))]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["content"], "");
        assert_eq!(value["tool_calls"][0]["function"]["name"], "read");
        assert_eq!(value["tool_calls"][0]["function"]["arguments"]["path"], "a");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "model": "qwen3:8b",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "list_dir", "arguments": {"path": "."}}}]
            },
            "done": true
        }"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(resp.done);
        assert_eq!(resp.message.role, Role::Assistant);
        assert_eq!(resp.message.tool_calls[0].function.name, "list_dir");
    }

    #[test]
    fn test_response_without_tool_calls() {
        let resp: ChatResponse =
            serde_json::from_str(r#"{"message": {"role": "assistant", "content": "hello"}}"#)
                .unwrap();
        assert!(resp.message.tool_calls.is_empty());
        assert!(!resp.done);
    }

    #[test]
    fn test_string_arguments_are_unwrapped() {
        let body = r#"{"message": {"role": "assistant", "content": "",
            "tool_calls": [{"function": {"name": "f", "arguments": "{\"a\":1}"}}]}}"#;
        let resp: ChatResponse = serde_json::from_str::<ChatResponse>(body)
            .unwrap()
            .normalized();
        assert_eq!(resp.message.tool_calls[0].function.arguments, json!({"a": 1}));
    }

    #[test]
    fn test_missing_arguments_become_empty_object() {
        let body = r#"{"message": {"role": "assistant", "tool_calls": [{"function": {"name": "f"}}]}}"#;
        let resp = serde_json::from_str::<ChatResponse>(body).unwrap().normalized();
        assert_eq!(resp.message.tool_calls[0].function.arguments, json!({}));
    }
}
