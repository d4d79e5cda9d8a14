//! Inference client for a local Ollama server.
//!
//! This module handles all communication with the model backend:
//! - Wire types for the native `/api/chat` endpoint
//! - A non-streaming HTTP client
//! - The `ChatBackend` seam the agent loop is written against

pub mod client;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{ChatBackend, OllamaClient};
pub use errors::InferenceError;
pub use types::{ChatMessage, ChatRequest, ChatResponse, Role, ToolCall, ToolDefinition};
