use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
///
/// Arguments may have arrived as streamed fragments; the provider adapter
/// assembles them into a single JSON value before the call surfaces here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// How the agent is talking to the provider when a tool call is dispatched.
///
/// Native mode produces `role=tool` result messages keyed by call id; prompt
/// mode folds all results into a single `role=user` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerMode {
    Native,
    Prompt,
}
