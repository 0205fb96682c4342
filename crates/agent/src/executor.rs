//! Tool executor: turns streamed tool-call intents into MCP calls and a
//! lazy sequence of status updates.
//!
//! The event stream carries per-call `Status` payloads (forwarded to the UI
//! as `tool_call_status` frames), optional `SideChannel` payloads (e.g. a
//! video response the front-end plays directly), and terminates with exactly
//! one `FinalResults` carrying the messages to feed back into the model.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use aria_domain::chat::ChatMessage;
use aria_domain::stream::BoxStream;
use aria_domain::tool::{CallerMode, ToolCall, ToolDefinition};

use aria_mcp_client::{McpClient, ToolCallOutcome};

/// Events yielded while a batch of tool calls executes.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    /// Per-call status update (`running`, `completed`, `error`).
    Status(Value),
    /// Out-of-band payload extracted from a tool result.
    SideChannel(Value),
    /// The structured results to feed back into the model. Terminal.
    FinalResults(Vec<ChatMessage>),
}

pub struct ToolExecutor {
    mcp: Arc<McpClient>,
    /// tool name → owning server.
    tool_servers: HashMap<String, String>,
    definitions: Vec<ToolDefinition>,
}

impl ToolExecutor {
    /// Discover tools on every enabled server and build the dispatch map.
    ///
    /// Servers that fail to list are skipped; their tools simply stay
    /// unavailable until the next discovery.
    pub async fn discover(mcp: Arc<McpClient>, enabled_servers: &[String]) -> Self {
        let mut tool_servers = HashMap::new();
        let mut definitions = Vec::new();

        for server in enabled_servers {
            match mcp.list_tools(server).await {
                Ok(tools) => {
                    for tool in tools {
                        if let Some(previous) =
                            tool_servers.insert(tool.name.clone(), server.clone())
                        {
                            tracing::warn!(
                                tool = %tool.name,
                                previous_server = %previous,
                                server = %server,
                                "duplicate tool name, later server wins"
                            );
                        }
                        definitions.push(ToolDefinition {
                            name: tool.name,
                            description: tool.description,
                            parameters: tool.input_schema,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "tool discovery failed, skipping server");
                }
            }
        }

        tracing::info!(tool_count = definitions.len(), "tool executor ready");
        Self {
            mcp,
            tool_servers,
            definitions,
        }
    }

    /// Build an executor from a known tool map (tests, fixed registries).
    pub fn with_tools(
        mcp: Arc<McpClient>,
        tool_servers: HashMap<String, String>,
        definitions: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            mcp,
            tool_servers,
            definitions,
        }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// The tool name → server name dispatch map.
    pub fn tool_servers(&self) -> &HashMap<String, String> {
        &self.tool_servers
    }

    pub fn has_tools(&self) -> bool {
        !self.definitions.is_empty()
    }

    /// Execute a batch of tool calls, yielding status updates and finally
    /// the structured results shaped for the caller's mode.
    pub fn execute_tools(
        self: Arc<Self>,
        calls: Vec<ToolCall>,
        mode: CallerMode,
    ) -> BoxStream<'static, ExecutorEvent> {
        let executor = self;
        Box::pin(async_stream::stream! {
            let mut native_results = Vec::new();
            let mut prompt_texts = Vec::new();

            for call in calls {
                yield ExecutorEvent::Status(status_payload(&call.name, "running", None));

                let outcome = match executor.tool_servers.get(&call.name) {
                    Some(server) => {
                        executor
                            .mcp
                            .call_tool(server, &call.name, call.arguments.clone())
                            .await
                    }
                    None => ToolCallOutcome::error(format!("Unknown tool: {}", call.name)),
                };

                let text = outcome.text();
                if outcome.is_error {
                    yield ExecutorEvent::Status(status_payload(
                        &call.name,
                        "error",
                        Some(&text),
                    ));
                } else {
                    yield ExecutorEvent::Status(status_payload(
                        &call.name,
                        "completed",
                        Some(&text),
                    ));
                    if let Some(side_channel) = extract_side_channel(&text) {
                        yield ExecutorEvent::SideChannel(side_channel);
                    }
                }

                match mode {
                    CallerMode::Native => {
                        native_results.push(ChatMessage::tool_result(call.id.clone(), text));
                    }
                    CallerMode::Prompt => {
                        prompt_texts.push(format!("Tool '{}' result: {}", call.name, text));
                    }
                }
            }

            let results = match mode {
                CallerMode::Native => native_results,
                CallerMode::Prompt => {
                    if prompt_texts.is_empty() {
                        Vec::new()
                    } else {
                        vec![ChatMessage::user(prompt_texts.join("\n"))]
                    }
                }
            };
            yield ExecutorEvent::FinalResults(results);
        })
    }

    /// Parse the JSON envelope the model emits in prompt mode into tool
    /// calls. Accepts a single object or an array of objects; `name` and
    /// `args`/`arguments`/`parameters` key spellings are all tolerated.
    pub fn parse_prompt_tool_calls(value: &Value) -> Vec<ToolCall> {
        let items: Vec<&Value> = match value {
            Value::Array(arr) => arr.iter().collect(),
            Value::Object(_) => vec![value],
            _ => return Vec::new(),
        };

        items
            .iter()
            .filter_map(|item| {
                let name = item
                    .get("name")
                    .or_else(|| item.get("tool_name"))
                    .and_then(|v| v.as_str())?
                    .to_string();
                let arguments = item
                    .get("args")
                    .or_else(|| item.get("arguments"))
                    .or_else(|| item.get("parameters"))
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default()));
                let id = item
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("prompt_{}", uuid::Uuid::new_v4().simple()));
                Some(ToolCall {
                    id,
                    name,
                    arguments,
                })
            })
            .collect()
    }
}

fn status_payload(tool_name: &str, status: &str, content: Option<&str>) -> Value {
    let mut payload = serde_json::json!({
        "tool_name": tool_name,
        "status": status,
    });
    if let Some(content) = content {
        payload["content"] = Value::String(content.to_string());
    }
    payload
}

/// Tool results whose content is a typed response envelope are surfaced to
/// the UI out-of-band before the model sees them.
fn extract_side_channel(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text).ok()?;
    let kind = value.get("type")?.as_str()?;
    matches!(kind, "video_response" | "text_response" | "refresh_response").then_some(value)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use aria_domain::chat::Role;
    use aria_domain::config::McpConfig;
    use aria_mcp_client::ServerRegistry;
    use futures_util::StreamExt;

    fn executor_without_servers() -> Arc<ToolExecutor> {
        let registry = Arc::new(ServerRegistry::from_config(&McpConfig::default()));
        let mcp = Arc::new(McpClient::new(registry));
        Arc::new(ToolExecutor::with_tools(mcp, HashMap::new(), Vec::new()))
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: format!("call_{name}"),
            name: name.into(),
            arguments: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_status_and_structured_result() {
        let executor = executor_without_servers();
        let events: Vec<_> = executor
            .execute_tools(vec![call("missing")], CallerMode::Native)
            .collect()
            .await;

        assert!(matches!(
            &events[0],
            ExecutorEvent::Status(v) if v["status"] == "running"
        ));
        assert!(matches!(
            &events[1],
            ExecutorEvent::Status(v) if v["status"] == "error"
        ));
        match &events[2] {
            ExecutorEvent::FinalResults(results) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].role, Role::Tool);
                assert_eq!(results[0].tool_call_id.as_deref(), Some("call_missing"));
                assert!(results[0].content.contains("Unknown tool"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn prompt_mode_folds_results_into_one_user_message() {
        let executor = executor_without_servers();
        let events: Vec<_> = executor
            .execute_tools(vec![call("a"), call("b")], CallerMode::Prompt)
            .collect()
            .await;

        let final_event = events.last().unwrap();
        match final_event {
            ExecutorEvent::FinalResults(results) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].role, Role::User);
                assert!(results[0].content.contains("Tool 'a' result"));
                assert!(results[0].content.contains("Tool 'b' result"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_batch_still_terminates_with_final_results() {
        let executor = executor_without_servers();
        let events: Vec<_> = executor
            .execute_tools(Vec::new(), CallerMode::Native)
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ExecutorEvent::FinalResults(r) if r.is_empty()));
    }

    #[test]
    fn parse_prompt_calls_accepts_object_and_array() {
        let single = serde_json::json!({"name": "get_time", "args": {"tz": "UTC"}});
        let calls = ToolExecutor::parse_prompt_tool_calls(&single);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_time");
        assert_eq!(calls[0].arguments["tz"], "UTC");

        let array = serde_json::json!([
            {"tool_name": "a", "arguments": {}},
            {"name": "b", "parameters": {"x": 1}},
        ]);
        let calls = ToolExecutor::parse_prompt_tool_calls(&array);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].arguments["x"], 1);
    }

    #[test]
    fn parse_prompt_calls_skips_nameless_entries() {
        let value = serde_json::json!([{"args": {}}, {"name": "ok"}]);
        let calls = ToolExecutor::parse_prompt_tool_calls(&value);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
    }

    #[test]
    fn side_channel_detection() {
        assert!(extract_side_channel(r#"{"type":"video_response","url":"v.mp4"}"#).is_some());
        assert!(extract_side_channel(r#"{"type":"weather","temp":21}"#).is_none());
        assert!(extract_side_channel("plain text").is_none());
    }
}
