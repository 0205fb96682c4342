//! OpenAI-compatible streaming adapter.
//!
//! Works with OpenAI, Azure-style gateways, Ollama, vLLM and anything else
//! following the chat completions contract. Tool calls arrive as streamed
//! fragments and are assembled here; endpoints that reject the `tools`
//! parameter surface the unsupported-tools sentinel instead of an error so
//! the agent can fall back to prompt mode.

use serde_json::Value;

use aria_domain::chat::{ChatMessage, Role};
use aria_domain::config::AgentConfig;
use aria_domain::stream::{BoxStream, LlmEvent};
use aria_domain::tool::{ToolCall, ToolDefinition};
use aria_domain::{Error, Result};

use crate::provider::{ChatRequest, LlmProvider};

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            id: "openai_compat".into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest<'_>) -> Value {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        if !req.system.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": req.system,
            }));
        }

        let last_user_idx = req
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(usize::MAX);

        for (idx, msg) in req.messages.iter().enumerate() {
            let attach_images = idx == last_user_idx && !req.images.is_empty();
            messages.push(msg_to_wire(msg, attach_images.then_some(req.images)));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        if let Some(tools) = req.tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools.iter().map(tool_to_wire).collect());
            }
        }
        if let Some(temp) = self.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &ChatMessage, images: Option<&[Value]>) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        Role::Assistant if msg.tool_calls.is_some() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": if msg.content.is_empty() { Value::Null } else { Value::String(msg.content.clone()) },
                "tool_calls": calls,
            })
        }
        Role::User if images.is_some_and(|imgs| !imgs.is_empty()) => {
            let mut content = vec![serde_json::json!({"type": "text", "text": msg.content})];
            for img in images.unwrap_or_default() {
                content.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": img, "detail": "auto" },
                }));
            }
            serde_json::json!({ "role": "user", "content": content })
        }
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Line-oriented SSE scanner. The chat completions stream carries exactly
/// one `data:` payload per line, so complete lines are the framing unit;
/// a partial line at a chunk boundary waits for the rest.
#[derive(Default)]
struct SseLines {
    buffer: String,
}

impl SseLines {
    /// Absorb one network chunk and return the `data:` payloads of every
    /// line it completed.
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// The body closed; a trailing line may lack its newline.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&rest)
    }
}

fn data_payload(line: &str) -> Option<String> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    (!payload.is_empty()).then(|| payload.to_string())
}

/// Tool-call fragments accumulated across deltas, keyed by stream index.
#[derive(Default)]
struct StreamState {
    pending: Vec<PendingCall>,
}

#[derive(Default, Clone)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamState {
    fn apply_delta(&mut self, tc: &Value) {
        let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        while self.pending.len() <= index {
            self.pending.push(PendingCall::default());
        }
        let slot = &mut self.pending[index];
        if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
            slot.id = id.to_string();
        }
        if let Some(func) = tc.get("function") {
            if let Some(name) = func.get("name").and_then(|v| v.as_str()) {
                slot.name.push_str(name);
            }
            if let Some(args) = func.get("arguments").and_then(|v| v.as_str()) {
                slot.arguments.push_str(args);
            }
        }
    }

    fn assemble(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|p| !p.name.is_empty())
            .map(|p| ToolCall {
                id: p.id,
                name: p.name,
                arguments: serde_json::from_str(&p.arguments)
                    .unwrap_or(Value::Object(Default::default())),
            })
            .collect()
    }
}

fn parse_sse_data(state: &mut StreamState, data: &str) -> Vec<Result<LlmEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(LlmEvent::Done {
            finish_reason: Some("stop".into()),
        })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let Some(choice) = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    else {
        return Vec::new();
    };

    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            state.apply_delta(tc);
        }
        return Vec::new();
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let mut events = Vec::new();
        if fr == "tool_calls" {
            let calls = state.assemble();
            if !calls.is_empty() {
                events.push(Ok(LlmEvent::ToolCalls(calls)));
            }
        }
        events.push(Ok(LlmEvent::Done {
            finish_reason: Some(fr.to_string()),
        }));
        return events;
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return vec![Ok(LlmEvent::Token(text.to_string()))];
        }
    }

    Vec::new()
}

/// Whether a failed request most likely means the endpoint rejected tool
/// parameters rather than the request as a whole.
fn looks_like_tool_rejection(status: reqwest::StatusCode, body: &str) -> bool {
    matches!(status.as_u16(), 400 | 404 | 422) && body.to_lowercase().contains("tool")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat_stream(
        &self,
        req: ChatRequest<'_>,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);
        let sent_tools = req.tools.is_some_and(|t| !t.is_empty());

        tracing::debug!(provider = %self.id, model = %self.model, "chat stream request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            if sent_tools && looks_like_tool_rejection(status, &detail) {
                tracing::warn!(
                    provider = %self.id,
                    status = status.as_u16(),
                    "endpoint rejected tool parameters, signalling prompt mode"
                );
                return Ok(Box::pin(futures_util::stream::iter(vec![
                    Ok(LlmEvent::UnsupportedTools),
                    Ok(LlmEvent::Done {
                        finish_reason: None,
                    }),
                ])));
            }
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), detail),
            });
        }

        Ok(Box::pin(async_stream::stream! {
            let mut resp = resp;
            let mut lines = SseLines::default();
            let mut state = StreamState::default();
            let mut done_emitted = false;

            loop {
                match resp.chunk().await {
                    Ok(Some(bytes)) => {
                        for data in lines.push(&String::from_utf8_lossy(&bytes)) {
                            for event in parse_sse_data(&mut state, &data) {
                                if matches!(&event, Ok(LlmEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    Ok(None) => {
                        if let Some(data) = lines.finish() {
                            for event in parse_sse_data(&mut state, &data) {
                                if matches!(&event, Ok(LlmEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(Error::Http(e.to_string()));
                        break;
                    }
                }
            }

            // Endpoints that close the body without `[DONE]` still owe the
            // agent loop a terminal event.
            if !done_emitted {
                yield Ok(LlmEvent::Done { finish_reason: Some("stop".into()) });
            }
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
