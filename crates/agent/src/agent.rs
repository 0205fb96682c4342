//! The streaming agent and its tool-interaction loop.
//!
//! One `chat` call produces a stream of events for exactly one user turn.
//! Each loop iteration is one provider call: native-mode tool calls are fed
//! through the executor and their results appended as `role=tool` messages;
//! in prompt mode the streamed text is watched for a JSON tool envelope and
//! results come back as a single `role=user` message. The prompt-mode flag
//! latches for the lifetime of the agent once the provider signals it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;

use aria_domain::chat::{BatchInput, ChatMessage};
use aria_domain::config::{AgentConfig, InterruptMethod};
use aria_domain::stream::{BoxStream, LlmEvent};
use aria_domain::tool::CallerMode;

use crate::executor::{ExecutorEvent, ToolExecutor};
use crate::json_detector::StreamJsonDetector;
use crate::memory::ChatMemory;
use crate::provider::{ChatRequest, LlmProvider};

/// Hard stop for runaway tool loops within a single turn.
const MAX_TOOL_LOOPS: usize = 25;

/// Events emitted to the orchestrator during one agent turn.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Incremental assistant text.
    Text(String),
    /// Structured tool status update, forwarded to the UI as-is.
    ToolStatus(Value),
    /// Out-of-band payload from a tool result (e.g. a video response).
    SideChannel(Value),
    /// The turn failed; partial text may already have been streamed.
    Error(String),
}

pub struct StreamingAgent {
    provider: Arc<dyn LlmProvider>,
    executor: Option<Arc<ToolExecutor>>,
    memory: Mutex<ChatMemory>,
    system_prompt: String,
    mcp_prompt: String,
    prompt_mode: AtomicBool,
    use_tools: bool,
}

impl StreamingAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: Option<Arc<ToolExecutor>>,
        persona_prompt: &str,
        mcp_prompt: String,
        config: &AgentConfig,
    ) -> Self {
        let mut system_prompt = if persona_prompt.is_empty() {
            "You are a helpful assistant.".to_string()
        } else {
            persona_prompt.to_string()
        };
        if config.interrupt_method == InterruptMethod::User {
            system_prompt.push_str(
                "\n\nIf you received `[Interrupted by user]` signal, you were interrupted.",
            );
        }

        Self {
            provider,
            executor,
            memory: Mutex::new(ChatMemory::new(config.memory_cap, config.interrupt_method)),
            system_prompt,
            mcp_prompt,
            prompt_mode: AtomicBool::new(false),
            use_tools: config.use_tools,
        }
    }

    /// Whether the agent has latched into prompt mode.
    pub fn prompt_mode(&self) -> bool {
        self.prompt_mode.load(Ordering::Acquire)
    }

    /// Truncate the in-flight reply to what the client heard and record the
    /// interruption marker in memory.
    pub fn handle_interrupt(&self, heard_response: &str) {
        self.memory.lock().handle_interrupt(heard_response);
    }

    /// Replace memory with persisted history entries.
    pub fn set_memory_from_history(&self, messages: Vec<ChatMessage>) {
        self.memory.lock().load_from_history(messages);
    }

    pub fn memory_snapshot(&self) -> Vec<ChatMessage> {
        self.memory.lock().snapshot()
    }

    /// Run one turn. The returned stream ends when the model produces its
    /// final answer (or an error event).
    pub fn chat(self: Arc<Self>, input: BatchInput) -> BoxStream<'static, AgentEvent> {
        let agent = self;
        Box::pin(async_stream::stream! {
            agent.memory.lock().reset_interrupt();

            let mut text_prompt = input.text.trim().to_string();
            if !input.images.is_empty() {
                if text_prompt.is_empty() {
                    text_prompt = "[User provided image(s)]".into();
                } else {
                    text_prompt.push_str("\n[User has also provided images]");
                }
            }
            if text_prompt.is_empty() {
                tracing::warn!("agent received empty input, nothing to do");
                return;
            }

            let mut user_msg = ChatMessage::user(text_prompt);
            if let Some(name) = &input.from_name {
                user_msg = user_msg.with_name(name.clone());
            }

            let mut messages = agent.memory.lock().snapshot();
            messages.push(user_msg.clone());
            if !input.skip_memory {
                agent.memory.lock().append(user_msg);
            }

            let images = input.images;
            let tool_defs = agent
                .executor
                .as_ref()
                .filter(|_| agent.use_tools)
                .map(|e| e.definitions().to_vec())
                .unwrap_or_default();

            let mut detector = StreamJsonDetector::new();
            let mut loops = 0usize;

            'outer: loop {
                loops += 1;
                if loops > MAX_TOOL_LOOPS {
                    tracing::error!(loops, "tool loop limit reached, stopping turn");
                    yield AgentEvent::Error("tool loop limit reached".into());
                    break;
                }

                let prompt_mode = agent.prompt_mode.load(Ordering::Acquire);
                let system = if prompt_mode && !agent.mcp_prompt.is_empty() {
                    format!("{}\n\n{}", agent.system_prompt, agent.mcp_prompt)
                } else {
                    agent.system_prompt.clone()
                };
                let tools_for_call = if prompt_mode || tool_defs.is_empty() {
                    None
                } else {
                    Some(tool_defs.as_slice())
                };

                let request = ChatRequest {
                    messages: &messages,
                    system: &system,
                    tools: tools_for_call,
                    images: &images,
                };
                let mut stream = match agent.provider.chat_stream(request).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!(error = %e, "provider call failed");
                        yield AgentEvent::Error(e.to_string());
                        break;
                    }
                };

                let mut turn_text = String::new();
                let mut pending_calls = None;
                let mut prompt_json = None;
                let mut switch_to_prompt = false;
                let mut stream_error = None;

                while let Some(event) = stream.next().await {
                    match event {
                        Ok(LlmEvent::Token(text)) => {
                            turn_text.push_str(&text);
                            if prompt_mode {
                                if let Some(json) = detector.process_chunk(&text) {
                                    prompt_json = Some(json);
                                    break;
                                }
                            }
                            yield AgentEvent::Text(text);
                        }
                        Ok(LlmEvent::ToolCalls(calls)) => {
                            pending_calls = Some(calls);
                            break;
                        }
                        Ok(LlmEvent::UnsupportedTools) => {
                            switch_to_prompt = true;
                            break;
                        }
                        Ok(LlmEvent::Done { .. }) => break,
                        Err(e) => {
                            stream_error = Some(e);
                            break;
                        }
                    }
                }

                if let Some(e) = stream_error {
                    // Keep whatever the model already said.
                    if !turn_text.is_empty() {
                        agent.memory.lock().append(ChatMessage::assistant(turn_text));
                    }
                    tracing::error!(error = %e, "provider stream failed mid-turn");
                    yield AgentEvent::Error(e.to_string());
                    break;
                }

                if switch_to_prompt {
                    tracing::warn!(
                        provider = %agent.provider.provider_id(),
                        "no native tool support, latching prompt mode"
                    );
                    agent.prompt_mode.store(true, Ordering::Release);
                    detector.reset();
                    continue 'outer;
                }

                if let Some(json) = prompt_json {
                    if !turn_text.is_empty() {
                        agent
                            .memory
                            .lock()
                            .append(ChatMessage::assistant(turn_text.clone()));
                    }
                    let calls = ToolExecutor::parse_prompt_tool_calls(&json);
                    if calls.is_empty() {
                        tracing::warn!("prompt-mode JSON contained no tool calls");
                        continue 'outer;
                    }
                    let executor = match agent.executor.clone() {
                        Some(executor) => executor,
                        None => {
                            yield AgentEvent::Error("tool call requested but no executor configured".into());
                            break;
                        }
                    };
                    let mut tool_stream = executor.execute_tools(calls, CallerMode::Prompt);
                    while let Some(event) = tool_stream.next().await {
                        match event {
                            ExecutorEvent::Status(payload) => yield AgentEvent::ToolStatus(payload),
                            ExecutorEvent::SideChannel(payload) => yield AgentEvent::SideChannel(payload),
                            ExecutorEvent::FinalResults(results) => {
                                messages.extend(results);
                                break;
                            }
                        }
                    }
                    continue 'outer;
                }

                if let Some(calls) = pending_calls {
                    let mut assistant_msg = ChatMessage::assistant(turn_text.clone());
                    assistant_msg.tool_calls = Some(calls.clone());
                    messages.push(assistant_msg);
                    if !turn_text.is_empty() {
                        agent
                            .memory
                            .lock()
                            .append(ChatMessage::assistant(turn_text.clone()));
                    }
                    let executor = match agent.executor.clone() {
                        Some(executor) => executor,
                        None => {
                            yield AgentEvent::Error("tool call requested but no executor configured".into());
                            break;
                        }
                    };
                    let mut tool_stream = executor.execute_tools(calls, CallerMode::Native);
                    while let Some(event) = tool_stream.next().await {
                        match event {
                            ExecutorEvent::Status(payload) => yield AgentEvent::ToolStatus(payload),
                            ExecutorEvent::SideChannel(payload) => yield AgentEvent::SideChannel(payload),
                            ExecutorEvent::FinalResults(results) => {
                                messages.extend(results);
                                break;
                            }
                        }
                    }
                    continue 'outer;
                }

                // Final answer.
                if !turn_text.is_empty() {
                    agent.memory.lock().append(ChatMessage::assistant(turn_text));
                }
                break;
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
