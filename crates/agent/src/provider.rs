//! Provider-agnostic streaming chat interface.

use serde_json::Value;

use aria_domain::chat::ChatMessage;
use aria_domain::stream::{BoxStream, LlmEvent};
use aria_domain::tool::ToolDefinition;
use aria_domain::Result;

/// One provider call: conversation, system prompt, optional tool schemas,
/// and any data-URL images attached to the latest user message.
#[derive(Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub system: &'a str,
    pub tools: Option<&'a [ToolDefinition]>,
    pub images: &'a [Value],
}

/// Trait every streaming LLM adapter implements.
///
/// The stream yields text deltas, assembled tool-call lists, or the
/// unsupported-tools sentinel that flips the agent into prompt mode.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat_stream(
        &self,
        req: ChatRequest<'_>,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
