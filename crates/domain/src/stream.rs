use std::pin::Pin;

use crate::tool::ToolCall;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted by a streaming LLM provider (provider-agnostic).
#[derive(Debug, Clone)]
pub enum LlmEvent {
    /// A text token chunk.
    Token(String),

    /// The model finished assembling one or more tool calls. No further
    /// text follows in this provider call.
    ToolCalls(Vec<ToolCall>),

    /// The endpoint rejected tool parameters. The agent latches into
    /// prompt mode for the rest of the session.
    UnsupportedTools,

    /// Stream is finished.
    Done { finish_reason: Option<String> },
}
