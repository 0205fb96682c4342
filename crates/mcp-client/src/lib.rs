//! MCP subprocess tool host.
//!
//! Each configured tool server is a child process speaking newline-delimited
//! JSON-RPC over its stdio pair. The [`McpClient`] owns one lazy session per
//! server, caches tool listings, retries on transport loss, and always
//! returns tool failures as structured values so the agent loop can react
//! inside the conversation.

pub mod client;
pub mod protocol;
pub mod registry;
pub mod session;

pub use client::{McpClient, McpError, ToolCallOutcome};
pub use protocol::{ContentItem, McpToolDef};
pub use registry::ServerRegistry;
