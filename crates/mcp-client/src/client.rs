//! The MCP client: one long-lived subprocess per named tool server.
//!
//! Sessions are lazy and survive turns; the tool-listing cache is evicted
//! atomically with its session whenever the transport fails. `call_tool`
//! never raises; failures come back as structured error content so the
//! agent can keep the conversation going.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::protocol::{self, ContentItem, McpToolDef, ToolCallResult, ToolsListResult};
use crate::registry::ServerRegistry;
use crate::session::McpSession;

/// Bound on spawn + initialize handshake for a new session.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts for `tools/list` before giving up.
const LIST_TOOLS_RETRIES: u32 = 3;

/// Errors specific to MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP server '{0}' exited")]
    ProcessExited(String),

    #[error("timeout waiting for MCP response: {0}")]
    Timeout(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    #[error("timeout starting MCP server '{0}'")]
    StartupTimeout(String),

    #[error("MCP client is closed")]
    Closed,
}

/// Structured result of a tool invocation.
///
/// Errors are content, not exceptions: a failed call yields a single
/// `error` item so the caller can feed it straight back to the model.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub content: Vec<ContentItem>,
    pub is_error: bool,
}

impl ToolCallOutcome {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::error(text)],
            is_error: true,
        }
    }

    /// Join all textual content into one string.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|item| !item.text.is_empty())
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Sessions and the tool-listing cache live behind one lock so that a
/// failure evicts both atomically.
#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<McpSession>>,
    tool_cache: HashMap<String, Vec<McpToolDef>>,
}

pub struct McpClient {
    registry: Arc<ServerRegistry>,
    inner: Mutex<Inner>,
    closed: AtomicBool,
}

impl McpClient {
    pub fn new(registry: Arc<ServerRegistry>) -> Self {
        Self {
            registry,
            inner: Mutex::new(Inner::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Best-effort pre-listing on every enabled server to front-load the
    /// spawn cost. Failures are logged and ignored.
    pub async fn warm_up(&self) {
        for name in self.registry.enabled().to_vec() {
            match self.list_tools(&name).await {
                Ok(tools) => {
                    tracing::info!(server = %name, tool_count = tools.len(), "MCP server warmed up");
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "MCP warm-up failed, ignoring");
                }
            }
        }
    }

    /// Get the existing session or spawn + initialize a new one.
    ///
    /// Startup (spawn, `initialize`, `notifications/initialized`) is bounded
    /// by [`STARTUP_TIMEOUT`]; a timed-out attempt leaves no zombie session.
    async fn ensure_session(
        &self,
        inner: &mut Inner,
        server_name: &str,
    ) -> Result<Arc<McpSession>, McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed);
        }

        if let Some(session) = inner.sessions.get(server_name) {
            if session.is_alive() {
                return Ok(session.clone());
            }
            // Stale handle from a crashed process.
            inner.sessions.remove(server_name);
            inner.tool_cache.remove(server_name);
        }

        let config = self
            .registry
            .get(server_name)
            .ok_or_else(|| McpError::ServerNotFound(server_name.to_string()))?;

        tracing::info!(server = %server_name, command = %config.command, "starting MCP server");
        let session = Arc::new(McpSession::spawn(config)?);

        let handshake = async {
            let params = serde_json::to_value(protocol::initialize_params())?;
            session.request("initialize", Some(params)).await?;
            session.notify("notifications/initialized").await?;
            Ok::<(), McpError>(())
        };

        match tokio::time::timeout(STARTUP_TIMEOUT, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                session.shutdown().await;
                return Err(e);
            }
            Err(_) => {
                tracing::error!(server = %server_name, "timeout starting MCP server");
                session.shutdown().await;
                return Err(McpError::StartupTimeout(server_name.to_string()));
            }
        }

        tracing::info!(server = %server_name, "MCP server session established");
        inner
            .sessions
            .insert(server_name.to_string(), session.clone());
        Ok(session)
    }

    /// Drop the session and its listing cache entry together.
    async fn evict_session(inner: &mut Inner, server_name: &str) {
        inner.tool_cache.remove(server_name);
        if let Some(session) = inner.sessions.remove(server_name) {
            session.shutdown().await;
        }
    }

    /// List tools on a server. Memoized per server; a cache miss retries up
    /// to three times with progressive backoff, evicting the session after
    /// each failure.
    pub async fn list_tools(&self, server_name: &str) -> Result<Vec<McpToolDef>, McpError> {
        let mut inner = self.inner.lock().await;

        if let Some(tools) = inner.tool_cache.get(server_name) {
            tracing::debug!(server = %server_name, "list_tools cache hit");
            return Ok(tools.clone());
        }

        let mut last_error = McpError::Protocol("no attempts made".into());
        for attempt in 1..=LIST_TOOLS_RETRIES {
            let result = async {
                let session = self.ensure_session(&mut inner, server_name).await?;
                let value = session.request("tools/list", None).await?;
                serde_json::from_value::<ToolsListResult>(value)
                    .map_err(|e| McpError::Protocol(format!("parse tools/list result: {e}")))
            }
            .await;

            match result {
                Ok(listing) => {
                    inner
                        .tool_cache
                        .insert(server_name.to_string(), listing.tools.clone());
                    return Ok(listing.tools);
                }
                Err(e) => {
                    tracing::warn!(
                        server = %server_name,
                        attempt,
                        error = %e,
                        "list_tools failed"
                    );
                    Self::evict_session(&mut inner, server_name).await;
                    // Unknown servers won't appear on retry.
                    if matches!(e, McpError::ServerNotFound(_) | McpError::Closed) {
                        return Err(e);
                    }
                    last_error = e;
                    if attempt < LIST_TOOLS_RETRIES {
                        tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Call a tool. One attempt, plus one reconnect-and-retry after a
    /// transport loss. Always returns a structured outcome.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Value,
    ) -> ToolCallOutcome {
        tracing::info!(server = %server_name, tool = %tool_name, "calling MCP tool");
        let mut inner = self.inner.lock().await;

        let mut last_error: Option<McpError> = None;
        for attempt in 1..=2 {
            let result = async {
                let session = self.ensure_session(&mut inner, server_name).await?;
                let params = serde_json::json!({
                    "name": tool_name,
                    "arguments": arguments,
                });
                let value = session.request("tools/call", Some(params)).await?;
                serde_json::from_value::<ToolCallResult>(value)
                    .map_err(|e| McpError::Protocol(format!("parse tools/call result: {e}")))
            }
            .await;

            match result {
                Ok(result) => {
                    if result.is_error {
                        let text = result
                            .content
                            .first()
                            .map(|item| item.text.clone())
                            .filter(|t| !t.is_empty())
                            .unwrap_or_else(|| "Unknown server error".into());
                        tracing::error!(server = %server_name, tool = %tool_name, error = %text, "tool returned error");
                        return ToolCallOutcome::error(text);
                    }
                    let mut content = result.content;
                    if content.is_empty() {
                        tracing::warn!(tool = %tool_name, "tool returned no content");
                        content.push(ContentItem::text(""));
                    }
                    return ToolCallOutcome {
                        content,
                        is_error: false,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        server = %server_name,
                        tool = %tool_name,
                        attempt,
                        error = %e,
                        "tool call failed"
                    );
                    Self::evict_session(&mut inner, server_name).await;
                    if matches!(e, McpError::ServerNotFound(_) | McpError::Closed) {
                        return ToolCallOutcome::error(e.to_string());
                    }
                    last_error = Some(e);
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "tool call failed".into());
        tracing::error!(server = %server_name, tool = %tool_name, error = %message, "tool call failed after retry");
        ToolCallOutcome::error(message)
    }

    /// Close every active session and clear caches.
    ///
    /// Idempotent; never raises. Each session gets its short grace period
    /// before a kill.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut inner = self.inner.lock().await;
        let sessions = std::mem::take(&mut inner.sessions);
        inner.tool_cache.clear();
        drop(inner);

        if sessions.is_empty() {
            return;
        }

        tracing::info!(count = sessions.len(), "closing MCP client sessions");
        let shutdowns = sessions
            .into_iter()
            .map(|(name, session)| async move {
                session.shutdown().await;
                tracing::debug!(server = %name, "MCP session closed");
            })
            .collect::<Vec<_>>();
        futures_util::future::join_all(shutdowns).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use aria_domain::config::{McpConfig, McpServerConfig};

    fn registry_with(servers: Vec<McpServerConfig>, enabled: Vec<String>) -> Arc<ServerRegistry> {
        Arc::new(ServerRegistry::from_config(&McpConfig {
            enabled_servers: enabled,
            servers,
        }))
    }

    fn broken_server(name: &str) -> McpServerConfig {
        McpServerConfig {
            name: name.into(),
            command: "/nonexistent/mcp-server-binary".into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn call_tool_unknown_server_returns_structured_error() {
        let client = McpClient::new(registry_with(Vec::new(), Vec::new()));
        let outcome = client
            .call_tool("ghost", "anything", serde_json::json!({}))
            .await;
        assert!(outcome.is_error);
        assert_eq!(outcome.content[0].kind, "error");
        assert!(outcome.text().contains("ghost"));
    }

    #[tokio::test]
    async fn call_tool_spawn_failure_returns_structured_error() {
        let client = McpClient::new(registry_with(
            vec![broken_server("broken")],
            vec!["broken".into()],
        ));
        let outcome = client
            .call_tool("broken", "anything", serde_json::json!({}))
            .await;
        assert!(outcome.is_error);
        assert!(!outcome.text().is_empty());
    }

    #[tokio::test]
    async fn list_tools_unknown_server_errors_without_retry_loop() {
        let client = McpClient::new(registry_with(Vec::new(), Vec::new()));
        let err = client.list_tools("ghost").await.unwrap_err();
        assert!(matches!(err, McpError::ServerNotFound(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = McpClient::new(registry_with(Vec::new(), Vec::new()));
        client.close().await;
        client.close().await;

        // After close, calls surface the closed state as structured errors.
        let outcome = client.call_tool("any", "tool", serde_json::json!({})).await;
        assert!(outcome.is_error);
    }

    #[tokio::test]
    async fn warm_up_swallows_failures() {
        let client = McpClient::new(registry_with(
            vec![broken_server("broken")],
            vec!["broken".into()],
        ));
        // Must not panic or return an error.
        client.warm_up().await;
    }

    #[test]
    fn outcome_text_joins_text_items() {
        let outcome = ToolCallOutcome {
            content: vec![
                ContentItem::text("line one"),
                ContentItem {
                    kind: "image".into(),
                    text: String::new(),
                    data: Some("aGk=".into()),
                    mime_type: Some("image/png".into()),
                    url: None,
                },
                ContentItem::text("line two"),
            ],
            is_error: false,
        };
        assert_eq!(outcome.text(), "line one\nline two");
    }
}
