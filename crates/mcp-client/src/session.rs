//! One live MCP server session: the child process, newline-delimited
//! JSON-RPC framing, and response routing.
//!
//! A background task owns the child's stdout and completes pending requests
//! by id through oneshot channels, so concurrent callers multiplex over the
//! one pipe instead of serializing whole request/response cycles. Server
//! notifications and stray logging on stdout are dropped at debug level.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use aria_domain::config::McpServerConfig;

use crate::client::McpError;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// How long `shutdown` waits for a graceful exit before killing the child.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

pub struct McpSession {
    server_name: String,
    stdin: AsyncMutex<ChildStdin>,
    child: AsyncMutex<Child>,
    pending: PendingMap,
    reader: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl McpSession {
    /// Spawn the server process and start the stdout reader.
    pub fn spawn(config: &McpServerConfig) -> Result<Self, McpError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| broken_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| broken_pipe("stdout"))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            config.name.clone(),
            BufReader::new(stdout),
            pending.clone(),
            alive.clone(),
        ));

        Ok(Self {
            server_name: config.name.clone(),
            stdin: AsyncMutex::new(stdin),
            child: AsyncMutex::new(child),
            pending,
            reader: Mutex::new(Some(reader)),
            next_id: AtomicU64::new(1),
            alive,
            request_timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn write_line(&self, json: &str) -> Result<(), McpError> {
        if !self.is_alive() {
            return Err(McpError::ProcessExited(self.server_name.clone()));
        }
        let mut stdin = self.stdin.lock().await;
        let result = async {
            stdin.write_all(json.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = result {
            self.alive.store(false, Ordering::SeqCst);
            return Err(McpError::Io(e));
        }
        Ok(())
    }

    /// Send a request and wait for its routed response, bounded by the
    /// server's configured timeout. JSON-RPC error objects come back as
    /// [`McpError::Protocol`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let json = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(server = %self.server_name, id, method, "sending MCP request");
        if let Err(e) = self.write_line(&json).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => resp
                .into_result()
                .map_err(|e| McpError::Protocol(e.to_string())),
            // The reader dropped our sender: the process went away.
            Ok(Err(_)) => Err(McpError::ProcessExited(self.server_name.clone())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(McpError::Timeout(format!(
                    "{method} on '{}'",
                    self.server_name
                )))
            }
        }
    }

    /// Send a fire-and-forget notification.
    pub async fn notify(&self, method: &str) -> Result<(), McpError> {
        let json = serde_json::to_string(&JsonRpcNotification::new(method))?;
        tracing::debug!(server = %self.server_name, method, "sending MCP notification");
        self.write_line(&json).await
    }

    /// Stop the reader, close stdin, give the child a short grace period,
    /// then kill it. Anything still waiting on a response is failed.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing MCP server stdin");
            }
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server_name, ?status, "MCP server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.server_name, error = %e, "error waiting for MCP server");
            }
            Err(_) => {
                tracing::warn!(server = %self.server_name, "MCP server still running after grace period, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(server = %self.server_name, error = %e, "failed to kill MCP server");
                }
            }
        }
        self.pending.lock().clear();
    }
}

fn broken_pipe(which: &str) -> McpError {
    McpError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("failed to capture child {which}"),
    ))
}

/// Read stdout lines and complete the pending request they answer.
///
/// Lines that are not a routable response (notifications have no `id`,
/// misbehaving servers log to stdout) are skipped. On EOF or a read error
/// the session is marked dead and every waiter is woken with a failure.
async fn read_loop(
    server_name: String,
    mut stdout: BufReader<ChildStdout>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match stdout.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_response_line(trimmed) {
                    Some(resp) => {
                        let waiter = pending.lock().remove(&resp.id);
                        match waiter {
                            Some(waiter) => {
                                let _ = waiter.send(resp);
                            }
                            None => {
                                tracing::debug!(
                                    server = %server_name,
                                    id = resp.id,
                                    "response for no outstanding request"
                                );
                            }
                        }
                    }
                    None => {
                        tracing::debug!(server = %server_name, line = %trimmed, "ignoring non-response stdout line");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(server = %server_name, error = %e, "MCP stdout read failed");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a process-exited error.
    pending.lock().clear();
    tracing::debug!(server = %server_name, "MCP reader stopped");
}

/// Parse one stdout line as a routable JSON-RPC response.
fn parse_response_line(line: &str) -> Option<JsonRpcResponse> {
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str::<JsonRpcResponse>(line).ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn server(command: &str, args: &[&str], timeout_secs: u64) -> McpServerConfig {
        McpServerConfig {
            name: "test".into(),
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            timeout_secs,
        }
    }

    #[test]
    fn parse_response_line_accepts_responses_only() {
        assert!(parse_response_line(r#"{"jsonrpc":"2.0","id":3,"result":{}}"#).is_some());
        // Notifications have no id and are not routable.
        assert!(parse_response_line(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#)
            .is_none());
        assert!(parse_response_line("INFO starting up").is_none());
        assert!(parse_response_line("{not json").is_none());
    }

    #[tokio::test]
    async fn spawn_failure_is_an_io_error() {
        let err = match McpSession::spawn(&server("/nonexistent/mcp-server", &[], 1)) {
            Ok(_) => panic!("spawn unexpectedly succeeded"),
            Err(e) => e,
        };
        assert!(matches!(err, McpError::Io(_)));
    }

    // `cat` echoes our request line back; it parses as a response with a
    // matching id and a null result, which exercises the full write → read
    // → route path without a real MCP server.

    #[tokio::test]
    async fn echoed_request_round_trips() {
        let session = McpSession::spawn(&server("cat", &[], 2)).unwrap();
        let value = session
            .request("ping", Some(serde_json::json!({"x": 1})))
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
        assert!(session.is_alive());
        session.shutdown().await;
        assert!(!session.is_alive());
    }

    #[tokio::test]
    async fn concurrent_requests_route_by_id() {
        let session = McpSession::spawn(&server("cat", &[], 2)).unwrap();
        let (a, b) = tokio::join!(session.request("a", None), session.request("b", None));
        assert!(a.is_ok());
        assert!(b.is_ok());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // `sleep` never answers; the per-request deadline must fire.
        let session = McpSession::spawn(&server("sleep", &["30"], 1)).unwrap();
        let err = session.request("ping", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn exited_process_fails_requests() {
        let session = McpSession::spawn(&server("true", &[], 2)).unwrap();
        // Give the child a moment to exit and the reader to observe EOF.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!session.is_alive());
        let err = session.request("ping", None).await.unwrap_err();
        assert!(matches!(
            err,
            McpError::ProcessExited(_) | McpError::Io(_)
        ));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let session = McpSession::spawn(&server("cat", &[], 2)).unwrap();
        session.shutdown().await;
        session.shutdown().await;
    }
}
