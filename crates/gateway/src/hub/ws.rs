//! Client WebSocket endpoint.
//!
//! One socket per client. On accept the connection gets its own service
//! context cloned from the default template; the reader loop then routes
//! typed messages one at a time (handlers within a connection are
//! serialized, connections run concurrently). Malformed frames cost an
//! `error` message, never the connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use aria_domain::chat::{ChatMessage, Role};
use aria_domain::tool::{CallerMode, ToolCall};
use aria_protocol::{ClientMessage, ServerMessage, VadControlAction};

use aria_agent::executor::ExecutorEvent;
use aria_engines::VadEvent;

use crate::context::{load_alt_config, ContextTemplate, ServiceContext, MODEL_DICT_PATH};
use crate::hub::{Outbound, OutboundMessage};
use crate::live2d::Live2dModel;
use crate::state::{AppState, ConnectionHandle};
use crate::turn::{run_turn, TurnInput, TurnParams};

/// Server-side VAD utterances shorter than this are treated as noise.
const MIN_VAD_UTTERANCE_SAMPLES: usize = 1024;

/// GET /client-ws: upgrade to the client socket.
pub async fn client_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_uid = Uuid::new_v4();
    let (mut ws_sink, mut ws_stream) = socket.split();

    let context = match ServiceContext::from_template(&state.template, &client_uid.to_string()) {
        Ok(context) => context,
        Err(e) => {
            tracing::error!(client_uid = %client_uid, error = %e, "failed to build service context");
            let _ = ws_sink.close().await;
            return;
        }
    };

    let (tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(64);
    let outbound = Outbound::new(tx);
    let handle = ConnectionHandle::new(client_uid, outbound.clone());
    state.connections.register(handle.clone());

    // Writer task: serializes frames and owns the sink.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match &message {
                OutboundMessage::Typed(m) => serde_json::to_string(m),
                OutboundMessage::Raw(v) => serde_json::to_string(v),
            };
            match json {
                Ok(text) => {
                    if ws_sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to serialize outbound frame"),
            }
        }
    });

    let mut conn = ConnectionState {
        client_uid,
        state: state.clone(),
        outbound: outbound.clone(),
        context: Arc::new(RwLock::new(context)),
        buffer: Vec::new(),
        switch_token: None,
        handle: handle.clone(),
    };

    conn.send_initial_messages().await;
    tracing::info!(
        client_uid = %client_uid,
        active = state.connections.len(),
        "connection established"
    );

    loop {
        tokio::select! {
            biased;
            _ = handle.shutdown.cancelled() => {
                tracing::info!(client_uid = %client_uid, "connection force-disconnected");
                break;
            }
            message = ws_stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => conn.handle_message(message).await,
                        Err(e) => {
                            tracing::warn!(client_uid = %client_uid, error = %e, "malformed client message");
                            conn.outbound
                                .send(ServerMessage::Error {
                                    message: format!("Invalid message: {e}"),
                                })
                                .await;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // axum answers WS-level ping/pong itself.
                }
                Some(Err(e)) => {
                    tracing::warn!(client_uid = %client_uid, error = %e, "socket read error");
                    break;
                }
            }
        }
    }

    // Cleanup order matters: turn first, then the context, then the map.
    state.turns.cancel_and_wait(client_uid).await;
    let context = conn.ctx();
    context.close().await;
    state.connections.remove(client_uid);
    writer.abort();
    tracing::info!(
        client_uid = %client_uid,
        active = state.connections.len(),
        "client disconnected"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-connection state and handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ConnectionState {
    client_uid: Uuid,
    state: AppState,
    outbound: Outbound,
    /// Swapped by config switches; turns snapshot it at start.
    context: Arc<RwLock<Arc<ServiceContext>>>,
    /// PCM receive buffer; reset when a turn consumes it.
    buffer: Vec<f32>,
    /// Cancels a pending heavy re-initialization when a newer switch lands.
    switch_token: Option<CancellationToken>,
    handle: Arc<ConnectionHandle>,
}

impl ConnectionState {
    fn ctx(&self) -> Arc<ServiceContext> {
        self.context.read().clone()
    }

    async fn send_initial_messages(&self) {
        self.outbound
            .send(ServerMessage::FullText {
                text: "Connection established".into(),
            })
            .await;
        self.send_model_and_conf().await;
        self.outbound
            .send(ServerMessage::Control {
                text: "start-mic".into(),
            })
            .await;
    }

    async fn send_model_and_conf(&self) {
        let ctx = self.ctx();
        self.outbound
            .send(ServerMessage::SetModelAndConf {
                model_info: ctx.live2d.model_info.clone(),
                conf_name: ctx.config.character.conf_name.clone(),
                conf_uid: ctx.config.character.conf_uid.clone(),
                client_uid: self.client_uid.to_string(),
            })
            .await;
    }

    async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::MicAudioData { audio } => {
                self.buffer.extend_from_slice(&audio);
            }
            ClientMessage::MicAudioEnd => {
                let samples = std::mem::take(&mut self.buffer);
                if samples.is_empty() {
                    tracing::debug!(client_uid = %self.client_uid, "mic-audio-end with empty buffer");
                    return;
                }
                self.start_turn(TurnInput::Audio(samples)).await;
            }
            ClientMessage::RawAudioData { audio } => {
                self.handle_raw_audio(&audio).await;
            }
            ClientMessage::TextInput { text, images } => {
                self.start_turn(TurnInput::Text {
                    text,
                    images: images.unwrap_or_default(),
                })
                .await;
            }
            ClientMessage::AiSpeakSignal => {
                self.outbound
                    .send(ServerMessage::FullText {
                        text: "AI wants to speak something...".into(),
                    })
                    .await;
                self.start_turn(TurnInput::ProactiveSpeak).await;
            }
            ClientMessage::InterruptSignal { text } => {
                self.handle_interrupt(&text).await;
            }
            ClientMessage::Heartbeat => {
                self.handle.touch();
                self.outbound.send(ServerMessage::HeartbeatAck).await;
            }
            ClientMessage::FetchHistoryList => self.handle_fetch_history_list().await,
            ClientMessage::FetchAndSetHistory { history_uid } => {
                self.handle_fetch_and_set_history(history_uid).await;
            }
            ClientMessage::CreateNewHistory => self.handle_create_history().await,
            ClientMessage::DeleteHistory { history_uid } => {
                self.handle_delete_history(history_uid).await;
            }
            ClientMessage::FetchConfigs => self.handle_fetch_configs().await,
            ClientMessage::SwitchConfig { file } => self.handle_config_switch(file).await,
            ClientMessage::FetchBackgrounds => self.handle_fetch_backgrounds().await,
            ClientMessage::RequestInitConfig => self.send_model_and_conf().await,
            ClientMessage::McpToolCall {
                tool_name,
                arguments,
            } => self.handle_mcp_tool_call(tool_name, arguments).await,
            ClientMessage::AdaptiveVadControl { action, volume } => {
                self.handle_vad_control(action, volume);
            }
            ClientMessage::AudioPlayStart | ClientMessage::FrontendPlaybackComplete => {
                // Benign front-end notifications.
            }
        }
    }

    // ── Turns ─────────────────────────────────────────────────────

    async fn start_turn(&self, input: TurnInput) {
        let ticket = self.state.turns.begin(self.client_uid).await;
        let params = TurnParams {
            context: self.ctx(),
            outbound: self.outbound.clone(),
            client_uid: self.client_uid,
            history: self.state.history.clone(),
            ticket: ticket.clone(),
        };

        let turns = self.state.turns.clone();
        let client_uid = self.client_uid;
        let seq = ticket.seq;
        let task = tokio::spawn(async move {
            run_turn(params, input).await;
            turns.finish(client_uid, seq);
        });
        self.state.turns.attach(client_uid, seq, task);
    }

    async fn handle_interrupt(&self, heard_response: &str) {
        if self.state.turns.cancel(self.client_uid) {
            tracing::info!(client_uid = %self.client_uid, "conversation turn interrupted by client");
        } else {
            tracing::debug!(client_uid = %self.client_uid, "interrupt with no active turn");
        }

        let ctx = self.ctx();
        ctx.agent.handle_interrupt(heard_response);

        let history_uid = ctx.history_uid.lock().clone();
        if let (true, Some(history_uid)) = (ctx.config.system.enable_history, history_uid) {
            let character = &ctx.config.character;
            let avatar = (!character.avatar.is_empty()).then_some(character.avatar.as_str());
            if let Err(e) = self.state.history.store_message(
                &character.conf_uid,
                &history_uid,
                "ai",
                heard_response,
                Some(&character.character_name),
                avatar,
            ) {
                tracing::warn!(error = %e, "failed to persist interrupted reply");
            }
            if let Err(e) = self.state.history.store_message(
                &character.conf_uid,
                &history_uid,
                "system",
                "[Interrupted by user]",
                None,
                None,
            ) {
                tracing::warn!(error = %e, "failed to persist interrupt marker");
            }
        }
    }

    // ── Server-side VAD ───────────────────────────────────────────

    async fn handle_raw_audio(&mut self, chunk: &[f32]) {
        let ctx = self.ctx();
        for event in ctx.vad.detect_speech(chunk) {
            match event {
                VadEvent::SpeechStart => {
                    self.outbound
                        .send(ServerMessage::Control {
                            text: "interrupt".into(),
                        })
                        .await;
                }
                VadEvent::SpeechEnd(samples) => {
                    if samples.len() > MIN_VAD_UTTERANCE_SAMPLES {
                        tracing::debug!(
                            client_uid = %self.client_uid,
                            samples = samples.len(),
                            "server-side VAD captured speech, buffering"
                        );
                        // The client-side VAD stays the single turn trigger;
                        // we only accumulate here.
                        self.buffer.extend_from_slice(&samples);
                    }
                }
            }
        }
    }

    fn handle_vad_control(&self, action: VadControlAction, volume: Option<f32>) {
        let ctx = self.ctx();
        match action {
            VadControlAction::Start | VadControlAction::Adjust => {
                ctx.adaptive_vad.playback_started(volume.unwrap_or(0.5));
            }
            VadControlAction::Stop => ctx.adaptive_vad.playback_stopped(),
            VadControlAction::Reset => ctx.adaptive_vad.reset(),
        }
    }

    // ── History ───────────────────────────────────────────────────

    async fn handle_fetch_history_list(&self) {
        let ctx = self.ctx();
        let histories = if ctx.config.system.enable_history {
            self.state
                .history
                .get_history_list(&ctx.config.character.conf_uid)
        } else {
            Vec::new()
        };
        self.outbound
            .send(ServerMessage::HistoryList { histories })
            .await;
    }

    async fn handle_fetch_and_set_history(&self, history_uid: String) {
        if history_uid.is_empty() {
            return;
        }
        let ctx = self.ctx();
        if !ctx.config.system.enable_history {
            *ctx.history_uid.lock() = None;
            self.outbound
                .send(ServerMessage::HistoryData {
                    messages: Vec::new(),
                })
                .await;
            return;
        }

        *ctx.history_uid.lock() = Some(history_uid.clone());

        let messages = self
            .state
            .history
            .get_history(&ctx.config.character.conf_uid, &history_uid);

        // Seed agent memory from the persisted conversation.
        let memory: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| {
                let role = if m.role == "human" {
                    Role::User
                } else {
                    Role::Assistant
                };
                ChatMessage {
                    role,
                    content: m.content.clone(),
                    name: m.name.clone(),
                    avatar: m.avatar.clone(),
                    tool_calls: None,
                    tool_call_id: None,
                }
            })
            .collect();
        ctx.agent.set_memory_from_history(memory);

        let payload = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect();
        self.outbound
            .send(ServerMessage::HistoryData { messages: payload })
            .await;
    }

    async fn handle_create_history(&self) {
        let ctx = self.ctx();
        if !ctx.config.system.enable_history {
            self.outbound
                .send(ServerMessage::NewHistoryCreated {
                    history_uid: String::new(),
                })
                .await;
            return;
        }

        match self
            .state
            .history
            .create_new_history(&ctx.config.character.conf_uid)
        {
            Ok(history_uid) => {
                *ctx.history_uid.lock() = Some(history_uid.clone());
                ctx.agent.set_memory_from_history(Vec::new());
                self.outbound
                    .send(ServerMessage::NewHistoryCreated { history_uid })
                    .await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to create history");
                self.outbound
                    .send(ServerMessage::Error {
                        message: format!("Failed to create history: {e}"),
                    })
                    .await;
            }
        }
    }

    async fn handle_delete_history(&self, history_uid: String) {
        if history_uid.is_empty() {
            return;
        }
        let ctx = self.ctx();
        let success = if ctx.config.system.enable_history {
            self.state
                .history
                .delete_history(&ctx.config.character.conf_uid, &history_uid)
        } else {
            // With history disabled, deletion is trivially satisfied.
            true
        };

        {
            let mut current = ctx.history_uid.lock();
            if current.as_deref() == Some(history_uid.as_str()) {
                *current = None;
            }
        }
        self.outbound
            .send(ServerMessage::HistoryDeleted {
                success,
                history_uid,
            })
            .await;
    }

    // ── Config ────────────────────────────────────────────────────

    async fn handle_fetch_configs(&self) {
        let ctx = self.ctx();
        let configs = scan_config_alts(&ctx.config.system.config_alts_dir);
        self.outbound
            .send(ServerMessage::ConfigFiles { configs })
            .await;
    }

    /// Config switch: swap the Live2D model and notify immediately, then
    /// rebuild the heavy engines on a cancellable background task. A newer
    /// switch cancels the pending one; a failed rebuild leaves the previous
    /// context in place.
    async fn handle_config_switch(&mut self, file: String) {
        let current = self.ctx();
        let alt = match load_alt_config(&current.config, &file) {
            Ok(alt) => alt,
            Err(e) => {
                tracing::error!(file = %file, error = %e, "config switch aborted");
                self.outbound
                    .send(ServerMessage::Error {
                        message: format!("Failed to switch to config '{file}': {e}"),
                    })
                    .await;
                return;
            }
        };

        // Fast path: model swap + notification.
        let live2d = Live2dModel::load(&alt.character.live2d_model_name, MODEL_DICT_PATH);
        self.outbound
            .send(ServerMessage::SetModelAndConf {
                model_info: live2d.model_info.clone(),
                conf_name: alt.character.conf_name.clone(),
                conf_uid: alt.character.conf_uid.clone(),
                client_uid: self.client_uid.to_string(),
            })
            .await;
        self.outbound
            .send(ServerMessage::ConfigSwitched {
                conf_name: alt.character.conf_name.clone(),
            })
            .await;

        // Heavy re-initialization, superseded by any newer switch.
        if let Some(previous) = self.switch_token.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.switch_token = Some(token.clone());

        let slot = self.context.clone();
        let outbound = self.outbound.clone();
        let client_uid = self.client_uid.to_string();
        let conf_name = alt.character.conf_name.clone();
        let task = tokio::spawn(async move {
            let init = async {
                let template = ContextTemplate::initialize(alt).await?;
                ServiceContext::from_template(&template, &client_uid)
            };
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!(conf_name = %conf_name, "pending config switch superseded");
                }
                result = init => match result {
                    Ok(new_context) => {
                        let old = {
                            let mut guard = slot.write();
                            std::mem::replace(&mut *guard, new_context)
                        };
                        old.close().await;
                        tracing::info!(conf_name = %conf_name, "config switch completed");
                    }
                    Err(e) => {
                        tracing::error!(conf_name = %conf_name, error = %e, "config switch failed, keeping previous context");
                        outbound
                            .send(ServerMessage::Error {
                                message: format!("Failed to switch to config '{conf_name}': {e}"),
                            })
                            .await;
                    }
                }
            }
        });
        current.track_task(task);
    }

    async fn handle_fetch_backgrounds(&self) {
        let files = scan_backgrounds("backgrounds");
        self.outbound
            .send(ServerMessage::BackgroundFiles { files })
            .await;
    }

    // ── Direct tool calls ─────────────────────────────────────────

    async fn handle_mcp_tool_call(&self, tool_name: String, arguments: Value) {
        if tool_name.is_empty() {
            self.outbound
                .send(ServerMessage::McpToolResponse {
                    tool_name: None,
                    result: None,
                    error: Some("Missing tool_name".into()),
                })
                .await;
            return;
        }

        let ctx = self.ctx();
        let Some(executor) = ctx.executor.clone() else {
            self.outbound
                .send(ServerMessage::McpToolResponse {
                    tool_name: Some(tool_name),
                    result: None,
                    error: Some("MCP tool executor not available".into()),
                })
                .await;
            return;
        };

        tracing::info!(client_uid = %self.client_uid, tool = %tool_name, "direct MCP tool call");
        let call = ToolCall {
            id: format!("ws_{}_{}", tool_name, Uuid::new_v4().simple()),
            name: tool_name.clone(),
            arguments,
        };

        let mut stream = executor.execute_tools(vec![call], CallerMode::Prompt);
        let mut final_results = None;
        while let Some(event) = stream.next().await {
            if let ExecutorEvent::FinalResults(results) = event {
                final_results = Some(results);
                break;
            }
        }

        let result = final_results
            .map(|results| serde_json::to_value(results).unwrap_or(Value::Null))
            .unwrap_or(Value::Null);
        self.outbound
            .send(ServerMessage::McpToolResponse {
                tool_name: Some(tool_name),
                result: Some(result),
                error: None,
            })
            .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory scanning helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Alternate character files with their display names.
fn scan_config_alts(dir: &str) -> Vec<Value> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut configs: Vec<Value> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let ext = path.extension()?.to_str()?;
            if ext != "yaml" && ext != "yml" {
                return None;
            }
            let filename = path.file_name()?.to_str()?.to_string();
            let name = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_yaml::from_str::<aria_domain::config::AppConfig>(&raw).ok())
                .map(|c| c.character.conf_name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| filename.trim_end_matches(&format!(".{ext}")).to_string());
            Some(serde_json::json!({ "filename": filename, "name": name }))
        })
        .collect();
    configs.sort_by(|a, b| a["filename"].as_str().cmp(&b["filename"].as_str()));
    configs
}

fn scan_backgrounds(dir: &str) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let ext = path.extension()?.to_str()?.to_lowercase();
            if matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "gif" | "webp") {
                path.file_name()?.to_str().map(str::to_string)
            } else {
                None
            }
        })
        .collect();
    files.sort();
    files
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_config_alts_reads_conf_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nova.yaml"),
            "character:\n  conf_name: Nova\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a config").unwrap();
        std::fs::write(dir.path().join("broken.yaml"), ": not yaml :").unwrap();

        let configs = scan_config_alts(dir.path().to_str().unwrap());
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0]["filename"], "broken.yaml");
        assert_eq!(configs[0]["name"], "broken");
        assert_eq!(configs[1]["name"], "Nova");
    }

    #[test]
    fn scan_config_alts_missing_dir_is_empty() {
        assert!(scan_config_alts("/nonexistent/path").is_empty());
    }

    #[test]
    fn scan_backgrounds_filters_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("c.JPG"), b"x").unwrap();

        let files = scan_backgrounds(dir.path().to_str().unwrap());
        assert_eq!(files, vec!["a.png".to_string(), "c.JPG".to_string()]);
    }
}
