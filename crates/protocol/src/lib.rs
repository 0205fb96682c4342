//! Client socket protocol: the JSON text frames exchanged with the
//! voice-assistant front-end over one persistent WebSocket.
//!
//! Every frame is a JSON object tagged by `type`. Inbound kinds cover mic
//! audio, text input, interrupts, heartbeats, history/config metadata and
//! direct tool calls; outbound kinds cover turn framing, per-sentence audio
//! payloads, wake-word state and error frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound (client → server)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Raw PCM samples appended to the per-connection receive buffer.
    #[serde(rename = "mic-audio-data")]
    MicAudioData { audio: Vec<f32> },

    /// The client-side VAD decided the utterance is over; consume the
    /// buffer as a turn input.
    #[serde(rename = "mic-audio-end")]
    MicAudioEnd,

    /// Continuous audio for the server-side VAD.
    #[serde(rename = "raw-audio-data")]
    RawAudioData { audio: Vec<f32> },

    #[serde(rename = "text-input")]
    TextInput {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        images: Option<Vec<Value>>,
    },

    /// Ask the assistant to speak proactively (synthetic prompt).
    #[serde(rename = "ai-speak-signal")]
    AiSpeakSignal,

    /// Barge-in. `text` is what the client had played back so far.
    #[serde(rename = "interrupt-signal")]
    InterruptSignal {
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "heartbeat")]
    Heartbeat,

    #[serde(rename = "fetch-history-list")]
    FetchHistoryList,

    #[serde(rename = "fetch-and-set-history")]
    FetchAndSetHistory { history_uid: String },

    #[serde(rename = "create-new-history")]
    CreateNewHistory,

    #[serde(rename = "delete-history")]
    DeleteHistory { history_uid: String },

    #[serde(rename = "fetch-configs")]
    FetchConfigs,

    #[serde(rename = "switch-config")]
    SwitchConfig { file: String },

    #[serde(rename = "fetch-backgrounds")]
    FetchBackgrounds,

    #[serde(rename = "request-init-config")]
    RequestInitConfig,

    /// Client-initiated tool invocation routed through the tool executor.
    #[serde(rename = "mcp-tool-call")]
    McpToolCall {
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },

    /// Enable/adjust/reset the per-connection adaptive VAD policy.
    #[serde(rename = "adaptive-vad-control")]
    AdaptiveVadControl {
        action: VadControlAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        volume: Option<f32>,
    },

    /// Benign front-end notifications we accept and drop.
    #[serde(rename = "audio-play-start")]
    AudioPlayStart,
    #[serde(rename = "frontend-playback-complete")]
    FrontendPlaybackComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadControlAction {
    Start,
    Adjust,
    Reset,
    Stop,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound (server → client)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "full-text")]
    FullText { text: String },

    #[serde(rename = "set-model-and-conf")]
    SetModelAndConf {
        model_info: Value,
        conf_name: String,
        conf_uid: String,
        client_uid: String,
    },

    /// Control strip: `start-mic`, `interrupt`, `mic-audio-end`,
    /// `conversation-chain-start`, `conversation-chain-end`.
    #[serde(rename = "control")]
    Control { text: String },

    #[serde(rename = "history-list")]
    HistoryList { histories: Vec<Value> },

    #[serde(rename = "history-data")]
    HistoryData { messages: Vec<Value> },

    #[serde(rename = "new-history-created")]
    NewHistoryCreated { history_uid: String },

    #[serde(rename = "history-deleted")]
    HistoryDeleted { success: bool, history_uid: String },

    #[serde(rename = "config-files")]
    ConfigFiles { configs: Vec<Value> },

    #[serde(rename = "config-switched")]
    ConfigSwitched { conf_name: String },

    #[serde(rename = "background-files")]
    BackgroundFiles { files: Vec<String> },

    #[serde(rename = "heartbeat-ack")]
    HeartbeatAck,

    #[serde(rename = "mcp-tool-response")]
    McpToolResponse {
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "wake-word-state")]
    WakeWordState {
        client_uid: String,
        /// `wake_up`, `sleep` or `ignored`.
        action: String,
        matched_word: String,
        language: String,
        current_state: String,
        stats: WakeStats,
        advertisement_control: AdvertisementControl,
    },

    /// Per-call status update from the tool executor, passed through with
    /// the character name attached.
    #[serde(rename = "tool_call_status")]
    ToolCallStatus {
        #[serde(flatten)]
        payload: Value,
    },

    /// All TTS tasks of the turn have resolved.
    #[serde(rename = "backend-synth-complete")]
    BackendSynthComplete,

    /// One synthesized sentence.
    #[serde(rename = "audio")]
    Audio {
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_text: Option<DisplayText>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        actions: Vec<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

/// On-screen form of a sentence, with speaker attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayText {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Wake-word gate statistics, echoed on every state event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeStats {
    pub wake_count: u64,
    pub end_count: u64,
    pub ignored_count: u64,
}

/// Hint for the UI's background advertisement player. Pure notification;
/// the gate does not manage the player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisementControl {
    pub should_show_ads: bool,
    pub control_action: String,
    pub trigger_reason: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
