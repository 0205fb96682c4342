//! Configuration model for the aria-server.
//!
//! The on-disk format is a single YAML document with a `system` section
//! (host/port, history switch, tool prompt mapping, MCP servers) and a
//! `character` section (persona, Live2D model, nested ASR/TTS/VAD/agent/
//! tts_preprocessor blocks). Alternate character files live under
//! `system.config_alts_dir` and are merged over the default on switch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub character: CharacterConfig,
}

impl AppConfig {
    /// Load and deserialize the YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.system.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "system.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.character.character_name.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "character.character_name".into(),
                message: "character name is empty; client labels will be blank".into(),
            });
        }

        if self.character.agent.memory_cap == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "character.agent.memory_cap".into(),
                message: "memory cap must be at least 1".into(),
            });
        }

        for server in &self.system.mcp.servers {
            if server.command.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("system.mcp.servers.{}", server.name),
                    message: "server command is empty".into(),
                });
            }
        }

        let vad = &self.character.vad;
        if vad.adaptive.min_threshold_ratio > vad.adaptive.max_threshold_ratio {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "character.vad.adaptive".into(),
                message: "min_threshold_ratio exceeds max_threshold_ratio".into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System section
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub enable_proxy: bool,
    #[serde(default = "d_true")]
    pub enable_history: bool,
    /// Directory holding alternate character config files.
    #[serde(default = "d_config_alts")]
    pub config_alts_dir: String,
    /// Directory for persisted chat histories.
    #[serde(default = "d_history_dir")]
    pub history_dir: String,
    /// Named prompt templates (`proactive_speak_prompt`, `mcp_prompt`, ...)
    /// mapped to files under the prompts directory.
    #[serde(default)]
    pub tool_prompts: HashMap<String, String>,
    #[serde(default)]
    pub media_server: MediaServerConfig,
    /// Global wake-word switch. When false every connection is treated
    /// as already active.
    #[serde(default = "d_true")]
    pub wake_word_enabled: bool,
    #[serde(default)]
    pub mcp: McpConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            enable_proxy: false,
            enable_history: true,
            config_alts_dir: d_config_alts(),
            history_dir: d_history_dir(),
            tool_prompts: HashMap::new(),
            media_server: MediaServerConfig::default(),
            wake_word_enabled: true,
            mcp: McpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_media_base")]
    pub base_url: String,
}

impl Default for MediaServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: d_media_base(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// Names of the servers the agent may use. Servers configured but not
    /// enabled are still callable via direct `mcp-tool-call` messages.
    #[serde(default)]
    pub enabled_servers: Vec<String>,
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// Spawn descriptor for one MCP tool server. Read-only after registry load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-request timeout for this server.
    #[serde(default = "d_30")]
    pub timeout_secs: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Character section
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    #[serde(default = "d_conf_name")]
    pub conf_name: String,
    #[serde(default = "d_conf_uid")]
    pub conf_uid: String,
    #[serde(default = "d_character")]
    pub character_name: String,
    #[serde(default = "d_human")]
    pub human_name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default = "d_live2d")]
    pub live2d_model_name: String,
    #[serde(default)]
    pub persona_prompt: String,
    #[serde(default)]
    pub asr: AsrConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tts_preprocessor: TtsPreprocessorConfig,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            conf_name: d_conf_name(),
            conf_uid: d_conf_uid(),
            character_name: d_character(),
            human_name: d_human(),
            avatar: String::new(),
            live2d_model_name: d_live2d(),
            persona_prompt: String::new(),
            asr: AsrConfig::default(),
            tts: TtsConfig::default(),
            vad: VadConfig::default(),
            agent: AgentConfig::default(),
            tts_preprocessor: TtsPreprocessorConfig::default(),
        }
    }
}

// ── Engine blocks ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// Engine kind tag resolved through the engine registry.
    #[serde(default = "d_asr_kind")]
    pub kind: String,
    #[serde(default = "d_openai_base")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_whisper_model")]
    pub model: String,
    #[serde(default)]
    pub language: Option<String>,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            kind: d_asr_kind(),
            base_url: d_openai_base(),
            api_key: String::new(),
            model: d_whisper_model(),
            language: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "d_tts_kind")]
    pub kind: String,
    #[serde(default = "d_openai_base")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_tts_model")]
    pub model: String,
    #[serde(default = "d_voice")]
    pub voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            kind: d_tts_kind(),
            base_url: d_openai_base(),
            api_key: String::new(),
            model: d_tts_model(),
            voice: d_voice(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "d_vad_kind")]
    pub kind: String,
    /// Base speech-probability threshold.
    #[serde(default = "d_prob")]
    pub prob_threshold: f32,
    /// Base decibel gate.
    #[serde(default = "d_db")]
    pub db_threshold: i32,
    #[serde(default = "d_hits")]
    pub required_hits: u32,
    #[serde(default = "d_misses")]
    pub required_misses: u32,
    #[serde(default)]
    pub adaptive: AdaptiveVadConfig,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            kind: d_vad_kind(),
            prob_threshold: 0.55,
            db_threshold: 65,
            required_hits: 3,
            required_misses: 24,
            adaptive: AdaptiveVadConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveVadConfig {
    #[serde(default = "d_factor")]
    pub adaptive_factor: f32,
    #[serde(default = "d_min_ratio")]
    pub min_threshold_ratio: f32,
    #[serde(default = "d_max_ratio")]
    pub max_threshold_ratio: f32,
}

impl Default for AdaptiveVadConfig {
    fn default() -> Self {
        Self {
            adaptive_factor: 1.5,
            min_threshold_ratio: 0.7,
            max_threshold_ratio: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_provider_kind")]
    pub provider_kind: String,
    #[serde(default = "d_openai_base")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_llm_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Emit the first sentence at the first terminal punctuation to cut
    /// time-to-audio on the opening utterance.
    #[serde(default = "d_true")]
    pub faster_first_response: bool,
    /// Sentence segmentation strategy: `regex` or `rule`.
    #[serde(default = "d_segment")]
    pub segment_method: String,
    /// Role used for the `[Interrupted by user]` memory marker.
    #[serde(default)]
    pub interrupt_method: InterruptMethod,
    /// Whether MCP tools are wired into the agent at all.
    #[serde(default = "d_true")]
    pub use_tools: bool,
    /// In-memory conversation window, in messages.
    #[serde(default = "d_memory_cap")]
    pub memory_cap: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider_kind: d_provider_kind(),
            base_url: d_openai_base(),
            api_key: String::new(),
            model: d_llm_model(),
            temperature: None,
            max_tokens: None,
            faster_first_response: true,
            segment_method: d_segment(),
            interrupt_method: InterruptMethod::default(),
            use_tools: true,
            memory_cap: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterruptMethod {
    System,
    #[default]
    User,
}

/// Boolean policy set for the TTS text filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsPreprocessorConfig {
    #[serde(default = "d_true")]
    pub remove_special_char: bool,
    #[serde(default = "d_true")]
    pub ignore_brackets: bool,
    #[serde(default = "d_true")]
    pub ignore_parentheses: bool,
    #[serde(default = "d_true")]
    pub ignore_asterisks: bool,
    #[serde(default = "d_true")]
    pub ignore_angle_brackets: bool,
    #[serde(default)]
    pub ignore_hyphens: bool,
    #[serde(default)]
    pub ignore_slashes: bool,
}

impl Default for TtsPreprocessorConfig {
    fn default() -> Self {
        Self {
            remove_special_char: true,
            ignore_brackets: true,
            ignore_parentheses: true,
            ignore_asterisks: true,
            ignore_angle_brackets: true,
            ignore_hyphens: false,
            ignore_slashes: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    12393
}
fn d_true() -> bool {
    true
}
fn d_30() -> u64 {
    30
}
fn d_config_alts() -> String {
    "characters".into()
}
fn d_history_dir() -> String {
    "chat_history".into()
}
fn d_media_base() -> String {
    "http://127.0.0.1:8080".into()
}
fn d_conf_name() -> String {
    "default".into()
}
fn d_conf_uid() -> String {
    "default-001".into()
}
fn d_character() -> String {
    "Aria".into()
}
fn d_human() -> String {
    "Human".into()
}
fn d_live2d() -> String {
    "aria".into()
}
fn d_asr_kind() -> String {
    "openai_whisper".into()
}
fn d_tts_kind() -> String {
    "openai_tts".into()
}
fn d_vad_kind() -> String {
    "energy".into()
}
fn d_openai_base() -> String {
    "https://api.openai.com/v1".into()
}
fn d_whisper_model() -> String {
    "whisper-1".into()
}
fn d_tts_model() -> String {
    "tts-1".into()
}
fn d_voice() -> String {
    "alloy".into()
}
fn d_provider_kind() -> String {
    "openai_compat".into()
}
fn d_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn d_segment() -> String {
    "rule".into()
}
fn d_memory_cap() -> usize {
    6
}
fn d_prob() -> f32 {
    0.55
}
fn d_db() -> i32 {
    65
}
fn d_hits() -> u32 {
    3
}
fn d_misses() -> u32 {
    24
}
fn d_factor() -> f32 {
    1.5
}
fn d_min_ratio() -> f32 {
    0.7
}
fn d_max_ratio() -> f32 {
    2.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
