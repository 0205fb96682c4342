//! Per-connection service context: a config snapshot bound to engine
//! instances, the agent, and MCP state.
//!
//! The server builds one [`ContextTemplate`] at startup (paying engine
//! construction and MCP tool discovery once); every connection then gets a
//! cheap [`ServiceContext`] cloned from it. ASR/TTS are shared references;
//! the VAD, agent (it owns mutable memory), MCP client and wake gate are
//! per connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use aria_agent::openai::OpenAiCompatProvider;
use aria_agent::{StreamingAgent, ToolExecutor};
use aria_domain::config::AppConfig;
use aria_domain::tool::ToolDefinition;
use aria_domain::{Error, Result};
use aria_engines::{build_asr, build_tts, build_vad, AdaptiveVad, AsrEngine, TtsEngine, VadEngine};
use aria_mcp_client::{McpClient, ServerRegistry};

use crate::live2d::Live2dModel;
use crate::prompts::{build_mcp_prompt, PromptRegistry};
use crate::wake::WakeWordGate;

/// How long `close` waits for the MCP client before giving up.
const MCP_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the Live2D model dictionary lives.
pub(crate) const MODEL_DICT_PATH: &str = "model_dict.json";

/// Where prompt template files live.
const PROMPTS_DIR: &str = "prompts";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Template
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Startup-built state shared by every connection.
pub struct ContextTemplate {
    pub config: AppConfig,
    pub live2d: Live2dModel,
    pub asr: Arc<dyn AsrEngine>,
    pub tts: Arc<dyn TtsEngine>,
    pub registry: Arc<ServerRegistry>,
    pub tool_servers: HashMap<String, String>,
    pub tool_defs: Vec<ToolDefinition>,
    pub mcp_prompt: String,
}

impl ContextTemplate {
    /// Build engines and discover MCP tools for a config.
    ///
    /// Discovery runs against a throwaway client so the spawn cost is paid
    /// here instead of on the first turn of the first connection.
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        let asr = build_asr(&config.character.asr)
            .map_err(|e| Error::Context(format!("ASR init failed: {e}")))?;
        let tts = build_tts(&config.character.tts)
            .map_err(|e| Error::Context(format!("TTS init failed: {e}")))?;
        let live2d = Live2dModel::load(&config.character.live2d_model_name, MODEL_DICT_PATH);

        let registry = Arc::new(ServerRegistry::from_config(&config.system.mcp));
        let (tool_servers, tool_defs) =
            if config.character.agent.use_tools && !registry.enabled().is_empty() {
                let mcp = Arc::new(McpClient::new(registry.clone()));
                let executor = ToolExecutor::discover(mcp.clone(), registry.enabled()).await;
                let discovered = (
                    executor.tool_servers().clone(),
                    executor.definitions().to_vec(),
                );
                mcp.close().await;
                discovered
            } else {
                (HashMap::new(), Vec::new())
            };

        let mcp_prompt = build_mcp_prompt(&tool_defs);

        tracing::info!(
            conf_name = %config.character.conf_name,
            tool_count = tool_defs.len(),
            "context template ready"
        );

        Ok(Self {
            config,
            live2d,
            asr,
            tts,
            registry,
            tool_servers,
            tool_defs,
            mcp_prompt,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-connection context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ServiceContext {
    pub config: AppConfig,
    pub live2d: Live2dModel,
    pub asr: Arc<dyn AsrEngine>,
    pub tts: Arc<dyn TtsEngine>,
    pub vad: Arc<dyn VadEngine>,
    pub adaptive_vad: AdaptiveVad,
    pub mcp: Arc<McpClient>,
    pub executor: Option<Arc<ToolExecutor>>,
    pub agent: Arc<StreamingAgent>,
    pub wake_gate: WakeWordGate,
    pub prompts: PromptRegistry,
    pub history_uid: Mutex<Option<String>>,
    /// Fire-and-forget work owned by this context, aborted in `close`.
    pub(crate) background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContext {
    pub fn from_template(template: &ContextTemplate, client_uid: &str) -> Result<Arc<Self>> {
        let config = template.config.clone();
        let prompts = PromptRegistry::new(PROMPTS_DIR, config.system.tool_prompts.clone());

        // Fresh VAD per connection: it holds detection state and adaptive
        // thresholds that must not leak between clients.
        let vad = build_vad(&config.character.vad)
            .map_err(|e| Error::Context(format!("VAD init failed: {e}")))?;
        let adaptive_vad = AdaptiveVad::new(vad.clone(), &config.character.vad);

        let mcp = Arc::new(McpClient::new(template.registry.clone()));
        let executor = if config.character.agent.use_tools && !template.tool_defs.is_empty() {
            Some(Arc::new(ToolExecutor::with_tools(
                mcp.clone(),
                template.tool_servers.clone(),
                template.tool_defs.clone(),
            )))
        } else {
            None
        };

        let provider = Arc::new(
            OpenAiCompatProvider::new(&config.character.agent)
                .map_err(|e| Error::Context(format!("provider init failed: {e}")))?,
        );
        let persona = build_persona_prompt(&config, &template.live2d, &prompts);
        let agent = Arc::new(StreamingAgent::new(
            provider,
            executor.clone(),
            &persona,
            template.mcp_prompt.clone(),
            &config.character.agent,
        ));

        let wake_gate = WakeWordGate::new(
            config.system.wake_word_enabled,
            client_uid.to_string(),
        );

        Ok(Arc::new(Self {
            config,
            live2d: template.live2d.clone(),
            asr: template.asr.clone(),
            tts: template.tts.clone(),
            vad,
            adaptive_vad,
            mcp,
            executor,
            agent,
            wake_gate,
            prompts,
            history_uid: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn track_task(&self, handle: JoinHandle<()>) {
        self.background_tasks.lock().push(handle);
    }

    /// Tear down per-connection resources. Never raises; shutdown errors
    /// are logged and swallowed.
    pub async fn close(&self) {
        for handle in self.background_tasks.lock().drain(..) {
            handle.abort();
        }

        if tokio::time::timeout(MCP_CLOSE_TIMEOUT, self.mcp.close())
            .await
            .is_err()
        {
            tracing::warn!("MCP client close timed out");
        }

        tracing::info!(conf_name = %self.config.character.conf_name, "service context closed");
    }
}

/// The persona prompt plus the expression instruction, when a template for
/// it is configured.
fn build_persona_prompt(
    config: &AppConfig,
    live2d: &Live2dModel,
    prompts: &PromptRegistry,
) -> String {
    let mut persona = config.character.persona_prompt.clone();
    if let Some(template) = prompts.load("live2d_expression_prompt") {
        let expressions = live2d.expressions.join(", ");
        persona.push_str("\n\n");
        persona.push_str(&template.replace("[<insert_emomap_keys>]", &expressions));
    }
    persona
}

/// Load an alternate character file from `config_alts_dir`. The system
/// section always comes from the running config; alt files only swap the
/// character.
pub fn load_alt_config(base: &AppConfig, file: &str) -> Result<AppConfig> {
    let path = std::path::Path::new(&base.system.config_alts_dir).join(file);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| Error::Context(format!("read config '{file}': {e}")))?;
    let mut alt: AppConfig = serde_yaml::from_str(&raw)
        .map_err(|e| Error::Context(format!("parse config '{file}': {e}")))?;
    alt.system = base.system.clone();
    Ok(alt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_config_keeps_system_section() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nova.yaml"),
            "character:\n  conf_name: nova\n  character_name: Nova\nsystem:\n  port: 1\n",
        )
        .unwrap();

        let mut base = AppConfig::default();
        base.system.port = 9999;
        base.system.config_alts_dir = dir.path().to_str().unwrap().to_string();

        let alt = load_alt_config(&base, "nova.yaml").unwrap();
        assert_eq!(alt.character.character_name, "Nova");
        // The alt file's system section is ignored.
        assert_eq!(alt.system.port, 9999);
    }

    #[test]
    fn missing_alt_config_is_a_context_error() {
        let base = AppConfig::default();
        let err = load_alt_config(&base, "ghost.yaml").unwrap_err();
        assert!(matches!(err, Error::Context(_)));
    }
}
