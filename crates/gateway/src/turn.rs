//! The conversation orchestrator: exactly one logical user turn,
//! end-to-end, with correct ordering, cancellation and history writes.
//!
//! Ordering guarantee per turn: `conversation-chain-start` < sentence
//! payloads (in divider order) < `backend-synth-complete` <
//! `conversation-chain-end`. Cancellation stops the agent stream at the
//! next suspension point and silences the TTS forwarder immediately.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use aria_agent::agent::AgentEvent;
use aria_domain::chat::BatchInput;

use crate::cancel::TurnTicket;
use crate::context::ServiceContext;
use crate::history::HistoryStore;
use crate::hub::Outbound;
use crate::pipeline::divider::{SegmentMethod, SentenceDivider};
use crate::pipeline::tasks::TtsScheduler;
use crate::pipeline;
use crate::wake::GateDecision;
use aria_protocol::ServerMessage;

/// Debug tags cycling per turn, for readable interleaved logs.
const TURN_TAGS: &[&str] = &[
    "🍉", "🍋", "🍊", "🍓", "🍇", "🍍", "🥝", "🍒", "🍑", "🥭",
];

static TURN_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn next_tag() -> &'static str {
    TURN_TAGS[TURN_COUNTER.fetch_add(1, Ordering::Relaxed) % TURN_TAGS.len()]
}

/// One user input triggering a turn.
pub enum TurnInput {
    Text { text: String, images: Vec<Value> },
    Audio(Vec<f32>),
    /// `ai-speak-signal`: speak from the configured synthetic prompt,
    /// keeping it out of memory and history.
    ProactiveSpeak,
}

pub struct TurnParams {
    pub context: Arc<ServiceContext>,
    pub outbound: Outbound,
    pub client_uid: Uuid,
    pub history: Arc<HistoryStore>,
    pub ticket: TurnTicket,
}

/// Run one turn to completion or cancellation.
pub async fn run_turn(params: TurnParams, input: TurnInput) {
    let token = params.ticket.token.clone();
    let tag = next_tag();
    tracing::info!(client_uid = %params.client_uid, tag, "conversation turn started");

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            tracing::info!(tag, "conversation turn cancelled");
        }
        _ = run_turn_inner(&params, input, tag) => {}
    }
}

async fn run_turn_inner(params: &TurnParams, input: TurnInput, tag: &str) {
    let ctx = &params.context;
    let outbound = &params.outbound;
    let character = &ctx.config.character;

    outbound
        .send(ServerMessage::Control {
            text: "conversation-chain-start".into(),
        })
        .await;

    // ── Input → text ──────────────────────────────────────────────
    let (text, skip_memory, skip_history, proactive) = match input {
        TurnInput::Text { text, images } => (Some((text, images)), false, false, false),
        TurnInput::ProactiveSpeak => {
            let prompt = ctx.prompts.proactive_speak_prompt();
            (Some((prompt, Vec::new())), true, true, true)
        }
        TurnInput::Audio(samples) => {
            let started = std::time::Instant::now();
            match ctx.asr.transcribe(&samples).await {
                Ok(text) => {
                    tracing::info!(tag, elapsed = ?started.elapsed(), "ASR finished");
                    (Some((text, Vec::new())), false, false, false)
                }
                Err(e) => {
                    tracing::error!(tag, error = %e, "ASR failed");
                    outbound
                        .send(ServerMessage::Error {
                            message: format!("Speech recognition failed: {e}"),
                        })
                        .await;
                    (None, false, false, false)
                }
            }
        }
    };

    let Some((raw_text, images)) = text else {
        end_turn(outbound).await;
        return;
    };

    // ── Wake-word gate ────────────────────────────────────────────
    let (decision, gate_event) = ctx.wake_gate.process(&raw_text);
    if let Some(event) = gate_event {
        outbound.send(event).await;
    }
    let input_text = match decision {
        GateDecision::Ignore => {
            tracing::debug!(tag, "gate ignored input while listening");
            end_turn(outbound).await;
            return;
        }
        GateDecision::Proceed(text) => text,
    };

    tracing::info!(tag, input = %input_text, "user input accepted");

    // ── Persist user message ──────────────────────────────────────
    let history_uid = ctx.history_uid.lock().clone();
    let history_enabled = ctx.config.system.enable_history && !skip_history;
    if let (true, Some(history_uid)) = (history_enabled, &history_uid) {
        if let Err(e) = params.history.store_message(
            &character.conf_uid,
            history_uid,
            "human",
            &input_text,
            Some(&character.human_name),
            None,
        ) {
            tracing::warn!(tag, error = %e, "failed to persist user message");
        }
    }

    let batch = BatchInput {
        text: input_text,
        images,
        from_name: Some(character.human_name.clone()),
        skip_memory,
        skip_history,
        proactive_speak: proactive,
    };

    // ── Stream the agent through the sentence pipeline ────────────
    let mut divider = SentenceDivider::new(
        SegmentMethod::from_tag(&character.agent.segment_method),
        character.agent.faster_first_response,
        vec!["think".into()],
    );
    let mut scheduler = TtsScheduler::new(outbound.clone(), params.ticket.token.clone());
    let expressions = ctx.live2d.expressions.clone();
    let avatar = (!character.avatar.is_empty()).then(|| character.avatar.clone());

    let mut full_response = String::new();
    let mut stream = ctx.agent.clone().chat(batch);

    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::Text(delta) => {
                full_response.push_str(&delta);
                for item in divider.push(&delta) {
                    let unit = pipeline::process_item(
                        item,
                        &expressions,
                        &character.tts_preprocessor,
                        Some(&character.character_name),
                        avatar.as_deref(),
                    );
                    scheduler.schedule(unit, ctx.tts.clone());
                }
            }
            AgentEvent::ToolStatus(mut payload) => {
                payload["name"] = Value::String(character.character_name.clone());
                outbound.send(ServerMessage::ToolCallStatus { payload }).await;
            }
            AgentEvent::SideChannel(payload) => {
                outbound.send_raw(payload).await;
            }
            AgentEvent::Error(message) => {
                tracing::error!(tag, error = %message, "agent stream error");
                outbound
                    .send(ServerMessage::Error {
                        message: format!("Error processing agent response: {message}"),
                    })
                    .await;
            }
        }
    }

    for item in divider.flush() {
        let unit = pipeline::process_item(
            item,
            &expressions,
            &character.tts_preprocessor,
            Some(&character.character_name),
            avatar.as_deref(),
        );
        scheduler.schedule(unit, ctx.tts.clone());
    }

    // ── Await TTS in order, then close out the turn ───────────────
    let sent = scheduler.finish().await;
    outbound.send(ServerMessage::BackendSynthComplete).await;
    tracing::info!(tag, sentences = sent, "synthesis complete");

    if let (true, Some(history_uid), false) =
        (history_enabled, &history_uid, full_response.is_empty())
    {
        if let Err(e) = params.history.store_message(
            &character.conf_uid,
            history_uid,
            "ai",
            &full_response,
            Some(&character.character_name),
            avatar.as_deref(),
        ) {
            tracing::warn!(tag, error = %e, "failed to persist assistant reply");
        }
    }

    end_turn(outbound).await;
    tracing::info!(tag, "conversation turn finished");
}

async fn end_turn(outbound: &Outbound) {
    outbound
        .send(ServerMessage::Control {
            text: "conversation-chain-end".into(),
        })
        .await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use aria_agent::provider::{ChatRequest, LlmProvider};
    use aria_agent::StreamingAgent;
    use aria_domain::config::AppConfig;
    use aria_domain::stream::{BoxStream, LlmEvent};
    use aria_domain::{Error, Result};
    use aria_engines::{AdaptiveVad, AsrEngine, AudioPayload, TtsEngine, VadEngine, VadEvent};
    use aria_mcp_client::{McpClient, ServerRegistry};

    use crate::cancel::TurnMap;
    use crate::hub::OutboundMessage;
    use crate::live2d::Live2dModel;
    use crate::prompts::PromptRegistry;
    use crate::wake::WakeWordGate;

    struct StubAsr(String);

    #[async_trait::async_trait]
    impl AsrEngine for StubAsr {
        async fn transcribe(&self, _samples: &[f32]) -> Result<String> {
            if self.0 == "FAIL" {
                return Err(Error::Engine("asr backend unreachable".into()));
            }
            Ok(self.0.clone())
        }
    }

    struct StubTts;

    #[async_trait::async_trait]
    impl TtsEngine for StubTts {
        async fn synthesize(&self, text: &str) -> Result<AudioPayload> {
            Ok(AudioPayload {
                audio: format!("b64:{text}"),
                format: "mp3".into(),
            })
        }
    }

    struct StubVad;

    impl VadEngine for StubVad {
        fn detect_speech(&self, _chunk: &[f32]) -> Vec<VadEvent> {
            Vec::new()
        }
        fn set_thresholds(&self, _prob: f32, _db: i32) {}
        fn reset(&self) {}
    }

    struct ScriptedProvider {
        scripts: Mutex<VecDeque<Vec<Result<LlmEvent>>>>,
        hang_after_scripts: bool,
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat_stream(
            &self,
            _req: ChatRequest<'_>,
        ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
            match self.scripts.lock().pop_front() {
                Some(script) => {
                    let head = futures_util::stream::iter(script);
                    if self.hang_after_scripts {
                        Ok(Box::pin(head.chain(futures_util::stream::pending())))
                    } else {
                        Ok(Box::pin(head))
                    }
                }
                None => Err(Error::Other("no script left".into())),
            }
        }

        fn provider_id(&self) -> &str {
            "scripted"
        }
    }

    fn make_context(
        script: Vec<Vec<Result<LlmEvent>>>,
        hang: bool,
        wake_enabled: bool,
        asr_text: &str,
    ) -> Arc<ServiceContext> {
        let config = AppConfig::default();
        let provider = Arc::new(ScriptedProvider {
            scripts: Mutex::new(script.into()),
            hang_after_scripts: hang,
        });
        let agent = Arc::new(StreamingAgent::new(
            provider,
            None,
            "You are Aria.",
            String::new(),
            &config.character.agent,
        ));
        let vad: Arc<dyn VadEngine> = Arc::new(StubVad);
        let registry = Arc::new(ServerRegistry::from_config(&config.system.mcp));

        Arc::new(ServiceContext {
            live2d: Live2dModel::load("aria", "/nonexistent"),
            asr: Arc::new(StubAsr(asr_text.to_string())),
            tts: Arc::new(StubTts),
            adaptive_vad: AdaptiveVad::new(vad.clone(), &config.character.vad),
            vad,
            mcp: Arc::new(McpClient::new(registry)),
            executor: None,
            agent,
            wake_gate: WakeWordGate::new(wake_enabled, "test-client".into()),
            prompts: PromptRegistry::new("/nonexistent", Default::default()),
            history_uid: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    async fn start_turn(
        ctx: Arc<ServiceContext>,
        input: TurnInput,
    ) -> (
        mpsc::Receiver<OutboundMessage>,
        TurnTicket,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let turns = TurnMap::new();
        let uid = Uuid::new_v4();
        let ticket = turns.begin(uid).await;
        let params = TurnParams {
            context: ctx,
            outbound: Outbound::new(tx),
            client_uid: uid,
            history: Arc::new(HistoryStore::new(
                tempfile::tempdir().unwrap().keep(),
            )),
            ticket: ticket.clone(),
        };
        let handle = tokio::spawn(run_turn(params, input));
        (rx, ticket, handle)
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn kinds(messages: &[OutboundMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|m| match m {
                OutboundMessage::Typed(ServerMessage::Control { text }) => text.clone(),
                OutboundMessage::Typed(ServerMessage::Audio { .. }) => "audio".into(),
                OutboundMessage::Typed(ServerMessage::BackendSynthComplete) => {
                    "backend-synth-complete".into()
                }
                OutboundMessage::Typed(ServerMessage::WakeWordState { action, .. }) => {
                    format!("wake-word-state:{action}")
                }
                OutboundMessage::Typed(ServerMessage::Error { .. }) => "error".into(),
                OutboundMessage::Typed(other) => format!("{other:?}"),
                OutboundMessage::Raw(_) => "raw".into(),
            })
            .collect()
    }

    #[tokio::test]
    async fn text_turn_produces_ordered_signal_sequence() {
        let ctx = make_context(
            vec![vec![
                Ok(LlmEvent::Token("Hello there. ".into())),
                Ok(LlmEvent::Token("How are you today?".into())),
                Ok(LlmEvent::Done { finish_reason: Some("stop".into()) }),
            ]],
            false,
            false,
            "",
        );

        let (mut rx, _ticket, handle) = start_turn(
            ctx,
            TurnInput::Text {
                text: "hello".into(),
                images: Vec::new(),
            },
        )
        .await;
        handle.await.unwrap();

        let messages = drain(&mut rx);
        let kinds = kinds(&messages);
        assert_eq!(
            kinds,
            vec![
                "conversation-chain-start",
                "audio",
                "audio",
                "backend-synth-complete",
                "conversation-chain-end",
            ]
        );

        // Concatenated display text equals the full agent reply.
        let display: String = messages
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Typed(ServerMessage::Audio { display_text, .. }) => {
                    display_text.as_ref().map(|d| d.text.clone())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(display, "Hello there. How are you today?");
    }

    #[tokio::test]
    async fn listening_gate_blocks_agent_and_ends_turn() {
        let ctx = make_context(vec![], false, true, "");

        let (mut rx, _ticket, handle) = start_turn(
            ctx.clone(),
            TurnInput::Text {
                text: "no wake word here".into(),
                images: Vec::new(),
            },
        )
        .await;
        handle.await.unwrap();

        let kinds = kinds(&drain(&mut rx));
        assert_eq!(
            kinds,
            vec![
                "conversation-chain-start",
                "wake-word-state:ignored",
                "conversation-chain-end",
            ]
        );
        // The provider was never called: its script queue is untouched and
        // would have errored the turn otherwise.
    }

    #[tokio::test]
    async fn wake_word_turn_reaches_agent_with_residue() {
        let ctx = make_context(
            vec![vec![
                Ok(LlmEvent::Token("It is noon.".into())),
                Ok(LlmEvent::Done { finish_reason: Some("stop".into()) }),
            ]],
            false,
            true,
            "",
        );

        let (mut rx, _ticket, handle) = start_turn(
            ctx.clone(),
            TurnInput::Text {
                text: "Hey Aria, what time is it?".into(),
                images: Vec::new(),
            },
        )
        .await;
        handle.await.unwrap();

        let kinds = kinds(&drain(&mut rx));
        assert!(kinds.contains(&"wake-word-state:wake_up".to_string()));
        assert!(kinds.contains(&"backend-synth-complete".to_string()));
        assert_eq!(
            ctx.agent.memory_snapshot().first().unwrap().content,
            "what time is it?"
        );
    }

    #[tokio::test]
    async fn audio_input_goes_through_asr() {
        let ctx = make_context(
            vec![vec![
                Ok(LlmEvent::Token("Heard you!".into())),
                Ok(LlmEvent::Done { finish_reason: Some("stop".into()) }),
            ]],
            false,
            false,
            "transcribed speech",
        );

        let (mut rx, _ticket, handle) =
            start_turn(ctx.clone(), TurnInput::Audio(vec![0.1; 1600])).await;
        handle.await.unwrap();

        assert!(kinds(&drain(&mut rx)).contains(&"backend-synth-complete".to_string()));
        assert_eq!(
            ctx.agent.memory_snapshot().first().unwrap().content,
            "transcribed speech"
        );
    }

    #[tokio::test]
    async fn asr_failure_surfaces_error_and_ends_turn() {
        let ctx = make_context(vec![], false, false, "FAIL");

        let (mut rx, _ticket, handle) =
            start_turn(ctx, TurnInput::Audio(vec![0.1; 1600])).await;
        handle.await.unwrap();

        let kinds = kinds(&drain(&mut rx));
        assert_eq!(
            kinds,
            vec!["conversation-chain-start", "error", "conversation-chain-end"]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_output_before_synth_complete() {
        let ctx = make_context(
            vec![vec![Ok(LlmEvent::Token("First sentence. ".into()))]],
            true, // provider hangs after the scripted events
            false,
            "",
        );

        let (mut rx, ticket, handle) = start_turn(
            ctx,
            TurnInput::Text {
                text: "hello".into(),
                images: Vec::new(),
            },
        )
        .await;

        // Let the first sentence flow, then barge in.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        ticket.token.cancel();
        handle.await.unwrap();

        let kinds = kinds(&drain(&mut rx));
        assert!(!kinds.contains(&"backend-synth-complete".to_string()));
        assert!(!kinds.contains(&"conversation-chain-end".to_string()));
    }

    #[tokio::test]
    async fn agent_error_still_closes_the_turn() {
        // No scripts: the provider errors on the first call.
        let ctx = make_context(vec![], false, false, "");

        let (mut rx, _ticket, handle) = start_turn(
            ctx,
            TurnInput::Text {
                text: "hello".into(),
                images: Vec::new(),
            },
        )
        .await;
        handle.await.unwrap();

        let kinds = kinds(&drain(&mut rx));
        assert!(kinds.contains(&"error".to_string()));
        assert!(kinds.contains(&"backend-synth-complete".to_string()));
        assert_eq!(kinds.last().unwrap(), "conversation-chain-end");
    }
}
