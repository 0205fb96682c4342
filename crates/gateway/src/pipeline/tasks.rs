//! Per-turn TTS scheduling.
//!
//! Synthesis runs concurrently, but sentence payloads must reach the client
//! in divider order. Each sentence is spawned as its own task and the
//! forwarder awaits the task handles strictly in FIFO order; cancellation
//! aborts anything still in flight and stops all sends immediately.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use aria_engines::TtsEngine;
use aria_protocol::ServerMessage;

use super::SentenceUnit;
use crate::hub::Outbound;

pub struct TtsScheduler {
    queue: mpsc::UnboundedSender<JoinHandle<ServerMessage>>,
    forwarder: JoinHandle<usize>,
    scheduled: usize,
}

impl TtsScheduler {
    pub fn new(outbound: Outbound, token: CancellationToken) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<JoinHandle<ServerMessage>>();

        let forwarder = tokio::spawn(async move {
            let mut sent = 0usize;
            loop {
                let mut handle = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    handle = rx.recv() => match handle {
                        Some(handle) => handle,
                        None => return sent,
                    },
                };

                let payload = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        handle.abort();
                        break;
                    }
                    result = &mut handle => match result {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(error = %e, "TTS task failed");
                            continue;
                        }
                    },
                };

                outbound.send(payload).await;
                sent += 1;
            }

            // Cancelled: drain and abort whatever is still queued.
            rx.close();
            while let Ok(handle) = rx.try_recv() {
                handle.abort();
            }
            sent
        });

        Self {
            queue,
            forwarder,
            scheduled: 0,
        }
    }

    /// Spawn synthesis for one sentence unit and queue it for in-order
    /// delivery. Display-only units skip the engine entirely.
    pub fn schedule(&mut self, unit: SentenceUnit, tts: Arc<dyn TtsEngine>) {
        let handle = tokio::spawn(async move {
            let audio = if unit.is_spoken() {
                match tts.synthesize(&unit.tts_text).await {
                    Ok(payload) => Some(payload.audio),
                    Err(e) => {
                        // The sentence still reaches the screen, just silent.
                        tracing::error!(error = %e, text = %unit.tts_text, "TTS synthesis failed");
                        None
                    }
                }
            } else {
                None
            };

            ServerMessage::Audio {
                audio,
                display_text: Some(unit.display),
                actions: unit.actions,
            }
        });

        if self.queue.send(handle).is_err() {
            tracing::debug!("TTS forwarder already stopped, dropping sentence");
        } else {
            self.scheduled += 1;
        }
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    /// Close the queue and wait for every queued payload to be delivered.
    /// Returns how many sentence payloads were sent.
    pub async fn finish(self) -> usize {
        drop(self.queue);
        self.forwarder.await.unwrap_or(0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use aria_domain::Result;
    use aria_engines::AudioPayload;
    use aria_protocol::DisplayText;

    /// TTS stub whose latency depends on the text, so later sentences can
    /// finish synthesis first.
    struct VariableLatencyTts;

    #[async_trait::async_trait]
    impl TtsEngine for VariableLatencyTts {
        async fn synthesize(&self, text: &str) -> Result<AudioPayload> {
            let delay = if text.contains("slow") { 50 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(AudioPayload {
                audio: format!("audio:{text}"),
                format: "mp3".into(),
            })
        }
    }

    fn unit(text: &str) -> SentenceUnit {
        SentenceUnit {
            display: DisplayText {
                text: text.into(),
                name: None,
                avatar: None,
            },
            tts_text: text.into(),
            actions: Vec::new(),
        }
    }

    fn outbound() -> (Outbound, mpsc::Receiver<crate::hub::OutboundMessage>) {
        let (tx, rx) = mpsc::channel(32);
        (Outbound::new(tx), rx)
    }

    #[tokio::test]
    async fn payloads_arrive_in_divider_order_despite_latency() {
        let (out, mut rx) = outbound();
        let tts: Arc<dyn TtsEngine> = Arc::new(VariableLatencyTts);
        let mut scheduler = TtsScheduler::new(out, CancellationToken::new());

        scheduler.schedule(unit("slow first"), tts.clone());
        scheduler.schedule(unit("second"), tts.clone());
        scheduler.schedule(unit("third"), tts.clone());

        let sent = scheduler.finish().await;
        assert_eq!(sent, 3);

        let mut texts = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let crate::hub::OutboundMessage::Typed(ServerMessage::Audio {
                display_text, ..
            }) = msg
            {
                texts.push(display_text.unwrap().text);
            }
        }
        assert_eq!(texts, vec!["slow first", "second", "third"]);
    }

    #[tokio::test]
    async fn display_only_units_skip_synthesis() {
        let (out, mut rx) = outbound();
        let tts: Arc<dyn TtsEngine> = Arc::new(VariableLatencyTts);
        let mut scheduler = TtsScheduler::new(out, CancellationToken::new());

        let mut silent = unit("thinking");
        silent.tts_text = String::new();
        scheduler.schedule(silent, tts);
        scheduler.finish().await;

        match rx.try_recv().unwrap() {
            crate::hub::OutboundMessage::Typed(ServerMessage::Audio { audio, .. }) => {
                assert!(audio.is_none())
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_all_sends() {
        let (out, mut rx) = outbound();
        let tts: Arc<dyn TtsEngine> = Arc::new(VariableLatencyTts);
        let token = CancellationToken::new();
        let mut scheduler = TtsScheduler::new(out, token.clone());

        scheduler.schedule(unit("slow one"), tts.clone());
        scheduler.schedule(unit("slow two"), tts.clone());
        token.cancel();

        scheduler.finish().await;
        // Nothing (or at most what was already in flight before the cancel)
        // may arrive after cancellation; with immediate cancel, nothing.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn finish_with_nothing_scheduled_returns_zero() {
        let (out, _rx) = outbound();
        let scheduler = TtsScheduler::new(out, CancellationToken::new());
        assert_eq!(scheduler.finish().await, 0);
    }
}
