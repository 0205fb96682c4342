//! Wake-word gate: the per-connection two-state filter deciding whether an
//! utterance may enter the agent stage.
//!
//! `listening` connections stay silent until a wake word shows up;
//! `active` connections pass text through until an end word puts them back
//! to sleep. Wake and sleep events piggyback an advertisement-control hint
//! so the UI can pause or resume background content.

use parking_lot::Mutex;

use aria_protocol::{AdvertisementControl, ServerMessage, WakeStats};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Word sets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const WAKE_WORDS_CHINESE: &[&str] = &[
    "艾莉亚",
    "嘿艾莉亚",
    "你好艾莉亚",
    "艾莉亚同学",
    "艾莉亚酱",
    "小雅",
    "小助手",
    "Aria",
];

const WAKE_WORDS_ENGLISH: &[&str] = &[
    "Aria",
    "Hey Aria",
    "Hello Aria",
    "Assistant",
    "Hey assistant",
    "Computer",
    "AI",
];

const WAKE_WORDS_JAPANESE: &[&str] = &[
    "こんにちは",
    "アリア",
    "アリアちゃん",
    "アシスタント",
    "こんにちはアリア",
    "助手",
    "おーい",
    "ねえ",
];

const END_WORDS_CHINESE: &[&str] = &[
    "结束",
    "再见",
    "拜拜",
    "停止",
    "结束对话",
    "谢谢",
    "不聊了",
    "够了",
    "好了",
    "结束吧",
    "下次见",
];

const END_WORDS_ENGLISH: &[&str] = &[
    "goodbye",
    "bye",
    "end",
    "stop",
    "finish",
    "thanks",
    "that's all",
    "see you",
    "later",
    "quit",
    "exit",
];

const END_WORDS_JAPANESE: &[&str] = &[
    "さようなら",
    "バイバイ",
    "終わり",
    "停止",
    "やめて",
    "ありがとう",
    "また今度",
    "じゃあね",
    "おつかれ",
    "終了",
];

/// Preview length for ignored-utterance events.
const IGNORED_PREVIEW_CHARS: usize = 50;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    Listening,
    Active,
}

impl WakeState {
    fn as_str(self) -> &'static str {
        match self {
            WakeState::Listening => "listening",
            WakeState::Active => "active",
        }
    }
}

/// What the orchestrator should do with the utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Stay silent; the turn produces nothing.
    Ignore,
    /// Run the agent with this (possibly replaced) text.
    Proceed(String),
}

/// Per-connection gate state. Lives inside the service context.
pub struct WakeWordGate {
    enabled: bool,
    client_uid: String,
    inner: Mutex<Inner>,
}

struct Inner {
    state: WakeState,
    stats: WakeStats,
}

impl WakeWordGate {
    pub fn new(enabled: bool, client_uid: String) -> Self {
        Self {
            enabled,
            client_uid,
            inner: Mutex::new(Inner {
                // With the gate disabled every connection is treated as
                // already active.
                state: if enabled {
                    WakeState::Listening
                } else {
                    WakeState::Active
                },
                stats: WakeStats::default(),
            }),
        }
    }

    pub fn state(&self) -> WakeState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> WakeStats {
        self.inner.lock().stats
    }

    /// Process one transcription. Returns the decision plus an optional
    /// `wake-word-state` event for the client.
    pub fn process(&self, text: &str) -> (GateDecision, Option<ServerMessage>) {
        if !self.enabled {
            return (GateDecision::Proceed(text.to_string()), None);
        }

        let original = text.trim();
        let mut inner = self.inner.lock();

        match inner.state {
            WakeState::Listening => {
                if let Some((word, language)) = find_match(original, MatchSet::Wake) {
                    inner.state = WakeState::Active;
                    inner.stats.wake_count += 1;
                    tracing::info!(
                        client_uid = %self.client_uid,
                        matched_word = %word,
                        language,
                        "wake word activated"
                    );
                    let event = self.state_event(&inner, "wake_up", &word, language);

                    let residue = extract_residue(original, &word);
                    let reply = if residue.is_empty() {
                        welcome_message(&word, language)
                    } else {
                        tracing::info!(residue = %residue, "processing residue after wake word");
                        residue
                    };
                    (GateDecision::Proceed(reply), Some(event))
                } else {
                    inner.stats.ignored_count += 1;
                    let preview: String = original.chars().take(IGNORED_PREVIEW_CHARS).collect();
                    let preview = if original.chars().count() > IGNORED_PREVIEW_CHARS {
                        format!("{preview}...")
                    } else {
                        preview
                    };
                    tracing::debug!(client_uid = %self.client_uid, preview = %preview, "utterance ignored while listening");
                    let event = self.state_event(&inner, "ignored", &preview, "unknown");
                    (GateDecision::Ignore, Some(event))
                }
            }
            WakeState::Active => {
                if let Some((word, language)) = find_match(original, MatchSet::End) {
                    inner.state = WakeState::Listening;
                    inner.stats.end_count += 1;
                    tracing::info!(
                        client_uid = %self.client_uid,
                        matched_word = %word,
                        language,
                        "wake word deactivated"
                    );
                    let event = self.state_event(&inner, "sleep", &word, language);
                    (
                        GateDecision::Proceed(goodbye_message(language)),
                        Some(event),
                    )
                } else {
                    (GateDecision::Proceed(original.to_string()), None)
                }
            }
        }
    }

    fn state_event(
        &self,
        inner: &Inner,
        action: &str,
        matched_word: &str,
        language: &str,
    ) -> ServerMessage {
        let listening = inner.state == WakeState::Listening;
        ServerMessage::WakeWordState {
            client_uid: self.client_uid.clone(),
            action: action.to_string(),
            matched_word: matched_word.to_string(),
            language: language.to_string(),
            current_state: inner.state.as_str().to_string(),
            stats: inner.stats,
            advertisement_control: AdvertisementControl {
                should_show_ads: listening,
                control_action: if listening { "start_ads" } else { "stop_ads" }.to_string(),
                trigger_reason: action.to_string(),
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Matching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy)]
enum MatchSet {
    Wake,
    End,
}

fn word_sets(set: MatchSet) -> [(&'static str, &'static [&'static str]); 3] {
    match set {
        MatchSet::Wake => [
            ("chinese", WAKE_WORDS_CHINESE),
            ("english", WAKE_WORDS_ENGLISH),
            ("japanese", WAKE_WORDS_JAPANESE),
        ],
        MatchSet::End => [
            ("chinese", END_WORDS_CHINESE),
            ("english", END_WORDS_ENGLISH),
            ("japanese", END_WORDS_JAPANESE),
        ],
    }
}

/// Find the matching word, preferring the longest hit so that "Hey Aria"
/// wins over the bare "Aria". CJK sets match as raw substrings; the English
/// set matches case-insensitively.
fn find_match(text: &str, set: MatchSet) -> Option<(String, &'static str)> {
    let text_lower = text.to_lowercase();
    let mut best: Option<(String, &'static str)> = None;
    for (language, words) in word_sets(set) {
        for word in words {
            let hit = if language == "english" {
                text_lower.contains(&word.to_lowercase())
            } else {
                text.contains(word)
            };
            if hit && best.as_ref().map_or(true, |(b, _)| word.len() > b.len()) {
                best = Some((word.to_string(), language));
            }
        }
    }
    best
}

/// The portion of the utterance after the matched wake word, with leading
/// connective punctuation cleaned off.
fn extract_residue(text: &str, wake_word: &str) -> String {
    let removed = if let Some(pos) = text.find(wake_word) {
        let mut s = String::with_capacity(text.len());
        s.push_str(&text[..pos]);
        s.push_str(&text[pos + wake_word.len()..]);
        s
    } else {
        // English match was case-insensitive; remove by lowercase position.
        let lower = text.to_lowercase();
        match lower.find(&wake_word.to_lowercase()) {
            Some(pos) => {
                let mut s = String::with_capacity(text.len());
                s.push_str(&text[..pos]);
                s.push_str(&text[pos + wake_word.len()..]);
                s
            }
            None => text.to_string(),
        }
    };
    removed
        .trim()
        .trim_start_matches([',', '，', '。', '、', '!', '！', '?', '？', ' '])
        .trim()
        .to_string()
}

fn welcome_message(wake_word: &str, language: &str) -> String {
    match language {
        "english" => {
            let name = wake_word.replace("Hey ", "").replace("Hello ", "");
            format!("Hello! I'm {name}, how can I help you?")
        }
        "japanese" => {
            let name = wake_word.replace("こんにちは", "");
            format!("こんにちは！{name}です。何かお手伝いできることはありますか？")
        }
        _ => {
            let name = wake_word.replace('嘿', "").replace("你好", "");
            format!("你好！我是{name}，有什么可以帮你的吗？")
        }
    }
}

fn goodbye_message(language: &str) -> String {
    match language {
        "english" => "Alright, goodbye! Call me anytime you need help.".to_string(),
        "japanese" => "はい、さようなら！何かあったらいつでも呼んでくださいね。".to_string(),
        _ => "好的，再见！有需要随时叫我。".to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> WakeWordGate {
        WakeWordGate::new(true, "client-1".into())
    }

    fn unwrap_event(event: Option<ServerMessage>) -> (String, String) {
        match event {
            Some(ServerMessage::WakeWordState {
                action,
                current_state,
                ..
            }) => (action, current_state),
            other => panic!("expected wake-word-state event, got {other:?}"),
        }
    }

    #[test]
    fn listening_ignores_plain_speech() {
        let gate = gate();
        let (decision, event) = gate.process("what a nice day");
        assert_eq!(decision, GateDecision::Ignore);
        let (action, state) = unwrap_event(event);
        assert_eq!(action, "ignored");
        assert_eq!(state, "listening");
        assert_eq!(gate.stats().ignored_count, 1);
    }

    #[test]
    fn wake_word_with_residue_passes_residue_through() {
        let gate = gate();
        let (decision, event) = gate.process("Hey Aria, what time is it?");
        assert_eq!(decision, GateDecision::Proceed("what time is it?".into()));
        let (action, state) = unwrap_event(event);
        assert_eq!(action, "wake_up");
        assert_eq!(state, "active");
        assert_eq!(gate.state(), WakeState::Active);
        assert_eq!(gate.stats().wake_count, 1);
    }

    #[test]
    fn bare_wake_word_yields_localized_welcome() {
        let gate = gate();
        let (decision, _) = gate.process("Hey Aria");
        match decision {
            GateDecision::Proceed(text) => {
                assert_eq!(text, "Hello! I'm Aria, how can I help you?");
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn end_word_in_active_returns_farewell_and_listening() {
        let gate = gate();
        gate.process("Hey Aria");
        let (decision, event) = gate.process("ok goodbye");
        match decision {
            GateDecision::Proceed(text) => assert!(text.contains("goodbye")),
            other => panic!("unexpected decision: {other:?}"),
        }
        let (action, state) = unwrap_event(event);
        assert_eq!(action, "sleep");
        assert_eq!(state, "listening");
        assert_eq!(gate.state(), WakeState::Listening);
        assert_eq!(gate.stats().end_count, 1);
    }

    #[test]
    fn active_passes_normal_speech_unchanged() {
        let gate = gate();
        gate.process("Aria");
        let (decision, event) = gate.process("tell me about rust");
        assert_eq!(decision, GateDecision::Proceed("tell me about rust".into()));
        assert!(event.is_none());
    }

    #[test]
    fn chinese_wake_word_matches_as_substring() {
        let gate = gate();
        let (decision, _) = gate.process("艾莉亚，今天天气怎么样");
        assert_eq!(decision, GateDecision::Proceed("今天天气怎么样".into()));
        assert_eq!(gate.state(), WakeState::Active);
    }

    #[test]
    fn japanese_end_word_returns_japanese_farewell() {
        let gate = gate();
        gate.process("アリア");
        let (decision, _) = gate.process("さようなら");
        match decision {
            GateDecision::Proceed(text) => assert!(text.contains("さようなら")),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn english_matching_is_case_insensitive() {
        let gate = gate();
        let (decision, _) = gate.process("hey aria how are you");
        assert!(matches!(decision, GateDecision::Proceed(_)));
        assert_eq!(gate.state(), WakeState::Active);
    }

    #[test]
    fn disabled_gate_treats_everything_as_active() {
        let gate = WakeWordGate::new(false, "client-2".into());
        assert_eq!(gate.state(), WakeState::Active);
        let (decision, event) = gate.process("anything at all");
        assert_eq!(decision, GateDecision::Proceed("anything at all".into()));
        assert!(event.is_none());
    }

    #[test]
    fn advertisement_hint_follows_state() {
        let gate = gate();
        let (_, event) = gate.process("Aria");
        match event {
            Some(ServerMessage::WakeWordState {
                advertisement_control,
                ..
            }) => {
                assert!(!advertisement_control.should_show_ads);
                assert_eq!(advertisement_control.control_action, "stop_ads");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let (_, event) = gate.process("goodbye");
        match event {
            Some(ServerMessage::WakeWordState {
                advertisement_control,
                ..
            }) => {
                assert!(advertisement_control.should_show_ads);
                assert_eq!(advertisement_control.control_action, "start_ads");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn ignored_preview_is_truncated() {
        let gate = gate();
        let long_text = "x".repeat(80);
        let (_, event) = gate.process(&long_text);
        match event {
            Some(ServerMessage::WakeWordState { matched_word, .. }) => {
                assert!(matched_word.ends_with("..."));
                assert_eq!(matched_word.chars().count(), 53);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
