//! The sentence pipeline: text deltas in, ordered sentence units with
//! synthesized audio out.
//!
//! Stages are fixed at construction and composed by the orchestrator:
//! divider → actions extractor → display processor → TTS filter →
//! TTS scheduler. Tagged side-channel elements (e.g. `<think>` blocks)
//! flow through as display-only units and are never spoken.

pub mod actions;
pub mod display;
pub mod divider;
pub mod tasks;
pub mod tts_filter;

use aria_domain::config::TtsPreprocessorConfig;
use aria_protocol::DisplayText;

use divider::SentenceItem;

/// One segmented sentence, carrying everything the client needs.
#[derive(Debug, Clone)]
pub struct SentenceUnit {
    pub display: DisplayText,
    /// The text actually sent to the TTS engine. Empty for units that are
    /// display-only.
    pub tts_text: String,
    pub actions: Vec<String>,
}

impl SentenceUnit {
    pub fn is_spoken(&self) -> bool {
        !self.tts_text.trim().is_empty()
    }
}

/// Run one divider item through the remaining stages.
pub fn process_item(
    item: SentenceItem,
    expressions: &[String],
    tts_config: &TtsPreprocessorConfig,
    name: Option<&str>,
    avatar: Option<&str>,
) -> SentenceUnit {
    match item {
        SentenceItem::Sentence(text) => {
            let (cleaned, acts) = actions::extract_actions(&text, expressions);
            let display = display::build_display_text(&cleaned, name, avatar);
            let tts_text = tts_filter::filter_for_tts(&cleaned, tts_config);
            SentenceUnit {
                display,
                tts_text,
                actions: acts,
            }
        }
        SentenceItem::Tagged { content, .. } => SentenceUnit {
            display: display::build_display_text(&content, name, avatar),
            tts_text: String::new(),
            actions: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spoken_sentence_flows_through_all_stages() {
        let unit = process_item(
            SentenceItem::Sentence("[joy] Hello there!".into()),
            &["joy".into()],
            &TtsPreprocessorConfig::default(),
            Some("Aria"),
            None,
        );
        assert_eq!(unit.actions, vec!["joy".to_string()]);
        assert_eq!(unit.display.text, "Hello there!");
        assert_eq!(unit.tts_text, "Hello there!");
        assert!(unit.is_spoken());
    }

    #[test]
    fn tagged_item_is_display_only() {
        let unit = process_item(
            SentenceItem::Tagged {
                tag: "think".into(),
                content: "pondering...".into(),
            },
            &[],
            &TtsPreprocessorConfig::default(),
            None,
            None,
        );
        assert!(!unit.is_spoken());
        assert_eq!(unit.display.text, "pondering...");
    }
}
