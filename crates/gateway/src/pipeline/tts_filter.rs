//! TTS filter: derives the text actually sent to the speech engine.
//!
//! Markup, stage directions and emojis read badly out loud; the boolean
//! policy set from `tts_preprocessor` decides what gets stripped.

use regex::Regex;

use aria_domain::config::TtsPreprocessorConfig;

/// Punctuation that survives `remove_special_char`.
const KEPT_PUNCT: &str = ".,!?;:'\"()！？。，、；：…“”‘’ -";

pub fn filter_for_tts(text: &str, config: &TtsPreprocessorConfig) -> String {
    let mut result = text.to_string();

    if config.ignore_brackets {
        result = strip_pattern(&result, r"\[[^\]]*\]");
    }
    if config.ignore_parentheses {
        result = strip_pattern(&result, r"\([^)]*\)");
        result = strip_pattern(&result, r"（[^）]*）");
    }
    if config.ignore_asterisks {
        result = strip_pattern(&result, r"\*[^*]*\*");
        result = result.replace('*', "");
    }
    if config.ignore_angle_brackets {
        result = strip_pattern(&result, r"<[^>]*>");
    }
    if config.ignore_hyphens {
        result = result.replace('-', " ");
    }
    if config.ignore_slashes {
        result = result.replace('/', " ");
    }
    if config.remove_special_char {
        result = result
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || KEPT_PUNCT.contains(*c))
            .collect();
    }

    collapse_whitespace(&result)
}

fn strip_pattern(text: &str, pattern: &str) -> String {
    Regex::new(pattern)
        .expect("static pattern")
        .replace_all(text, "")
        .into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
