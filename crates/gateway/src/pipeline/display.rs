//! Display processor: the on-screen form of a sentence.
//!
//! Emojis and tag content survive here; only the TTS filter strips them.

use aria_protocol::DisplayText;

pub fn build_display_text(text: &str, name: Option<&str>, avatar: Option<&str>) -> DisplayText {
    DisplayText {
        text: text.trim().to_string(),
        name: name.map(str::to_string),
        avatar: avatar.filter(|a| !a.is_empty()).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_emojis_and_attribution() {
        let display = build_display_text("Hello! 🎉", Some("Aria"), Some("aria.png"));
        assert_eq!(display.text, "Hello! 🎉");
        assert_eq!(display.name.as_deref(), Some("Aria"));
        assert_eq!(display.avatar.as_deref(), Some("aria.png"));
    }

    #[test]
    fn empty_avatar_is_dropped() {
        let display = build_display_text("hi", Some("Aria"), Some(""));
        assert!(display.avatar.is_none());
    }
}
