//! Actions extractor: lifts bracketed expression tokens declared by the
//! Live2D model out of the sentence.

use regex::Regex;

/// Remove `[expression]` tokens that match a declared expression and return
/// them, in order, alongside the cleaned text. Unknown bracketed tokens are
/// left in place for the TTS filter to deal with.
pub fn extract_actions(text: &str, expressions: &[String]) -> (String, Vec<String>) {
    let pattern = Regex::new(r"\[([a-zA-Z_][a-zA-Z0-9_]*)\]").expect("static pattern");
    let mut actions = Vec::new();

    let cleaned = pattern.replace_all(text, |caps: &regex::Captures<'_>| {
        let token = caps[1].to_lowercase();
        if expressions.iter().any(|e| e.to_lowercase() == token) {
            actions.push(token);
            String::new()
        } else {
            caps[0].to_string()
        }
    });

    (collapse_spaces(cleaned.trim()), actions)
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for ch in text.chars() {
        if ch == ' ' {
            if !last_space {
                out.push(ch);
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expressions() -> Vec<String> {
        vec!["joy".into(), "anger".into(), "sadness".into()]
    }

    #[test]
    fn known_expressions_are_extracted_in_order() {
        let (text, actions) = extract_actions("[joy] Hi! [sadness] Bye.", &expressions());
        assert_eq!(text, "Hi! Bye.");
        assert_eq!(actions, vec!["joy".to_string(), "sadness".to_string()]);
    }

    #[test]
    fn unknown_tokens_stay_in_text() {
        let (text, actions) = extract_actions("[whatever] Hello", &expressions());
        assert_eq!(text, "[whatever] Hello");
        assert!(actions.is_empty());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let (text, actions) = extract_actions("[Joy] Great!", &expressions());
        assert_eq!(text, "Great!");
        assert_eq!(actions, vec!["joy".to_string()]);
    }

    #[test]
    fn no_brackets_passes_through() {
        let (text, actions) = extract_actions("plain sentence", &expressions());
        assert_eq!(text, "plain sentence");
        assert!(actions.is_empty());
    }
}
