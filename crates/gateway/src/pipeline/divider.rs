//! Sentence divider: splits a stream of text deltas on sentence boundaries.
//!
//! Two strategies: a simple regex splitter and a rule-based segmenter that
//! refuses to split inside quotes, brackets or decimal numbers. Configured
//! valid tags (e.g. `<think>…</think>`) are lifted out as structured
//! elements and never reach the spoken stream.

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMethod {
    Regex,
    Rule,
}

impl SegmentMethod {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "regex" => SegmentMethod::Regex,
            _ => SegmentMethod::Rule,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SentenceItem {
    Sentence(String),
    /// A complete `<tag>…</tag>` block for a configured valid tag.
    Tagged { tag: String, content: String },
}

const TERMINALS: &[char] = &['.', '!', '?', '。', '！', '？', '…', ';', '；', '\n'];
const EARLY_SPLITS: &[char] = &[',', '，', '、'];
const CLOSERS: &[char] = &['"', '\'', '」', '』', '）', ')', '”'];

pub struct SentenceDivider {
    method: SegmentMethod,
    faster_first_response: bool,
    valid_tags: Vec<String>,
    buffer: String,
    emitted_first: bool,
    open_tag: Option<String>,
    regex_boundary: Regex,
}

impl SentenceDivider {
    pub fn new(method: SegmentMethod, faster_first_response: bool, valid_tags: Vec<String>) -> Self {
        Self {
            method,
            faster_first_response,
            valid_tags,
            buffer: String::new(),
            emitted_first: false,
            open_tag: None,
            regex_boundary: Regex::new(r"[.!?。！？…;；\n]+").expect("static pattern"),
        }
    }

    /// Feed one delta; returns every item completed by it.
    pub fn push(&mut self, delta: &str) -> Vec<SentenceItem> {
        self.buffer.push_str(delta);
        let mut items = Vec::new();

        loop {
            if let Some(tag) = self.open_tag.clone() {
                let close = format!("</{tag}>");
                match self.buffer.find(&close) {
                    Some(pos) => {
                        let content = self.buffer[..pos].trim().to_string();
                        self.buffer.drain(..pos + close.len());
                        self.open_tag = None;
                        if !content.is_empty() {
                            items.push(SentenceItem::Tagged { tag, content });
                        }
                        continue;
                    }
                    None => break,
                }
            }

            let tag_open = self.find_tag_open();
            let boundary = self.find_boundary();

            match (tag_open, boundary) {
                (Some((tag_pos, tag, open_len)), boundary)
                    if boundary.map_or(true, |b| tag_pos < b) =>
                {
                    // Flush any text running up to the tag, then enter it.
                    let before = self.buffer[..tag_pos].trim().to_string();
                    self.buffer.drain(..tag_pos + open_len);
                    self.open_tag = Some(tag);
                    if has_speakable_content(&before) {
                        self.emitted_first = true;
                        items.push(SentenceItem::Sentence(before));
                    }
                    continue;
                }
                (_, Some(end)) => {
                    let sentence = self.buffer[..end].trim().to_string();
                    self.buffer.drain(..end);
                    if has_speakable_content(&sentence) {
                        self.emitted_first = true;
                        items.push(SentenceItem::Sentence(sentence));
                    }
                    continue;
                }
                _ => break,
            }
        }

        items
    }

    /// Emit whatever is left (called when the agent stream ends).
    pub fn flush(&mut self) -> Vec<SentenceItem> {
        let mut items = Vec::new();
        if let Some(tag) = self.open_tag.take() {
            // Unclosed tag at end of stream; surface what we have.
            let content = std::mem::take(&mut self.buffer).trim().to_string();
            if !content.is_empty() {
                items.push(SentenceItem::Tagged { tag, content });
            }
            return items;
        }
        let rest = std::mem::take(&mut self.buffer).trim().to_string();
        if has_speakable_content(&rest) {
            items.push(SentenceItem::Sentence(rest));
        }
        items
    }

    /// Earliest complete `<tag>` opener for a configured tag:
    /// `(byte position, tag, opener length)`.
    fn find_tag_open(&self) -> Option<(usize, String, usize)> {
        self.valid_tags
            .iter()
            .filter_map(|tag| {
                let open = format!("<{tag}>");
                self.buffer.find(&open).map(|pos| (pos, tag.clone(), open.len()))
            })
            .min_by_key(|(pos, _, _)| *pos)
    }

    /// Byte index just past the next sentence boundary, if one is complete.
    fn find_boundary(&self) -> Option<usize> {
        let early_split = self.faster_first_response && !self.emitted_first;
        match self.method {
            SegmentMethod::Regex => {
                let m = self.regex_boundary.find(&self.buffer)?;
                // The punctuation run may still be growing (e.g. "..."),
                // unless terminated by following text.
                if m.end() == self.buffer.len() {
                    None
                } else {
                    Some(self.consume_closers(m.end()))
                }
            }
            SegmentMethod::Rule => self.rule_boundary(early_split),
        }
    }

    fn rule_boundary(&self, early_split: bool) -> Option<usize> {
        let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
        let mut quote_depth = 0i32;

        for (i, &(_, ch)) in chars.iter().enumerate() {
            match ch {
                '"' => quote_depth = 1 - quote_depth,
                '「' | '『' | '（' | '(' => quote_depth += 1,
                '」' | '』' | '）' | ')' => quote_depth = (quote_depth - 1).max(0),
                _ => {}
            }
            if quote_depth > 0 {
                continue;
            }

            let terminal = TERMINALS.contains(&ch);
            let early = early_split && EARLY_SPLITS.contains(&ch);
            if !terminal && !early {
                continue;
            }

            // "3.14" must not split after the 3.
            if ch == '.' {
                let prev_digit = i > 0 && chars[i - 1].1.is_ascii_digit();
                let next_digit = chars.get(i + 1).map_or(false, |&(_, c)| c.is_ascii_digit());
                if prev_digit && next_digit {
                    continue;
                }
            }

            // Let a punctuation run ("?!", "...") finish before cutting.
            let mut j = i + 1;
            while j < chars.len() && TERMINALS.contains(&chars[j].1) {
                j += 1;
            }
            if j == chars.len() && !ch.eq(&'\n') {
                // Run may continue in the next delta.
                return None;
            }

            let end = chars.get(j).map_or(self.buffer.len(), |&(p, _)| p);
            return Some(self.consume_closers(end));
        }

        None
    }

    /// Attach closing quotes right after the boundary to the sentence.
    fn consume_closers(&self, mut end: usize) -> usize {
        while let Some(ch) = self.buffer[end..].chars().next() {
            if CLOSERS.contains(&ch) {
                end += ch.len_utf8();
            } else {
                break;
            }
        }
        end
    }
}

/// Pure punctuation is not worth a sentence unit.
fn has_speakable_content(text: &str) -> bool {
    text.chars().any(|c| c.is_alphanumeric())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_divider() -> SentenceDivider {
        SentenceDivider::new(SegmentMethod::Rule, false, vec!["think".into()])
    }

    fn sentences(items: &[SentenceItem]) -> Vec<String> {
        items
            .iter()
            .filter_map(|i| match i {
                SentenceItem::Sentence(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn splits_on_terminal_punctuation() {
        let mut div = rule_divider();
        let mut items = div.push("First sentence. Second one! And a trailing bit");
        items.extend(div.flush());
        assert_eq!(
            sentences(&items),
            vec!["First sentence.", "Second one!", "And a trailing bit"]
        );
    }

    #[test]
    fn accumulates_across_deltas() {
        let mut div = rule_divider();
        assert!(div.push("Hello wor").is_empty());
        let items = div.push("ld. Next");
        assert_eq!(sentences(&items), vec!["Hello world."]);
        assert_eq!(sentences(&div.flush()), vec!["Next"]);
    }

    #[test]
    fn decimal_numbers_do_not_split() {
        let mut div = rule_divider();
        let mut items = div.push("Pi is 3.14 roughly. Yes");
        items.extend(div.flush());
        assert_eq!(sentences(&items), vec!["Pi is 3.14 roughly.", "Yes"]);
    }

    #[test]
    fn punctuation_runs_stay_together() {
        let mut div = rule_divider();
        let items = div.push("Really?! I had no idea. More");
        assert_eq!(sentences(&items), vec!["Really?!", "I had no idea."]);
    }

    #[test]
    fn cjk_terminal_punctuation() {
        let mut div = rule_divider();
        let items = div.push("你好。今天天气不错！明天");
        assert_eq!(sentences(&items), vec!["你好。", "今天天气不错！"]);
    }

    #[test]
    fn no_split_inside_quotes() {
        let mut div = rule_divider();
        let mut items = div.push("She said \"stop. right there\" and left. Done");
        items.extend(div.flush());
        assert_eq!(
            sentences(&items),
            vec!["She said \"stop. right there\" and left.", "Done"]
        );
    }

    #[test]
    fn faster_first_response_splits_on_first_comma() {
        let mut div = SentenceDivider::new(SegmentMethod::Rule, true, Vec::new());
        let items = div.push("Well, let me think about that for a moment");
        assert_eq!(sentences(&items), vec!["Well,"]);
        // Only the first emission is eager.
        let mut items = div.push(". Then, we continue");
        items.extend(div.flush());
        assert_eq!(
            sentences(&items),
            vec!["let me think about that for a moment.", "Then, we continue"]
        );
    }

    #[test]
    fn think_tag_lifted_out_as_structured_element() {
        let mut div = rule_divider();
        let mut items = div.push("Sure. <think>weighing options</think>Here you go. ");
        items.extend(div.flush());

        assert_eq!(
            items,
            vec![
                SentenceItem::Sentence("Sure.".into()),
                SentenceItem::Tagged {
                    tag: "think".into(),
                    content: "weighing options".into()
                },
                SentenceItem::Sentence("Here you go.".into()),
            ]
        );
    }

    #[test]
    fn tag_split_across_deltas() {
        let mut div = rule_divider();
        assert!(div.push("<think>half ").is_empty());
        let items = div.push("done</think>After. ");
        assert_eq!(
            items,
            vec![
                SentenceItem::Tagged {
                    tag: "think".into(),
                    content: "half done".into()
                },
                SentenceItem::Sentence("After.".into()),
            ]
        );
    }

    #[test]
    fn unclosed_tag_flushes_as_tagged() {
        let mut div = rule_divider();
        div.push("<think>never closed");
        let items = div.flush();
        assert_eq!(
            items,
            vec![SentenceItem::Tagged {
                tag: "think".into(),
                content: "never closed".into()
            }]
        );
    }

    #[test]
    fn pure_punctuation_is_dropped() {
        let mut div = rule_divider();
        let mut items = div.push("... ");
        items.extend(div.flush());
        assert!(items.is_empty());
    }

    #[test]
    fn regex_method_splits_plainly() {
        let mut div = SentenceDivider::new(SegmentMethod::Regex, false, Vec::new());
        let mut items = div.push("One. Two! Three");
        items.extend(div.flush());
        assert_eq!(sentences(&items), vec!["One.", "Two!", "Three"]);
    }
}
