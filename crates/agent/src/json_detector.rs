//! Incremental JSON envelope detector for prompt-mode tool calls.
//!
//! In prompt mode the model announces tool calls by emitting a JSON object
//! or array inside its normal text stream. The detector watches streamed
//! chunks, tracks brace/bracket depth with string awareness, and yields the
//! parsed value as soon as the envelope balances.

use serde_json::Value;

#[derive(Default)]
pub struct StreamJsonDetector {
    buffer: String,
    depth: i32,
    in_string: bool,
    escaped: bool,
    started: bool,
}

impl StreamJsonDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of streamed text. Returns the parsed JSON value once
    /// a complete envelope has been seen.
    pub fn process_chunk(&mut self, chunk: &str) -> Option<Value> {
        for ch in chunk.chars() {
            if !self.started {
                if ch == '{' || ch == '[' {
                    self.started = true;
                    self.depth = 1;
                    self.buffer.clear();
                    self.buffer.push(ch);
                }
                continue;
            }

            self.buffer.push(ch);

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }

            match ch {
                '"' => self.in_string = true,
                '{' | '[' => self.depth += 1,
                '}' | ']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let candidate = std::mem::take(&mut self.buffer);
                        self.reset();
                        match serde_json::from_str::<Value>(&candidate) {
                            Ok(value) => return Some(value),
                            Err(e) => {
                                // Mismatched closers; keep scanning the rest
                                // of the chunk from scratch.
                                tracing::debug!(error = %e, "balanced candidate did not parse");
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        None
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.started = false;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_object_split_across_chunks() {
        let mut det = StreamJsonDetector::new();
        assert!(det.process_chunk("Let me check. {\"name\": ").is_none());
        assert!(det.process_chunk("\"get_time\", \"args\": {").is_none());
        let value = det.process_chunk("\"tz\": \"UTC\"}}").unwrap();
        assert_eq!(value["name"], "get_time");
        assert_eq!(value["args"]["tz"], "UTC");
    }

    #[test]
    fn detects_array_envelope() {
        let mut det = StreamJsonDetector::new();
        let value = det.process_chunk(r#"[{"name":"a","args":{}}]"#).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let mut det = StreamJsonDetector::new();
        let value = det.process_chunk(r#"{"text": "look: } and { are fine"}"#).unwrap();
        assert_eq!(value["text"], "look: } and { are fine");
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let mut det = StreamJsonDetector::new();
        let value = det.process_chunk(r#"{"text": "she said \"hi\""}"#).unwrap();
        assert_eq!(value["text"], "she said \"hi\"");
    }

    #[test]
    fn plain_text_yields_nothing() {
        let mut det = StreamJsonDetector::new();
        assert!(det.process_chunk("just a normal sentence.").is_none());
    }

    #[test]
    fn reset_discards_partial_state() {
        let mut det = StreamJsonDetector::new();
        assert!(det.process_chunk("{\"partial\": ").is_none());
        det.reset();
        let value = det.process_chunk("{\"fresh\": 1}").unwrap();
        assert_eq!(value["fresh"], 1);
    }

    #[test]
    fn detector_is_reusable_after_detection() {
        let mut det = StreamJsonDetector::new();
        assert!(det.process_chunk("{\"a\": 1}").is_some());
        assert!(det.process_chunk("no json here").is_none());
        assert!(det.process_chunk("{\"b\": 2}").is_some());
    }
}
