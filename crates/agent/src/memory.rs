//! Bounded chat memory.
//!
//! The window is capped at a handful of messages to keep prompt size and
//! first-token latency flat over long sessions. Appends are deduplicated:
//! two byte-identical consecutive entries of the same role collapse into
//! one, and empty assistant text is never stored.

use aria_domain::chat::{ChatMessage, Role};
use aria_domain::config::InterruptMethod;

pub struct ChatMemory {
    entries: Vec<ChatMessage>,
    cap: usize,
    interrupt_method: InterruptMethod,
    interrupt_handled: bool,
}

impl ChatMemory {
    pub fn new(cap: usize, interrupt_method: InterruptMethod) -> Self {
        Self {
            entries: Vec::new(),
            cap: cap.max(1),
            interrupt_method,
            interrupt_handled: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.clone()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.entries.last()
    }

    /// Append one message, enforcing the dedup and cap invariants.
    pub fn append(&mut self, message: ChatMessage) {
        if message.role == Role::Assistant && message.content.is_empty() {
            return;
        }

        if let Some(last) = self.entries.last() {
            if last.role == message.role && last.content == message.content {
                return;
            }
        }

        self.entries.push(message);
        if self.entries.len() > self.cap {
            let overflow = self.entries.len() - self.cap;
            self.entries.drain(..overflow);
        }
    }

    /// Replace the window with history entries (oldest first).
    pub fn load_from_history(&mut self, messages: Vec<ChatMessage>) {
        self.entries.clear();
        for msg in messages {
            if msg.content.is_empty() {
                tracing::warn!("skipping empty message from history");
                continue;
            }
            self.append(msg);
        }
        tracing::info!(count = self.entries.len(), "memory loaded from history");
    }

    /// Truncate the in-flight assistant reply to what the client actually
    /// heard and record the interruption marker.
    ///
    /// Idempotent per turn: a second interrupt on the same turn is a no-op
    /// until [`reset_interrupt`](Self::reset_interrupt) is called.
    pub fn handle_interrupt(&mut self, heard_response: &str) {
        if self.interrupt_handled {
            return;
        }
        self.interrupt_handled = true;

        let truncated = format!("{heard_response}...");
        match self.entries.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                last.content = truncated;
            }
            _ => {
                if !heard_response.is_empty() {
                    self.append(ChatMessage::assistant(truncated));
                }
            }
        }

        let marker = match self.interrupt_method {
            InterruptMethod::System => ChatMessage::system("[Interrupted by user]"),
            InterruptMethod::User => ChatMessage::user("[Interrupted by user]"),
        };
        self.append(marker);
        tracing::info!(method = ?self.interrupt_method, "interrupt recorded in memory");
    }

    /// Arm interrupt handling for a fresh turn.
    pub fn reset_interrupt(&mut self) {
        self.interrupt_handled = false;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ChatMemory {
        ChatMemory::new(6, InterruptMethod::User)
    }

    #[test]
    fn cap_is_enforced_keeping_newest() {
        let mut mem = memory();
        for i in 0..10 {
            mem.append(ChatMessage::user(format!("message {i}")));
        }
        assert_eq!(mem.len(), 6);
        assert_eq!(mem.last().unwrap().content, "message 9");
    }

    #[test]
    fn adjacent_duplicates_are_dropped() {
        let mut mem = memory();
        mem.append(ChatMessage::user("hello"));
        mem.append(ChatMessage::user("hello"));
        assert_eq!(mem.len(), 1);

        // Same content with a different role is kept.
        mem.append(ChatMessage::assistant("hello"));
        assert_eq!(mem.len(), 2);
    }

    #[test]
    fn empty_assistant_text_is_not_stored() {
        let mut mem = memory();
        mem.append(ChatMessage::assistant(""));
        assert!(mem.is_empty());
    }

    #[test]
    fn interrupt_truncates_last_assistant_entry() {
        let mut mem = memory();
        mem.append(ChatMessage::user("tell me a story"));
        mem.append(ChatMessage::assistant("Once upon a time, in a land far"));

        mem.handle_interrupt("Once upon");
        let entries = mem.snapshot();
        assert_eq!(entries[1].content, "Once upon...");
        assert_eq!(entries[2].role, Role::User);
        assert_eq!(entries[2].content, "[Interrupted by user]");
    }

    #[test]
    fn interrupt_with_no_assistant_entry_creates_one() {
        let mut mem = memory();
        mem.append(ChatMessage::user("hi"));
        mem.handle_interrupt("he");
        let entries = mem.snapshot();
        assert_eq!(entries[1].content, "he...");
        assert_eq!(entries[2].content, "[Interrupted by user]");
    }

    #[test]
    fn second_interrupt_is_a_noop() {
        let mut mem = memory();
        mem.append(ChatMessage::assistant("some reply"));
        mem.handle_interrupt("som");
        let len_after_first = mem.len();
        mem.handle_interrupt("so");
        assert_eq!(mem.len(), len_after_first);
        assert_eq!(mem.snapshot()[0].content, "som...");
    }

    #[test]
    fn system_interrupt_method_uses_system_role() {
        let mut mem = ChatMemory::new(6, InterruptMethod::System);
        mem.append(ChatMessage::assistant("reply"));
        mem.handle_interrupt("re");
        assert_eq!(mem.last().unwrap().role, Role::System);
    }

    #[test]
    fn reset_rearms_interrupt() {
        let mut mem = memory();
        mem.append(ChatMessage::assistant("one"));
        mem.handle_interrupt("o");
        mem.reset_interrupt();
        mem.append(ChatMessage::assistant("two"));
        mem.handle_interrupt("t");
        assert_eq!(mem.snapshot().last().unwrap().content, "[Interrupted by user]");
        let texts: Vec<_> = mem.snapshot().iter().map(|m| m.content.clone()).collect();
        assert!(texts.contains(&"t...".to_string()));
    }

    #[test]
    fn load_from_history_replaces_and_respects_cap() {
        let mut mem = memory();
        mem.append(ChatMessage::user("old"));
        let history: Vec<_> = (0..8)
            .map(|i| ChatMessage::user(format!("h{i}")))
            .collect();
        mem.load_from_history(history);
        assert_eq!(mem.len(), 6);
        assert_eq!(mem.last().unwrap().content, "h7");
    }
}
