//! Conversation transcript accumulation.
//!
//! Complete utterances are appended directly; streamed assistant text is
//! buffered with [`TranscriptAccumulator::accumulate`] and committed as a single
//! entry by [`TranscriptAccumulator::flush`] at a turn boundary or session end.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Speaker of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl TranscriptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptRole::User => "user",
            TranscriptRole::Assistant => "assistant",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TranscriptRole::User => "User",
            TranscriptRole::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub content: String,
    /// Seconds since the session started
    pub timestamp: f64,
}

/// Ordered transcript plus the in-flight assistant buffer.
#[derive(Debug)]
pub struct TranscriptAccumulator {
    started_at: Instant,
    entries: Vec<TranscriptEntry>,
    pending: String,
}

impl Default for TranscriptAccumulator {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl TranscriptAccumulator {
    pub fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            entries: Vec::new(),
            pending: String::new(),
        }
    }

    /// Commit a complete utterance. Blank text is dropped.
    pub fn append(&mut self, role: TranscriptRole, text: &str) -> bool {
        let content = text.trim();
        if content.is_empty() {
            return false;
        }
        self.entries.push(TranscriptEntry {
            role,
            content: content.to_string(),
            timestamp: self.started_at.elapsed().as_secs_f64(),
        });
        true
    }

    /// Buffer a streamed assistant delta.
    pub fn accumulate(&mut self, delta: &str) {
        self.pending.push_str(delta);
    }

    /// Commit the buffered assistant text as one entry and clear the buffer.
    /// Returns whether an entry was added.
    pub fn flush(&mut self) -> bool {
        let pending = std::mem::take(&mut self.pending);
        self.append(TranscriptRole::Assistant, &pending)
    }

    /// Drop the buffered assistant text without committing it.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// `[User]: ...` / `[Assistant]: ...` paragraphs in append order.
    pub fn format(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("[{}]: {}", e.role.label(), e.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Shared handle to a session transcript.
///
/// Reads never wait on session progress: the lock is only held for the
/// duration of a single append or copy.
#[derive(Debug, Clone)]
pub struct TranscriptHandle(Arc<Mutex<TranscriptAccumulator>>);

impl TranscriptHandle {
    pub fn new(started_at: Instant) -> Self {
        Self(Arc::new(Mutex::new(TranscriptAccumulator::new(started_at))))
    }

    pub fn append(&self, role: TranscriptRole, text: &str) -> bool {
        self.0.lock().append(role, text)
    }

    pub fn accumulate(&self, delta: &str) {
        self.0.lock().accumulate(delta);
    }

    pub fn flush(&self) -> bool {
        self.0.lock().flush()
    }

    pub fn discard_pending(&self) {
        self.0.lock().discard_pending();
    }

    pub fn pending(&self) -> String {
        self.0.lock().pending().to_string()
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.0.lock().entries().to_vec()
    }

    pub fn format(&self) -> String {
        self.0.lock().format()
    }
}

impl Default for TranscriptHandle {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_exact() {
        let mut t = TranscriptAccumulator::default();
        t.append(TranscriptRole::User, "hello");
        t.append(TranscriptRole::Assistant, "hi there");
        assert_eq!(t.format(), "[User]: hello\n\n[Assistant]: hi there");
    }

    #[test]
    fn test_flush_commits_trimmed_concatenation() {
        let mut t = TranscriptAccumulator::default();
        for delta in ["  Hel", "lo, ", "world!  "] {
            t.accumulate(delta);
        }
        assert!(t.flush());
        assert_eq!(t.entries().len(), 1);
        assert_eq!(t.entries()[0].content, "Hello, world!");
        assert_eq!(t.entries()[0].role, TranscriptRole::Assistant);
        assert!(t.pending().is_empty());

        // Second flush has nothing to commit
        assert!(!t.flush());
        assert_eq!(t.entries().len(), 1);
    }

    #[test]
    fn test_discarded_text_is_not_committed() {
        let t = TranscriptHandle::default();
        t.accumulate("We are open from nine");
        assert_eq!(t.pending(), "We are open from nine");
        t.discard_pending();
        assert!(!t.flush());
        assert!(t.entries().is_empty());
    }

    #[test]
    fn test_blank_flush_adds_nothing() {
        let mut t = TranscriptAccumulator::default();
        t.accumulate("  ");
        t.accumulate("\n");
        assert!(!t.flush());
        assert!(t.entries().is_empty());
    }

    #[test]
    fn test_blank_append_dropped() {
        let mut t = TranscriptAccumulator::default();
        assert!(!t.append(TranscriptRole::User, "   "));
        assert_eq!(t.format(), "");
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let mut t = TranscriptAccumulator::default();
        t.append(TranscriptRole::User, "a");
        t.append(TranscriptRole::Assistant, "b");
        let entries = t.entries();
        assert!(entries[1].timestamp >= entries[0].timestamp);
    }

    #[test]
    fn test_entry_serializes_lowercase_role() {
        let entry = TranscriptEntry {
            role: TranscriptRole::User,
            content: "hi".into(),
            timestamp: 1.5,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_handle_shares_state() {
        let handle = TranscriptHandle::default();
        let reader = handle.clone();
        handle.append(TranscriptRole::User, "hello");
        handle.accumulate("hi");
        assert_eq!(reader.pending(), "hi");
        handle.flush();
        assert_eq!(reader.entries().len(), 2);
    }
}
