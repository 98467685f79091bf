//! Where the caller is in the assistant audio sent to the transport.
//!
//! Providers and synthesizers deliver audio faster than real time, so the
//! amount forwarded says little about what the caller has heard. The clock
//! assumes the telephony side plays forwarded audio back to back, starting
//! each chunk when it arrives or when the previous one ends.

use std::time::{Duration, Instant};

use crate::core::audio::{mulaw_duration, mulaw_duration_ms};

#[derive(Debug, Default, Clone)]
pub(super) struct PlaybackClock {
    bytes: usize,
    ends_at: Option<Instant>,
}

impl PlaybackClock {
    /// Account for `bytes` of µ-law audio forwarded just now.
    pub fn record(&mut self, bytes: usize) {
        self.record_at(bytes, Instant::now());
    }

    fn record_at(&mut self, bytes: usize, now: Instant) {
        let start = match self.ends_at {
            Some(end) if end > now => end,
            _ => now,
        };
        self.ends_at = Some(start + mulaw_duration(bytes));
        self.bytes += bytes;
    }

    pub fn forwarded_ms(&self) -> u64 {
        mulaw_duration_ms(self.bytes)
    }

    /// When the audio forwarded so far finishes playing.
    pub fn ends_at(&self) -> Option<Instant> {
        self.ends_at
    }

    pub fn is_playing(&self) -> bool {
        !self.remaining_at(Instant::now()).is_zero()
    }

    /// Milliseconds of forwarded audio the caller has heard.
    pub fn heard_ms(&self) -> u64 {
        self.heard_ms_at(Instant::now())
    }

    fn heard_ms_at(&self, now: Instant) -> u64 {
        let remaining = self.remaining_at(now).as_millis() as u64;
        self.forwarded_ms().saturating_sub(remaining)
    }

    fn remaining_at(&self, now: Instant) -> Duration {
        self.ends_at
            .map(|end| end.saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Start counting a new segment queued behind whatever is still playing.
    pub fn start_segment(&mut self) {
        self.bytes = 0;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Leading part of `text` spoken in the first `heard_ms` of `total_ms` of
/// audio, assuming an even speaking rate. A word is kept only once all of it
/// was heard.
pub(super) fn heard_text(text: &str, heard_ms: u64, total_ms: u64) -> &str {
    let text = text.trim();
    if total_ms == 0 || heard_ms >= total_ms {
        return text;
    }
    let chars = text.chars().count() as u64 * heard_ms / total_ms;
    let cut = text
        .char_indices()
        .nth(chars as usize)
        .map_or(text.len(), |(i, _)| i);
    let head = &text[..cut];
    match text[cut..].chars().next() {
        Some(next) if !next.is_whitespace() => head
            .rfind(char::is_whitespace)
            .map_or("", |i| head[..i].trim_end()),
        _ => head.trim_end(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 800;

    #[test]
    fn test_burst_plays_back_to_back() {
        let start = Instant::now();
        let mut clock = PlaybackClock::default();
        for _ in 0..20 {
            clock.record_at(CHUNK, start);
        }
        assert_eq!(clock.forwarded_ms(), 2000);
        assert_eq!(clock.ends_at(), Some(start + Duration::from_secs(2)));
        assert_eq!(clock.heard_ms_at(start + Duration::from_millis(200)), 200);
        assert_eq!(clock.heard_ms_at(start + Duration::from_secs(3)), 2000);
    }

    #[test]
    fn test_gap_restarts_playback() {
        let start = Instant::now();
        let mut clock = PlaybackClock::default();
        clock.record_at(CHUNK, start);
        // Next chunk arrives after the first finished playing
        let later = start + Duration::from_millis(500);
        clock.record_at(CHUNK, later);
        assert_eq!(clock.ends_at(), Some(later + Duration::from_millis(100)));
        assert_eq!(clock.heard_ms_at(later), 100);
    }

    #[test]
    fn test_segment_queued_behind_previous() {
        let start = Instant::now();
        let mut clock = PlaybackClock::default();
        clock.record_at(CHUNK * 10, start);
        clock.start_segment();
        clock.record_at(CHUNK * 5, start + Duration::from_millis(200));
        assert_eq!(clock.forwarded_ms(), 500);
        assert_eq!(clock.heard_ms_at(start + Duration::from_millis(500)), 0);
        assert_eq!(clock.heard_ms_at(start + Duration::from_millis(1300)), 300);
    }

    #[test]
    fn test_idle_clock() {
        let mut clock = PlaybackClock::default();
        assert!(!clock.is_playing());
        assert_eq!(clock.heard_ms(), 0);

        clock.record(CHUNK * 50);
        assert!(clock.is_playing());
        assert!(clock.heard_ms() < 1000);

        clock.reset();
        assert!(!clock.is_playing());
        assert_eq!(clock.forwarded_ms(), 0);
    }

    #[test]
    fn test_heard_text_cuts_at_word_boundary() {
        let text = "We are open from nine until five on weekdays.";
        assert_eq!(heard_text(text, 2000, 2000), text);
        assert_eq!(heard_text(text, 300, 2000), "We are");
        assert_eq!(heard_text(text, 250, 2000), "We");
        assert_eq!(heard_text(text, 10, 2000), "");
        assert_eq!(heard_text(text, 0, 0), text);
    }
}
