//! Append-only record of everything generated so far.
//!
//! The worker owns one [`GenerationHistory`] behind a read-write lock: the
//! generation thread appends tokens and decoded notes, the playback thread
//! reads completed notes, and a rewind truncates both sequences in lockstep.
//! Each note remembers the index of the token that completed it, which is
//! what lets a tick-addressed rewind cut the token tail at the right place.

use crate::note::Note;
use crate::tokenizer::Token;

/// Result of a history truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    /// The tick the cut actually landed on (the requested target).
    pub resolved_tick: i64,
    /// Token count after the cut.
    pub token_len: usize,
    /// Note count after the cut.
    pub note_len: usize,
}

/// Token and note sequences produced by one generation run.
#[derive(Debug, Default)]
pub struct GenerationHistory {
    tokens: Vec<Token>,
    notes: Vec<Note>,
    // For each note, the index into `tokens` of the token that completed it.
    note_token_index: Vec<usize>,
}

impl GenerationHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a generated (or seed) token.
    pub fn push_token(&mut self, token: Token) {
        self.tokens.push(token);
    }

    /// Appends a decoded note, recording which token completed it.
    pub fn append_note(&mut self, note: Note, source_token_index: usize) {
        debug_assert!(source_token_index < self.tokens.len());
        self.notes.push(note);
        self.note_token_index.push(source_token_index);
    }

    /// All tokens, seed included, in generation order.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// All decoded notes in decode order. Ticks are lib ticks and are not
    /// guaranteed monotonic (position symbols can move the cursor backward
    /// within a bar).
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Number of decoded notes.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Returns whether no notes have been decoded yet.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Number of tokens, seed included.
    pub fn token_len(&self) -> usize {
        self.tokens.len()
    }

    /// The most recently generated token, if any.
    pub fn last_token(&self) -> Option<Token> {
        self.tokens.last().copied()
    }

    /// Tick of the most recently decoded note, if any.
    pub fn last_note_tick(&self) -> Option<i64> {
        self.notes.last().map(|n| n.tick)
    }

    /// Pitches of the most recent `window` tokens' notes, most recent last.
    ///
    /// Used by the repetition penalty; returns fewer than `window` entries
    /// when the history is shorter.
    pub fn recent_pitches(&self, window: usize) -> impl Iterator<Item = i32> + '_ {
        let start = self.notes.len().saturating_sub(window);
        self.notes[start..].iter().map(|n| n.pitch)
    }

    /// Cuts everything strictly after `tick`.
    ///
    /// The first note with `note.tick > tick` and every note after it are
    /// removed, along with the token tail starting at the token that
    /// completed that note. Returns `None` when no note lies beyond the
    /// target, in which case nothing changes.
    pub fn truncate_from_tick(&mut self, tick: i64) -> Option<Truncation> {
        let cut = self.notes.iter().position(|n| n.tick > tick)?;
        let token_cut = self.note_token_index[cut];
        self.notes.truncate(cut);
        self.note_token_index.truncate(cut);
        self.tokens.truncate(token_cut);
        Some(Truncation {
            resolved_tick: tick,
            token_len: self.tokens.len(),
            note_len: self.notes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(tick: i64, pitch: i32) -> Note {
        Note {
            tick,
            duration: 4,
            pitch,
            velocity: 90,
        }
    }

    /// Three notes, each completed by the fourth token of its TSD group.
    fn sample_history() -> GenerationHistory {
        let mut h = GenerationHistory::new();
        for (i, (tick, pitch)) in [(0, 60), (8, 64), (16, 67)].iter().enumerate() {
            for t in 0..4 {
                h.push_token((i * 4 + t) as Token);
            }
            h.append_note(note(*tick, *pitch), i * 4 + 3);
        }
        h
    }

    #[test]
    fn test_append_tracks_lengths() {
        let h = sample_history();
        assert_eq!(h.token_len(), 12);
        assert_eq!(h.len(), 3);
        assert_eq!(h.last_note_tick(), Some(16));
        assert_eq!(h.last_token(), Some(11));
    }

    #[test]
    fn test_truncate_cuts_notes_and_token_tail() {
        let mut h = sample_history();
        let t = h.truncate_from_tick(8).unwrap();
        // The note at tick 16 goes; its completing token (index 11) starts
        // the removed token tail.
        assert_eq!(t, Truncation { resolved_tick: 8, token_len: 11, note_len: 2 });
        assert_eq!(h.notes().len(), 2);
        assert_eq!(h.tokens().len(), 11);
        assert_eq!(h.last_note_tick(), Some(8));
    }

    #[test]
    fn test_truncate_mid_gap_keeps_earlier_note() {
        let mut h = sample_history();
        let t = h.truncate_from_tick(10).unwrap();
        assert_eq!(t.note_len, 2);
        assert!(h.notes().iter().all(|n| n.tick <= 10));
    }

    #[test]
    fn test_truncate_beyond_history_is_noop() {
        let mut h = sample_history();
        assert!(h.truncate_from_tick(16).is_none());
        assert!(h.truncate_from_tick(1000).is_none());
        assert_eq!(h.len(), 3);
        assert_eq!(h.token_len(), 12);
    }

    #[test]
    fn test_truncate_to_before_everything() {
        let mut h = sample_history();
        let t = h.truncate_from_tick(-1).unwrap();
        assert_eq!(t.note_len, 0);
        // Tokens before the first note's completing token survive.
        assert_eq!(t.token_len, 3);
    }

    #[test]
    fn test_recent_pitches_window() {
        let h = sample_history();
        let recent: Vec<i32> = h.recent_pitches(2).collect();
        assert_eq!(recent, vec![64, 67]);
        let all: Vec<i32> = h.recent_pitches(10).collect();
        assert_eq!(all, vec![60, 64, 67]);
    }
}
