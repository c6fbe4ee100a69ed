//! Stateful decoding of token streams into timed notes.

use tracing::warn;

use super::{Token, TokenCategory, TokenCategoryOracle};
use crate::note::Note;

/// Tunables for [`NoteConverter`].
#[derive(Debug, Clone, Copy)]
pub struct ConverterConfig {
    /// Length of one bar, in lib ticks. Drives bar-boundary and position
    /// symbols.
    pub bar_length: i64,
    /// Velocity used when the grammar carries no velocity tokens.
    pub default_velocity: i32,
    /// Duration used when the grammar carries no duration tokens.
    pub default_duration: i64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            bar_length: 32,
            default_velocity: 100,
            default_duration: 8,
        }
    }
}

/// Converts the decoded symbol stream into [`Note`]s.
///
/// The converter tracks a running lib-tick cursor advanced by time-shift,
/// position, and bar-boundary symbols, and assembles pitch / velocity /
/// duration fragments into notes. When velocities or durations are absent
/// from the grammar, notes complete early using the configured defaults.
///
/// Malformed fragments (a velocity or duration with no pitch in flight) are
/// skipped rather than aborting the stream: the offending symbol is dropped,
/// and after twenty consecutive failures the converter drops the next ten
/// symbols outright to jump past the corrupt region before resuming. All
/// drops are counted in [`skips`](Self::skips). This mirrors playback-side
/// decoding, where one bad token must not silence everything after it.
pub struct NoteConverter {
    config: ConverterConfig,
    current_tick: i64,
    bar_start: i64,
    pending_pitch: Option<i32>,
    pending_velocity: Option<i32>,
    consecutive_failures: u32,
    skip_budget: u32,
    skips: u64,
}

impl NoteConverter {
    /// Creates a converter positioned at tick 0.
    pub fn new(config: ConverterConfig) -> Self {
        Self {
            config,
            current_tick: 0,
            bar_start: 0,
            pending_pitch: None,
            pending_velocity: None,
            consecutive_failures: 0,
            skip_budget: 0,
            skips: 0,
        }
    }

    /// The current lib-tick cursor.
    pub fn current_tick(&self) -> i64 {
        self.current_tick
    }

    /// Count of symbols dropped due to malformed fragments.
    pub fn skips(&self) -> u64 {
        self.skips
    }

    /// Repositions the cursor after a rewind: pending fragments are
    /// discarded and the bar origin is re-derived from the target tick.
    pub fn reset_to(&mut self, tick: i64) {
        self.current_tick = tick;
        self.bar_start = tick - tick.rem_euclid(self.config.bar_length);
        self.pending_pitch = None;
        self.pending_velocity = None;
        self.consecutive_failures = 0;
        self.skip_budget = 0;
    }

    /// Decodes one token through the oracle and appends any completed notes
    /// to `out`.
    pub fn process_token(
        &mut self,
        oracle: &dyn TokenCategoryOracle,
        token: Token,
        out: &mut Vec<Note>,
    ) {
        for &symbol in oracle.decode_token(token) {
            if self.skip_budget > 0 {
                self.skip_budget -= 1;
                self.skips += 1;
                continue;
            }
            let Some(sym) = oracle.symbol(symbol) else {
                self.fail();
                continue;
            };
            match sym.kind {
                TokenCategory::TimeShift => {
                    self.current_tick += sym.value;
                    self.consecutive_failures = 0;
                }
                TokenCategory::Position => {
                    self.current_tick = self.bar_start + sym.value;
                    self.consecutive_failures = 0;
                }
                TokenCategory::BarBoundary => {
                    self.bar_start += self.config.bar_length;
                    self.current_tick = self.current_tick.max(self.bar_start);
                    self.consecutive_failures = 0;
                }
                TokenCategory::Pitch => {
                    self.pending_pitch = Some(sym.value as i32);
                    self.pending_velocity = None;
                    self.consecutive_failures = 0;
                    if !oracle.use_velocities() && !oracle.use_durations() {
                        self.complete(self.config.default_velocity, self.config.default_duration, out);
                    }
                }
                TokenCategory::Velocity => {
                    if self.pending_pitch.is_some() {
                        self.pending_velocity = Some(sym.value as i32);
                        self.consecutive_failures = 0;
                        if !oracle.use_durations() {
                            self.complete(sym.value as i32, self.config.default_duration, out);
                        }
                    } else {
                        self.fail();
                    }
                }
                TokenCategory::Duration => {
                    if self.pending_pitch.is_some() {
                        let velocity =
                            self.pending_velocity.unwrap_or(self.config.default_velocity);
                        self.consecutive_failures = 0;
                        self.complete(velocity, sym.value, out);
                    } else {
                        self.fail();
                    }
                }
                TokenCategory::Other => {}
            }
        }
    }

    fn complete(&mut self, velocity: i32, duration: i64, out: &mut Vec<Note>) {
        if let Some(pitch) = self.pending_pitch.take() {
            self.pending_velocity = None;
            out.push(Note {
                tick: self.current_tick,
                duration,
                pitch,
                velocity,
            });
        }
    }

    fn fail(&mut self) {
        self.skips += 1;
        self.consecutive_failures += 1;
        if self.consecutive_failures == 20 {
            self.consecutive_failures = 0;
            self.skip_budget = 10;
            warn!(skips = self.skips, "decode failure run; skipping ten symbols ahead");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::test_vocab;

    fn convert(tokens: &[Token]) -> (NoteConverter, Vec<Note>) {
        let tok = test_vocab::tokenizer();
        let mut converter = NoteConverter::new(ConverterConfig::default());
        let mut notes = Vec::new();
        for &t in tokens {
            converter.process_token(&tok, t, &mut notes);
        }
        (converter, notes)
    }

    #[test]
    fn test_tsd_sequence_produces_note() {
        // time-shift 4, pitch 62, velocity 45, duration 3
        let (converter, notes) = convert(&[7, 62, 85, 102]);
        assert_eq!(
            notes,
            vec![Note { tick: 4, duration: 3, pitch: 62, velocity: 45 }]
        );
        assert_eq!(converter.current_tick(), 4);
    }

    #[test]
    fn test_time_shifts_accumulate() {
        // shifts 2 + 8, then a complete note
        let (_, notes) = convert(&[6, 8, 61, 80, 100]);
        assert_eq!(notes[0].tick, 10);
    }

    #[test]
    fn test_position_is_bar_relative() {
        // bar boundary moves bar start to 32; position 16 lands at 48
        let (_, notes) = convert(&[1, 4, 60, 80, 100]);
        assert_eq!(notes[0].tick, 48);
    }

    #[test]
    fn test_duration_without_pitch_is_skipped() {
        let (converter, notes) = convert(&[100, 7, 63, 90, 105]);
        assert!(notes.len() == 1);
        assert_eq!(converter.skips(), 1);
        assert_eq!(notes[0].pitch, 63);
    }

    #[test]
    fn test_velocity_without_pitch_is_skipped() {
        let (converter, notes) = convert(&[85, 85]);
        assert!(notes.is_empty());
        assert_eq!(converter.skips(), 2);
    }

    #[test]
    fn test_pitch_without_velocity_uses_default_on_duration() {
        // pitch then duration directly; velocity defaulted
        let (_, notes) = convert(&[66, 103]);
        assert_eq!(notes[0].velocity, ConverterConfig::default().default_velocity);
        assert_eq!(notes[0].duration, 4);
    }

    #[test]
    fn test_reset_to_discards_pending_fragment() {
        let tok = test_vocab::tokenizer();
        let mut converter = NoteConverter::new(ConverterConfig::default());
        let mut notes = Vec::new();
        converter.process_token(&tok, 7, &mut notes); // shift to 4
        converter.process_token(&tok, 62, &mut notes); // pending pitch
        converter.reset_to(70);
        assert_eq!(converter.current_tick(), 70);
        // a duration right after reset has no pitch to attach to
        converter.process_token(&tok, 102, &mut notes);
        assert!(notes.is_empty());
        assert_eq!(converter.skips(), 1);
    }

    #[test]
    fn test_failure_run_skips_ten_symbols_ahead() {
        let tok = test_vocab::tokenizer();
        let mut converter = NoteConverter::new(ConverterConfig::default());
        let mut notes = Vec::new();

        // Twenty velocities with no pitch in flight exhaust the failure run.
        for _ in 0..20 {
            converter.process_token(&tok, 85, &mut notes);
        }
        assert_eq!(converter.skips(), 20);

        // The next ten symbols are dropped unexamined, valid or not: these
        // time shifts never move the cursor.
        for _ in 0..10 {
            converter.process_token(&tok, 7, &mut notes);
        }
        assert_eq!(converter.skips(), 30);
        assert_eq!(converter.current_tick(), 0);
        assert!(notes.is_empty());

        // Past the jump, decoding resumes normally.
        for &t in &[7, 62, 85, 102] {
            converter.process_token(&tok, t, &mut notes);
        }
        assert_eq!(
            notes,
            vec![Note { tick: 4, duration: 3, pitch: 62, velocity: 45 }]
        );
        assert_eq!(converter.skips(), 30);
    }

    #[test]
    fn test_reset_to_cancels_skip_ahead() {
        let tok = test_vocab::tokenizer();
        let mut converter = NoteConverter::new(ConverterConfig::default());
        let mut notes = Vec::new();
        for _ in 0..20 {
            converter.process_token(&tok, 85, &mut notes);
        }
        converter.reset_to(0);
        // Rewound streams start clean; the jump window does not survive.
        for &t in &[7, 62, 85, 102] {
            converter.process_token(&tok, t, &mut notes);
        }
        assert_eq!(notes.len(), 1);
        assert_eq!(converter.skips(), 20);
    }

    #[test]
    fn test_grammar_without_velocity_or_duration() {
        let mut config = test_vocab::config();
        config.use_velocities = false;
        config.use_durations = false;
        let tok = crate::tokenizer::MidiTokenizer::from_config(config).unwrap();
        let mut converter = NoteConverter::new(ConverterConfig::default());
        let mut notes = Vec::new();
        converter.process_token(&tok, 64, &mut notes);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 64);
        assert_eq!(notes[0].velocity, 100);
        assert_eq!(notes[0].duration, 8);
    }
}
