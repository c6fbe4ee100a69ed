//! Grammar constraint: which token categories are legal next.
//!
//! MIDI token grammars are a small cycle: a pitch is followed by its
//! velocity (when the grammar carries velocities), then its duration (when
//! it carries durations), then the stream is free again to emit another
//! pitch or move time forward. The worker advances a [`GrammarState`] after
//! every accepted token and hands the matching [`RangeGroup`] to the
//! sampler, so an illegal category can never be sampled in the first place.

use crate::range_group::RangeGroup;
use crate::tokenizer::{Token, TokenCategory, TokenCategoryOracle};

/// The per-category groups built once from a tokenizer.
#[derive(Debug, Default)]
pub struct RangeGroupSet {
    /// Pitch tokens plus everything that moves time: time shifts, positions,
    /// bar boundaries. The "free" state of the grammar.
    pub pitch_or_shift: RangeGroup,
    /// Velocity tokens only.
    pub velocity: RangeGroup,
    /// Duration tokens only.
    pub duration: RangeGroup,
}

impl RangeGroupSet {
    /// Builds the groups from a tokenizer's vocabulary and refreshes their
    /// caches.
    pub fn from_tokenizer(tokenizer: &crate::tokenizer::MidiTokenizer) -> Self {
        let mut set = Self::default();
        tokenizer.add_tokens_starting_by(TokenCategory::Pitch, &mut set.pitch_or_shift);
        tokenizer.add_tokens_starting_by(TokenCategory::TimeShift, &mut set.pitch_or_shift);
        tokenizer.add_tokens_starting_by(TokenCategory::Position, &mut set.pitch_or_shift);
        tokenizer.add_tokens_starting_by(TokenCategory::BarBoundary, &mut set.pitch_or_shift);
        tokenizer.add_tokens_starting_by(TokenCategory::Velocity, &mut set.velocity);
        tokenizer.add_tokens_starting_by(TokenCategory::Duration, &mut set.duration);
        set.pitch_or_shift.update_cache();
        set.velocity.update_cache();
        set.duration.update_cache();
        set
    }
}

/// What the grammar expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// A pitch or any time-movement token.
    PitchOrShift,
    /// The velocity completing the pitch just emitted.
    Velocity,
    /// The duration completing the note in flight.
    Duration,
}

/// Tracks the expected slot through the token stream.
#[derive(Debug, Clone, Copy)]
pub struct GrammarState {
    use_velocities: bool,
    use_durations: bool,
    slot: Slot,
}

impl GrammarState {
    /// Creates a state in the free slot.
    pub fn new(use_velocities: bool, use_durations: bool) -> Self {
        Self {
            use_velocities,
            use_durations,
            slot: Slot::PitchOrShift,
        }
    }

    /// The slot expected next.
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// The group the sampler must draw the next token from.
    pub fn active_group<'a>(&self, groups: &'a RangeGroupSet) -> &'a RangeGroup {
        match self.slot {
            Slot::PitchOrShift => &groups.pitch_or_shift,
            Slot::Velocity => &groups.velocity,
            Slot::Duration => &groups.duration,
        }
    }

    /// Advances past a token of the given category. `Other` tokens hold the
    /// slot.
    pub fn advance(&mut self, category: TokenCategory) {
        self.slot = match category {
            TokenCategory::Pitch if self.use_velocities => Slot::Velocity,
            TokenCategory::Pitch if self.use_durations => Slot::Duration,
            TokenCategory::Velocity if self.use_durations => Slot::Duration,
            TokenCategory::Pitch
            | TokenCategory::Velocity
            | TokenCategory::Duration
            | TokenCategory::TimeShift
            | TokenCategory::Position
            | TokenCategory::BarBoundary => Slot::PitchOrShift,
            TokenCategory::Other => self.slot,
        };
    }

    /// Re-derives the slot from the last token of a (possibly truncated)
    /// stream, for rewind resync and seeding. With no last token the grammar
    /// starts free.
    pub fn resync(&mut self, last_token: Option<Token>, oracle: &dyn TokenCategoryOracle) {
        self.slot = Slot::PitchOrShift;
        if let Some(token) = last_token {
            self.advance(oracle.token_category(token));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::test_vocab;

    #[test]
    fn test_full_cycle_with_velocity_and_duration() {
        let mut g = GrammarState::new(true, true);
        assert_eq!(g.slot(), Slot::PitchOrShift);
        g.advance(TokenCategory::TimeShift);
        assert_eq!(g.slot(), Slot::PitchOrShift);
        g.advance(TokenCategory::Pitch);
        assert_eq!(g.slot(), Slot::Velocity);
        g.advance(TokenCategory::Velocity);
        assert_eq!(g.slot(), Slot::Duration);
        g.advance(TokenCategory::Duration);
        assert_eq!(g.slot(), Slot::PitchOrShift);
    }

    #[test]
    fn test_pitch_skips_disabled_slots() {
        let mut g = GrammarState::new(false, true);
        g.advance(TokenCategory::Pitch);
        assert_eq!(g.slot(), Slot::Duration);

        let mut g = GrammarState::new(false, false);
        g.advance(TokenCategory::Pitch);
        assert_eq!(g.slot(), Slot::PitchOrShift);

        let mut g = GrammarState::new(true, false);
        g.advance(TokenCategory::Pitch);
        assert_eq!(g.slot(), Slot::Velocity);
        g.advance(TokenCategory::Velocity);
        assert_eq!(g.slot(), Slot::PitchOrShift);
    }

    #[test]
    fn test_other_holds_slot() {
        let mut g = GrammarState::new(true, true);
        g.advance(TokenCategory::Pitch);
        g.advance(TokenCategory::Other);
        assert_eq!(g.slot(), Slot::Velocity);
    }

    #[test]
    fn test_resync_from_last_token() {
        let tok = test_vocab::tokenizer();
        let mut g = GrammarState::new(true, true);

        g.resync(Some(62), &tok); // a pitch token
        assert_eq!(g.slot(), Slot::Velocity);

        g.resync(Some(85), &tok); // a velocity token
        assert_eq!(g.slot(), Slot::Duration);

        g.resync(Some(102), &tok); // a duration token
        assert_eq!(g.slot(), Slot::PitchOrShift);

        g.resync(None, &tok);
        assert_eq!(g.slot(), Slot::PitchOrShift);
    }

    #[test]
    fn test_groups_partition_by_category() {
        let tok = test_vocab::tokenizer();
        let groups = RangeGroupSet::from_tokenizer(&tok);
        // Pitch 60..=79, shifts 6..=9, positions 2..=5, bar boundary 1.
        assert!(groups.pitch_or_shift.contains(60));
        assert!(groups.pitch_or_shift.contains(7));
        assert!(groups.pitch_or_shift.contains(3));
        assert!(groups.pitch_or_shift.contains(1));
        assert!(!groups.pitch_or_shift.contains(85));
        assert!(!groups.pitch_or_shift.contains(0));
        assert!(groups.velocity.contains(85));
        assert!(!groups.velocity.contains(100));
        assert!(groups.duration.contains(100));
        assert_eq!(groups.velocity.len(), 20);
        assert_eq!(groups.duration.len(), 20);
    }
}
