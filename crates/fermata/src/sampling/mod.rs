//! Token sampling: the seam between raw model logits and the next token.
//!
//! The worker hands every inference result to a [`SamplingPolicy`] together
//! with the active grammar group and the generation history. The stock
//! policy is [`LogitPipeline`]; consumers with different musical priors can
//! install their own.

mod pipeline;

pub use pipeline::LogitPipeline;

use serde::{Deserialize, Serialize};

use crate::error::SampleError;
use crate::history::GenerationHistory;
use crate::range_group::RangeGroup;
use crate::tokenizer::{Token, TokenCategoryOracle};

/// Tunables for [`LogitPipeline`].
///
/// Deserializable so hosts can ship sampler settings alongside the tokenizer
/// configuration. Penalty factors of `1.0` (multiplicative) or `0.0`
/// (additive) disable the corresponding step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of highest-logit candidates kept before the nucleus cut.
    pub top_k: usize,
    /// Nucleus probability mass retained after top-k.
    pub top_p: f32,
    /// Lowest un-penalized MIDI pitch.
    pub min_pitch: i32,
    /// Highest un-penalized MIDI pitch.
    pub max_pitch: i32,
    /// Logit subtracted per semitone outside `[min_pitch, max_pitch]`.
    pub pitch_range_penalty: f32,
    /// Lowest un-penalized time-shift value, in lib ticks.
    pub min_time_shift: i64,
    /// Highest un-penalized time-shift value, in lib ticks.
    pub max_time_shift: i64,
    /// Logit subtracted per tick outside `[min_time_shift, max_time_shift]`.
    pub time_shift_range_penalty: f32,
    /// Pitch classes (`0..12`) considered in-scale. Empty disables the
    /// scale penalty.
    pub scale: Vec<i32>,
    /// Divisor (positive logits) / multiplier (negative logits) applied to
    /// out-of-scale pitch tokens. Must be `>= 1.0`; `1.0` disables.
    pub scale_penalty: f32,
    /// How many recent notes the repetition penalty looks back over.
    pub repetition_window: usize,
    /// Logit subtracted per recent occurrence of a pitch.
    pub repetition_penalty: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.5,
            min_pitch: 40,
            max_pitch: 80,
            pitch_range_penalty: 0.05,
            min_time_shift: 0,
            max_time_shift: 64,
            time_shift_range_penalty: 0.0,
            scale: Vec::new(),
            scale_penalty: 1.05,
            repetition_window: 20,
            repetition_penalty: 0.05,
        }
    }
}

/// Everything one sampling decision sees.
///
/// `logits` is the backend's raw output and is scratch space: the policy may
/// mutate it freely.
pub struct SampleContext<'a> {
    /// Raw next-token logits, one per vocabulary entry.
    pub logits: &'a mut [f32],
    /// The grammar group the sampled token must belong to.
    pub group: &'a RangeGroup,
    /// Generation history, for history-dependent penalties.
    pub history: &'a GenerationHistory,
    /// Vocabulary metadata for category and value lookups.
    pub oracle: &'a dyn TokenCategoryOracle,
}

/// Chooses the next token from processed logits.
pub trait SamplingPolicy: Send {
    /// Picks one token. The returned token must be a member of
    /// `cx.group`.
    fn sample(&mut self, cx: SampleContext<'_>) -> Result<Token, SampleError>;
}
