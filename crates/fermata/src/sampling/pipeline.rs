//! The stock logit-processing and sampling pipeline.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{SampleContext, SamplerConfig, SamplingPolicy};
use crate::error::SampleError;
use crate::history::GenerationHistory;
use crate::tokenizer::{Token, TokenCategoryOracle};

/// Logit applied to the reserved token at index 0 so it is never sampled.
const SENTINEL_MASK: f32 = -1e9;

/// Grammar-constrained top-k / top-p sampler with musical penalties.
///
/// Each call runs a fixed sequence over the raw logits: sentinel masking,
/// scale / pitch-range / time-shift-range / repetition penalties, restriction
/// to the active grammar group, top-k partial selection, softmax, and a
/// nucleus (top-p) draw. Ties in the top-k selection break by ascending token
/// id, so two pipelines seeded alike produce identical streams for identical
/// inputs.
pub struct LogitPipeline {
    config: SamplerConfig,
    rng: StdRng,
}

impl LogitPipeline {
    /// Creates a pipeline with operating-system entropy.
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a deterministic pipeline for reproducible streams.
    pub fn with_seed(config: SamplerConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    fn apply_scale_penalty(&self, logits: &mut [f32], oracle: &dyn TokenCategoryOracle) {
        if self.config.scale.is_empty() || self.config.scale_penalty <= 1.0 {
            return;
        }
        for (token, logit) in logits.iter_mut().enumerate() {
            let Some(pitch) = oracle.token_pitch(token as Token) else {
                continue;
            };
            if !self.config.scale.contains(&pitch.rem_euclid(12)) {
                if *logit > 0.0 {
                    *logit /= self.config.scale_penalty;
                } else {
                    *logit *= self.config.scale_penalty;
                }
            }
        }
    }

    fn apply_pitch_range_penalty(&self, logits: &mut [f32], oracle: &dyn TokenCategoryOracle) {
        if self.config.pitch_range_penalty <= 0.0 {
            return;
        }
        for (token, logit) in logits.iter_mut().enumerate() {
            let Some(pitch) = oracle.token_pitch(token as Token) else {
                continue;
            };
            let distance = if pitch < self.config.min_pitch {
                self.config.min_pitch - pitch
            } else if pitch > self.config.max_pitch {
                pitch - self.config.max_pitch
            } else {
                continue;
            };
            *logit -= self.config.pitch_range_penalty * distance as f32;
        }
    }

    fn apply_time_shift_range_penalty(&self, logits: &mut [f32], oracle: &dyn TokenCategoryOracle) {
        if self.config.time_shift_range_penalty <= 0.0 {
            return;
        }
        for (token, logit) in logits.iter_mut().enumerate() {
            let Some(shift) = oracle.token_time_shift(token as Token) else {
                continue;
            };
            let distance = if shift < self.config.min_time_shift {
                self.config.min_time_shift - shift
            } else if shift > self.config.max_time_shift {
                shift - self.config.max_time_shift
            } else {
                continue;
            };
            *logit -= self.config.time_shift_range_penalty * distance as f32;
        }
    }

    fn apply_repetition_penalty(
        &self,
        logits: &mut [f32],
        history: &GenerationHistory,
        oracle: &dyn TokenCategoryOracle,
    ) {
        if self.config.repetition_penalty <= 0.0 || self.config.repetition_window == 0 {
            return;
        }
        let mut counts = [0u32; 128];
        for pitch in history.recent_pitches(self.config.repetition_window) {
            if (0..128).contains(&pitch) {
                counts[pitch as usize] += 1;
            }
        }
        for (token, logit) in logits.iter_mut().enumerate() {
            let Some(pitch) = oracle.token_pitch(token as Token) else {
                continue;
            };
            if (0..128).contains(&pitch) {
                let count = counts[pitch as usize];
                if count > 0 {
                    *logit -= self.config.repetition_penalty * count as f32;
                }
            }
        }
    }
}

impl SamplingPolicy for LogitPipeline {
    fn sample(&mut self, cx: SampleContext<'_>) -> Result<Token, SampleError> {
        let SampleContext {
            logits,
            group,
            history,
            oracle,
        } = cx;

        if let Some(sentinel) = logits.first_mut() {
            *sentinel = SENTINEL_MASK;
        }
        self.apply_scale_penalty(logits, oracle);
        self.apply_pitch_range_penalty(logits, oracle);
        self.apply_time_shift_range_penalty(logits, oracle);
        self.apply_repetition_penalty(logits, history, oracle);

        let mut pool: Vec<Token> = group
            .ids()
            .iter()
            .copied()
            .filter(|&t| (t as usize) < logits.len())
            .collect();
        if pool.is_empty() {
            return Err(SampleError::EmptyCandidateSet);
        }
        if pool.len() < self.config.top_k {
            return Err(SampleError::GroupTooSmall {
                available: pool.len(),
                needed: self.config.top_k,
            });
        }

        // Strict total order: logit descending, then token id ascending.
        // total_cmp keeps this a valid Ord even against stray NaNs.
        let by_logit = |a: &Token, b: &Token| {
            logits[*b as usize]
                .total_cmp(&logits[*a as usize])
                .then(a.cmp(b))
        };
        let k = self.config.top_k;
        pool.select_nth_unstable_by(k - 1, by_logit);
        pool.truncate(k);
        pool.sort_unstable_by(by_logit);

        // Max-subtracted softmax over the retained candidates.
        let max_logit = logits[pool[0] as usize];
        let mut probs: Vec<f32> = pool
            .iter()
            .map(|&t| (logits[t as usize] - max_logit).exp())
            .collect();
        let total: f32 = probs.iter().sum();
        for p in &mut probs {
            *p /= total;
        }

        // Nucleus cut: shortest prefix reaching top_p, renormalized.
        let mut kept = probs.len();
        let mut mass = 0.0f32;
        for (i, &p) in probs.iter().enumerate() {
            mass += p;
            if mass >= self.config.top_p {
                kept = i + 1;
                break;
            }
        }

        let draw: f32 = self.rng.gen_range(0.0..mass);
        let mut acc = 0.0f32;
        for (&token, &p) in pool.iter().zip(&probs).take(kept) {
            acc += p;
            if draw < acc {
                return Ok(token);
            }
        }
        // Float accumulation can leave the draw a hair past the last bucket.
        Ok(pool[kept - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::GenerationHistory;
    use crate::note::Note;
    use crate::range_group::RangeGroup;
    use crate::tokenizer::test_vocab;

    fn pitch_group(min: i32, max: i32) -> RangeGroup {
        let mut g = RangeGroup::new();
        g.insert(min, max);
        g.update_cache();
        g
    }

    fn small_config(top_k: usize, top_p: f32) -> SamplerConfig {
        SamplerConfig {
            top_k,
            top_p,
            ..SamplerConfig::default()
        }
    }

    fn run(
        pipeline: &mut LogitPipeline,
        logits: &mut [f32],
        group: &RangeGroup,
        history: &GenerationHistory,
    ) -> Result<Token, SampleError> {
        let tok = test_vocab::tokenizer();
        pipeline.sample(SampleContext {
            logits,
            group,
            history,
            oracle: &tok,
        })
    }

    #[test]
    fn test_same_seed_same_stream() {
        let group = pitch_group(60, 79);
        let history = GenerationHistory::new();
        let mut a = LogitPipeline::with_seed(small_config(5, 0.9), 42);
        let mut b = LogitPipeline::with_seed(small_config(5, 0.9), 42);
        for step in 0..50 {
            let mut la: Vec<f32> = (0..128).map(|i| ((i * 7 + step) % 13) as f32 * 0.1).collect();
            let mut lb = la.clone();
            let ta = run(&mut a, &mut la, &group, &history).unwrap();
            let tb = run(&mut b, &mut lb, &group, &history).unwrap();
            assert_eq!(ta, tb);
        }
    }

    #[test]
    fn test_fixed_seed_scenario_is_reproducible() {
        // 128-token vocabulary, candidates restricted to pitches 60..=67,
        // top-k 5, p 0.9, rng seed 42, 30 tokens of prior history: five
        // consecutive draws must come out identical on every run, and the
        // seed must be the only source of variation.
        let tok = test_vocab::tokenizer();
        let group = pitch_group(60, 67);
        let mut history = GenerationHistory::new();
        for i in 0..30 {
            history.push_token(60 + (i % 8) as Token);
        }
        let config = small_config(5, 0.9);
        let draw = |seed: u64| {
            let mut p = LogitPipeline::with_seed(config.clone(), seed);
            let mut out = Vec::with_capacity(5);
            for step in 0..5 {
                let mut logits: Vec<f32> =
                    (0..128).map(|i| ((i * 13 + step * 7) % 17) as f32 * 0.2).collect();
                let token = p
                    .sample(SampleContext {
                        logits: &mut logits,
                        group: &group,
                        history: &history,
                        oracle: &tok,
                    })
                    .unwrap();
                out.push(token);
            }
            out
        };

        let golden = draw(42);
        assert_eq!(golden.len(), 5);
        assert!(golden.iter().all(|&t| group.contains(t)));
        assert_eq!(draw(42), golden);
        assert!((0..10).any(|seed| draw(seed) != golden));
    }

    #[test]
    fn test_sampled_token_always_in_group() {
        let group = pitch_group(60, 67);
        let history = GenerationHistory::new();
        let mut p = LogitPipeline::with_seed(small_config(5, 0.9), 7);
        for step in 0..100 {
            let mut logits: Vec<f32> =
                (0..128).map(|i| ((i * 31 + step * 17) % 29) as f32 * 0.05).collect();
            let token = run(&mut p, &mut logits, &group, &history).unwrap();
            assert!(group.contains(token), "token {token} outside group");
        }
    }

    #[test]
    fn test_group_smaller_than_top_k_errors() {
        let group = pitch_group(60, 62);
        let history = GenerationHistory::new();
        let mut p = LogitPipeline::with_seed(small_config(5, 0.9), 0);
        let mut logits = vec![0.0f32; 128];
        let err = run(&mut p, &mut logits, &group, &history).unwrap_err();
        assert!(matches!(
            err,
            SampleError::GroupTooSmall { available: 3, needed: 5 }
        ));
    }

    #[test]
    fn test_empty_group_errors() {
        let mut group = RangeGroup::new();
        group.update_cache();
        let history = GenerationHistory::new();
        let mut p = LogitPipeline::with_seed(small_config(5, 0.9), 0);
        let mut logits = vec![0.0f32; 128];
        assert!(matches!(
            run(&mut p, &mut logits, &group, &history),
            Err(SampleError::EmptyCandidateSet)
        ));
    }

    #[test]
    fn test_sentinel_never_sampled() {
        let mut group = RangeGroup::new();
        group.insert(0, 0);
        group.insert(60, 63);
        group.update_cache();
        let history = GenerationHistory::new();
        let mut p = LogitPipeline::with_seed(small_config(5, 1.0), 3);
        for _ in 0..50 {
            // Huge logit on the sentinel; the mask must still bury it.
            let mut logits = vec![0.0f32; 128];
            logits[0] = 100.0;
            let token = run(&mut p, &mut logits, &group, &history).unwrap();
            assert_ne!(token, 0);
        }
    }

    #[test]
    fn test_top_p_one_keeps_full_top_k() {
        // With p = 1.0 every top-k candidate stays reachable.
        let group = pitch_group(60, 79);
        let history = GenerationHistory::new();
        let mut p = LogitPipeline::with_seed(small_config(20, 1.0), 11);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            let mut logits = vec![0.0f32; 128];
            seen.insert(run(&mut p, &mut logits, &group, &history).unwrap());
        }
        assert!(seen.len() > 10, "uniform draw hit only {} tokens", seen.len());
    }

    #[test]
    fn test_tight_top_p_prefers_peak() {
        let group = pitch_group(60, 79);
        let history = GenerationHistory::new();
        let mut p = LogitPipeline::with_seed(small_config(5, 0.1), 5);
        for _ in 0..50 {
            let mut logits = vec![0.0f32; 128];
            logits[65] = 10.0;
            assert_eq!(run(&mut p, &mut logits, &group, &history).unwrap(), 65);
        }
    }

    #[test]
    fn test_repetition_penalty_suppresses_recent_pitch() {
        let group = pitch_group(60, 79);
        let mut history = GenerationHistory::new();
        for i in 0..20 {
            history.push_token(65);
            history.append_note(
                Note { tick: i, duration: 1, pitch: 65, velocity: 90 },
                i as usize,
            );
        }
        let mut config = small_config(5, 0.05);
        config.repetition_penalty = 1.0;
        let mut p = LogitPipeline::with_seed(config, 5);
        // 65 leads by a nose; twenty repetitions must dethrone it.
        let mut logits = vec![0.0f32; 128];
        logits[65] = 0.5;
        logits[66] = 0.4;
        let token = run(&mut p, &mut logits, &group, &history).unwrap();
        assert_eq!(token, 66);
    }

    #[test]
    fn test_pitch_range_penalty_scales_with_distance() {
        let group = pitch_group(60, 79);
        let history = GenerationHistory::new();
        let mut config = small_config(5, 0.05);
        config.max_pitch = 62;
        config.pitch_range_penalty = 1.0;
        let mut p = LogitPipeline::with_seed(config, 9);
        // 79 is 17 semitones out; a big raw lead of 10 is not enough.
        let mut logits = vec![0.0f32; 128];
        logits[79] = 10.0;
        logits[61] = 0.5;
        let token = run(&mut p, &mut logits, &group, &history).unwrap();
        assert_eq!(token, 61);
    }

    #[test]
    fn test_scale_penalty_prefers_in_scale_pitch() {
        let group = pitch_group(60, 79);
        let history = GenerationHistory::new();
        let mut config = small_config(5, 0.05);
        config.scale = crate::scales::C_MAJOR.to_vec();
        config.scale_penalty = 100.0;
        let mut p = LogitPipeline::with_seed(config, 13);
        // 61 (C#) edges out 62 (D) raw; the scale penalty reverses that.
        let mut logits = vec![0.0f32; 128];
        logits[61] = 2.0;
        logits[62] = 1.9;
        let token = run(&mut p, &mut logits, &group, &history).unwrap();
        assert_eq!(token, 62);
    }
}
