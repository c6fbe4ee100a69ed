//! Translation between generation ticks and playback ticks, plus the
//! look-ahead throttle.
//!
//! The model reasons in lib ticks; the consumer plays in its own tick space.
//! [`ClockBridge`] owns the affine mapping between the two and the shared
//! atomics both threads consult: the playback thread publishes its position,
//! the generation thread publishes how far it has generated, and each side
//! derives pause / resume decisions from the gap without taking a lock.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Marker for "no note generated yet" in the last-generated atomic.
const UNSET: i64 = i64::MIN;

/// Tunables for [`ClockBridge`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Playback ticks per lib tick.
    pub ticks_per_lib_unit: i64,
    /// Generation pauses only above this lead, in playback ticks.
    pub min_ticks_ahead: i64,
    /// Generation pauses once the lead exceeds this, in playback ticks.
    pub max_ticks_ahead: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            ticks_per_lib_unit: 100,
            min_ticks_ahead: 200,
            max_ticks_ahead: 400,
        }
    }
}

/// Shared clock state between the generation and playback threads.
#[derive(Debug)]
pub struct ClockBridge {
    config: ClockConfig,
    /// Consumer's playback position, in playback ticks.
    playback_tick: AtomicI64,
    /// Offset folded into every lib-to-playback translation, accumulated by
    /// monotonicity clamps.
    added_ticks: AtomicI64,
    /// Playback tick of the newest generated note, or [`UNSET`].
    last_generated: AtomicI64,
}

impl ClockBridge {
    /// Creates a bridge at playback tick 0 with no notes generated.
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            playback_tick: AtomicI64::new(0),
            added_ticks: AtomicI64::new(0),
            last_generated: AtomicI64::new(UNSET),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Publishes the consumer's playback position.
    pub fn set_playback_tick(&self, tick: i64) {
        self.playback_tick.store(tick, Ordering::Release);
    }

    /// The last published playback position.
    pub fn playback_tick(&self) -> i64 {
        self.playback_tick.load(Ordering::Acquire)
    }

    /// Translates a lib tick into playback ticks, including the accumulated
    /// clamp offset.
    pub fn lib_to_playback(&self, lib_tick: i64) -> i64 {
        lib_tick * self.config.ticks_per_lib_unit + self.added_ticks.load(Ordering::Acquire)
    }

    /// Translates a playback tick back into lib ticks (floor division).
    pub fn playback_to_lib(&self, playback_tick: i64) -> i64 {
        (playback_tick - self.added_ticks.load(Ordering::Acquire))
            .div_euclid(self.config.ticks_per_lib_unit)
    }

    /// Translates a note's lib tick for the consumer, clamping it forward to
    /// `floor` (playback ticks) when the raw translation has already been
    /// passed by playback. The clamp distance is folded into the offset so
    /// every subsequent note shifts with it.
    pub fn resolve_note_tick(&self, lib_tick: i64, floor: i64) -> i64 {
        let raw = self.lib_to_playback(lib_tick);
        if raw >= floor {
            return raw;
        }
        let drift = floor - raw;
        self.added_ticks.fetch_add(drift, Ordering::AcqRel);
        warn!(lib_tick, drift, "generated note landed behind playback; clamping forward");
        floor
    }

    /// Records the newest generated note's position, in playback ticks.
    pub fn note_generated(&self, playback_tick: i64) {
        self.last_generated.store(playback_tick, Ordering::Release);
    }

    /// Overwrites the newest-generated marker after a rewind.
    pub fn set_last_generated(&self, playback_tick: i64) {
        self.last_generated.store(playback_tick, Ordering::Release);
    }

    /// Playback tick of the newest generated note, if any.
    pub fn last_generated(&self) -> Option<i64> {
        match self.last_generated.load(Ordering::Acquire) {
            UNSET => None,
            tick => Some(tick),
        }
    }

    /// Whether the generation thread is far enough ahead to pause.
    ///
    /// Never true before the first note: an idle stream with nothing
    /// generated must not sleep.
    pub fn should_sleep(&self) -> bool {
        match self.last_generated() {
            None => false,
            Some(last) => last - self.playback_tick() >= self.config.max_ticks_ahead,
        }
    }

    /// Whether a paused generation thread should wake: the lead has dropped
    /// below the minimum look-ahead.
    pub fn should_resume_generation(&self) -> bool {
        match self.last_generated() {
            None => true,
            Some(last) => last - self.playback_tick() < self.config.min_ticks_ahead,
        }
    }
}
