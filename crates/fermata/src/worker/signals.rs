//! Lock-free control signals and the park/wake gate shared between the
//! worker's control surface and its generation thread.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::note::Note;
use crate::tokenizer::Token;

/// Atomic flags the control surface raises and the generation thread polls.
///
/// Rewind requests use a two-flag protocol: `ignore_next_token` is raised
/// first with release ordering, then the target, then `rewind_pending`. The
/// generation thread checks `ignore_next_token` between sampling a token and
/// appending it, so a token sampled from pre-rewind state is discarded even
/// when the request lands mid-iteration. `rewind_pending` itself is only
/// consumed at the top of the loop, where no partial iteration state exists.
#[derive(Debug, Default)]
pub struct SignalFlags {
    shutdown: AtomicBool,
    rewind_pending: AtomicBool,
    ignore_next_token: AtomicBool,
    rewind_target: AtomicI64,
}

impl SignalFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the generation thread to exit at the next loop boundary.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Posts a rewind to `target` lib ticks. Overwrites any rewind not yet
    /// consumed; only the newest target applies.
    pub fn request_rewind(&self, target: i64) {
        self.ignore_next_token.store(true, Ordering::Release);
        self.rewind_target.store(target, Ordering::Release);
        self.rewind_pending.store(true, Ordering::Release);
    }

    /// Consumes a pending rewind, returning its target.
    pub fn take_rewind(&self) -> Option<i64> {
        if !self.rewind_pending.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.ignore_next_token.store(false, Ordering::Release);
        Some(self.rewind_target.load(Ordering::Acquire))
    }

    /// Consumes the discard-next-token marker. True means the token sampled
    /// in the current iteration predates a rewind and must be dropped.
    pub fn take_ignore(&self) -> bool {
        self.ignore_next_token.swap(false, Ordering::AcqRel)
    }
}

/// A one-shot wake flag with a condition variable, for parking the
/// generation thread while it is far enough ahead of playback.
#[derive(Debug, Default)]
pub struct WakeGate {
    wake: Mutex<bool>,
    cond: Condvar,
}

impl WakeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks the caller until notified, consuming the wake flag. A notify
    /// that lands before the wait is not lost: the flag short-circuits it.
    pub fn wait(&self) {
        let mut woken = match self.wake.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*woken {
            woken = self
                .cond
                .wait(woken)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *woken = false;
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`, consuming
    /// the wake flag either way.
    pub fn wait_timeout(&self, timeout: Duration) {
        let mut woken = match self.wake.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !*woken {
            let (guard, _) = self
                .cond
                .wait_timeout(woken, timeout)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            woken = guard;
        }
        *woken = false;
    }

    /// Wakes a parked generation thread.
    pub fn notify(&self) {
        let mut woken = match self.wake.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *woken = true;
        self.cond.notify_one();
    }
}

/// Consumer callbacks, fired from the generation thread outside all locks.
#[derive(Clone, Default)]
pub struct Callbacks {
    /// Fired once per accepted token.
    pub on_token_generated: Option<Arc<dyn Fn(Token) + Send + Sync>>,
    /// Fired once per decoded note.
    pub on_note_generated: Option<Arc<dyn Fn(Note) + Send + Sync>>,
    /// Fired once after initialization completes, before the first step.
    pub on_init: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Fired after a rewind has been applied, with the resolved lib tick.
    pub on_cache_removed: Option<Arc<dyn Fn(i64) + Send + Sync>>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_token_generated", &self.on_token_generated.is_some())
            .field("on_note_generated", &self.on_note_generated.is_some())
            .field("on_init", &self.on_init.is_some())
            .field("on_cache_removed", &self.on_cache_removed.is_some())
            .finish()
    }
}
