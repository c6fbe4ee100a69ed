//! # Generation Worker
//!
//! The worker owns the generation side of the system: a dedicated thread
//! that repeatedly runs the backend, samples a token through the active
//! grammar group, decodes it into notes, and appends everything to the
//! shared history. The consumer's playback thread talks to the worker only
//! through [`GenerationWorker`]'s control surface, which is built from
//! atomics and short critical sections so it is safe to call from a
//! real-time context.
//!
//! ## Lifecycle
//!
//! ```text
//! Created -> Initializing -> Generating <-> Paused -> Terminated
//! ```
//!
//! Initialization (tokenizer load, model load, seed decode) happens on the
//! generation thread so a slow model load never blocks the caller. A fatal
//! backend or sampling error terminates the worker and parks the error in
//! [`GenerationWorker::take_error`]; recovery policy belongs to the host.

mod grammar;
mod signals;

pub use grammar::{GrammarState, RangeGroupSet, Slot};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::backend::InferenceBackend;
use crate::batch::Batch;
use crate::clock::{ClockBridge, ClockConfig};
use crate::error::WorkerError;
use crate::history::GenerationHistory;
use crate::note::Note;
use crate::sampling::{SampleContext, SamplingPolicy};
use crate::tokenizer::{ConverterConfig, MidiTokenizer, NoteConverter, Token, TokenCategoryOracle};
use signals::{Callbacks, SignalFlags, WakeGate};

/// Where the worker's lifecycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Constructed, no thread yet.
    Created = 0,
    /// Thread running setup: tokenizer, model, seed decode.
    Initializing = 1,
    /// Producing tokens.
    Generating = 2,
    /// Parked, far enough ahead of playback.
    Paused = 3,
    /// Shutdown requested, thread winding down.
    Stopping = 4,
    /// Thread exited, normally or on a fatal error.
    Terminated = 5,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Created,
            1 => WorkerState::Initializing,
            2 => WorkerState::Generating,
            3 => WorkerState::Paused,
            4 => WorkerState::Stopping,
            _ => WorkerState::Terminated,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Tunables for [`GenerationWorker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Hard cap on the token window handed to the backend, further limited
    /// by the backend's own maximum.
    pub max_context: usize,
    /// Poll interval while waiting for a sampling policy to be installed.
    /// The throttle pause itself blocks without polling.
    pub idle_wait: Duration,
    /// Clock translation and throttle settings.
    pub clock: ClockConfig,
    /// Note decoding settings.
    pub converter: ConverterConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_context: 511,
            idle_wait: Duration::from_millis(10),
            clock: ClockConfig::default(),
            converter: ConverterConfig::default(),
        }
    }
}

/// State shared between the control surface and the generation thread.
struct Shared {
    state: StateCell,
    flags: SignalFlags,
    gate: WakeGate,
    clock: ClockBridge,
    history: RwLock<GenerationHistory>,
    callbacks: Mutex<Callbacks>,
    sampler: Mutex<Option<Box<dyn SamplingPolicy>>>,
    last_error: Mutex<Option<WorkerError>>,
}

impl Shared {
    fn callbacks(&self) -> Callbacks {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_error(&self, err: WorkerError) {
        error!(%err, "generation worker terminating");
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
    }
}

enum TokenizerSource {
    Path(PathBuf),
    Loaded(MidiTokenizer),
}

struct PendingStart {
    tokenizer: TokenizerSource,
    model_path: Option<PathBuf>,
    seed: Vec<Token>,
}

/// Owns the generation thread and exposes the real-time control surface.
///
/// Dropping the worker requests shutdown and joins the thread.
pub struct GenerationWorker {
    shared: Arc<Shared>,
    config: WorkerConfig,
    backend: Option<Box<dyn InferenceBackend>>,
    pending: Option<PendingStart>,
    handle: Option<JoinHandle<()>>,
}

impl GenerationWorker {
    /// Creates a worker around a backend. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(backend: impl InferenceBackend + 'static, config: WorkerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: StateCell::new(WorkerState::Created),
                flags: SignalFlags::new(),
                gate: WakeGate::new(),
                clock: ClockBridge::new(config.clock),
                history: RwLock::new(GenerationHistory::new()),
                callbacks: Mutex::new(Callbacks::default()),
                sampler: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
            config,
            backend: Some(Box::new(backend)),
            pending: None,
            handle: None,
        }
    }

    /// Stages startup parameters; the tokenizer file is loaded on the
    /// generation thread when [`start`](Self::start) runs.
    pub fn pre_start(
        &mut self,
        tokenizer_path: impl Into<PathBuf>,
        model_path: impl Into<PathBuf>,
        seed: Vec<Token>,
    ) {
        self.pending = Some(PendingStart {
            tokenizer: TokenizerSource::Path(tokenizer_path.into()),
            model_path: Some(model_path.into()),
            seed,
        });
    }

    /// Stages startup parameters with an already-built tokenizer.
    pub fn pre_start_loaded(
        &mut self,
        tokenizer: MidiTokenizer,
        model_path: Option<PathBuf>,
        seed: Vec<Token>,
    ) {
        self.pending = Some(PendingStart {
            tokenizer: TokenizerSource::Loaded(tokenizer),
            model_path,
            seed,
        });
    }

    /// Spawns the generation thread with the staged parameters.
    ///
    /// Fails fast on an empty or oversized seed; tokenizer and model loading
    /// happen on the thread and surface through
    /// [`take_error`](Self::take_error) instead.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.handle.is_some() {
            return Err(WorkerError::AlreadyStarted);
        }
        let Some(backend) = self.backend.take() else {
            return Err(WorkerError::AlreadyStarted);
        };
        let pending = self.pending.take().ok_or(WorkerError::EmptyContext)?;
        if pending.seed.is_empty() {
            self.backend = Some(backend);
            return Err(WorkerError::EmptyContext);
        }
        if pending.seed.len() > self.config.max_context {
            self.backend = Some(backend);
            return Err(WorkerError::ContextTooLong {
                got: pending.seed.len(),
                max: self.config.max_context,
            });
        }

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("fermata-gen".into())
            .spawn(move || run(shared, config, backend, pending))?;
        self.handle = Some(handle);
        info!("generation worker started");
        Ok(())
    }

    /// Whether [`start`](Self::start) has ever succeeded.
    pub fn has_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether the generation thread is still running.
    pub fn is_alive(&self) -> bool {
        self.handle.is_some() && self.shared.state.get() != WorkerState::Terminated
    }

    /// The worker's current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shared.state.get()
    }

    /// Installs (or replaces) the sampling policy. Generation idles until
    /// one is present.
    pub fn set_sampling_policy(&self, policy: impl SamplingPolicy + 'static) {
        *self
            .shared
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(policy));
        self.shared.gate.notify();
    }

    /// Registers a callback fired once per accepted token.
    pub fn set_on_token_generated(&self, f: impl Fn(Token) + Send + Sync + 'static) {
        self.with_callbacks(|cb| cb.on_token_generated = Some(Arc::new(f)));
    }

    /// Registers a callback fired once per decoded note.
    pub fn set_on_note_generated(&self, f: impl Fn(Note) + Send + Sync + 'static) {
        self.with_callbacks(|cb| cb.on_note_generated = Some(Arc::new(f)));
    }

    /// Registers a callback fired when initialization completes.
    pub fn set_on_init(&self, f: impl Fn() + Send + Sync + 'static) {
        self.with_callbacks(|cb| cb.on_init = Some(Arc::new(f)));
    }

    /// Registers a callback fired after a rewind is applied, with the
    /// resolved lib tick everything after which was discarded.
    pub fn set_on_cache_removed(&self, f: impl Fn(i64) + Send + Sync + 'static) {
        self.with_callbacks(|cb| cb.on_cache_removed = Some(Arc::new(f)));
    }

    fn with_callbacks(&self, f: impl FnOnce(&mut Callbacks)) {
        let mut cb = self
            .shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut cb);
    }

    /// Publishes the consumer's playback position and wakes the generation
    /// thread if it should resume. Real-time safe.
    pub fn advance_playback(&self, playback_tick: i64) {
        self.shared.clock.set_playback_tick(playback_tick);
        if self.shared.clock.should_resume_generation() {
            self.shared.gate.notify();
        }
    }

    /// Requests that everything generated after `playback_tick` be
    /// discarded and regenerated.
    ///
    /// `eta_ticks` is how far ahead of the current playback position the
    /// change can realistically take effect; the target is clamped forward
    /// to that horizon so already-heard material is never rewritten. Returns
    /// `false` (and does nothing) when nothing generated lies past the
    /// resolved target.
    pub fn request_rewind(&self, playback_tick: i64, eta_ticks: i64) -> bool {
        let clock = &self.shared.clock;
        let horizon = clock.playback_tick() + eta_ticks.max(0);
        let target = playback_tick.max(horizon);
        match clock.last_generated() {
            Some(last) if target < last => {
                let lib_target = clock.playback_to_lib(target);
                debug!(target, lib_target, "rewind requested");
                self.shared.flags.request_rewind(lib_target);
                self.shared.gate.notify();
                true
            }
            _ => false,
        }
    }

    /// Returns the notes decoded since the caller's cursor, translated into
    /// playback ticks, and advances the cursor.
    ///
    /// The cursor is clamped back when a rewind shortened the history, so a
    /// stale cursor never skips regenerated material.
    pub fn drain_playable(&self, cursor: &mut usize) -> Vec<Note> {
        let history = self
            .shared
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        *cursor = (*cursor).min(history.len());
        let floor = self.shared.clock.playback_tick();
        let out: Vec<Note> = history.notes()[*cursor..]
            .iter()
            .map(|n| Note {
                tick: self.shared.clock.resolve_note_tick(n.tick, floor),
                ..*n
            })
            .collect();
        *cursor += out.len();
        out
    }

    /// Runs `f` against the shared history under its read lock.
    pub fn with_history<R>(&self, f: impl FnOnce(&GenerationHistory) -> R) -> R {
        let history = self
            .shared
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&history)
    }

    /// The shared clock, for custom tick bookkeeping on the playback side.
    pub fn clock(&self) -> &ClockBridge {
        &self.shared.clock
    }

    /// Takes the error that terminated the worker, if any.
    pub fn take_error(&self) -> Option<WorkerError> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Requests shutdown and joins the generation thread.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.state.set(WorkerState::Stopping);
        self.shared.flags.request_shutdown();
        self.shared.gate.notify();
        if handle.join().is_err() {
            warn!("generation thread panicked during shutdown");
        }
        self.shared.state.set(WorkerState::Terminated);
    }
}

impl Drop for GenerationWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the generation thread owns exclusively.
struct Engine {
    shared: Arc<Shared>,
    config: WorkerConfig,
    backend: Box<dyn InferenceBackend>,
    tokenizer: MidiTokenizer,
    groups: RangeGroupSet,
    grammar: GrammarState,
    batch: Batch,
    converter: NoteConverter,
}

fn run(
    shared: Arc<Shared>,
    config: WorkerConfig,
    backend: Box<dyn InferenceBackend>,
    pending: PendingStart,
) {
    shared.state.set(WorkerState::Initializing);
    match Engine::init(Arc::clone(&shared), config, backend, pending) {
        Ok(mut engine) => {
            if let Some(on_init) = shared.callbacks().on_init {
                on_init();
            }
            shared.state.set(WorkerState::Generating);
            engine.generate();
            engine.teardown();
        }
        Err(err) => shared.record_error(err),
    }
    shared.state.set(WorkerState::Terminated);
    debug!("generation thread exited");
}

impl Engine {
    fn init(
        shared: Arc<Shared>,
        config: WorkerConfig,
        mut backend: Box<dyn InferenceBackend>,
        pending: PendingStart,
    ) -> Result<Self, WorkerError> {
        let tokenizer = match pending.tokenizer {
            TokenizerSource::Path(path) => MidiTokenizer::from_path(path)?,
            TokenizerSource::Loaded(t) => t,
        };
        if let Some(path) = &pending.model_path {
            backend.load_model(path)?;
        }

        let max_context = config.max_context.min(backend.max_context());
        let groups = RangeGroupSet::from_tokenizer(&tokenizer);
        let mut grammar = GrammarState::new(tokenizer.use_velocities(), tokenizer.use_durations());
        grammar.resync(pending.seed.last().copied(), &tokenizer);

        let batch_id = backend.create_batch(&pending.seed)?;
        let batch = Batch::new(batch_id, &pending.seed, max_context);

        // Decode the seed so history, converter cursor, and throttle start
        // from where the prompt left off.
        let mut converter = NoteConverter::new(config.converter);
        {
            let mut history = shared
                .history
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let mut notes = Vec::new();
            for (i, &token) in pending.seed.iter().enumerate() {
                history.push_token(token);
                notes.clear();
                converter.process_token(&tokenizer, token, &mut notes);
                for &note in &notes {
                    history.append_note(note, i);
                }
            }
        }
        shared
            .clock
            .note_generated(shared.clock.lib_to_playback(converter.current_tick()));
        info!(
            seed_tokens = pending.seed.len(),
            vocab = tokenizer.vocab_size(),
            "generation worker initialized"
        );

        Ok(Self {
            shared,
            config,
            backend,
            tokenizer,
            groups,
            grammar,
            batch,
            converter,
        })
    }

    fn generate(&mut self) {
        loop {
            if self.shared.flags.is_shutdown() {
                return;
            }
            if let Some(target) = self.shared.flags.take_rewind() {
                if let Err(err) = self.apply_rewind(target) {
                    self.shared.record_error(err);
                    return;
                }
                continue;
            }
            if self.shared.clock.should_sleep() {
                // Fully blocking: playback advances, rewinds, policy swaps,
                // and shutdown all notify the gate.
                self.shared.state.set(WorkerState::Paused);
                self.shared.gate.wait();
                self.shared.state.set(WorkerState::Generating);
                continue;
            }

            match self.step() {
                Ok(true) => {}
                Ok(false) => {
                    // No sampling policy installed yet.
                    self.shared.gate.wait_timeout(self.config.idle_wait);
                }
                Err(err) => {
                    self.shared.record_error(err);
                    return;
                }
            }
        }
    }

    /// One inference/sample/append iteration. `Ok(false)` means no sampler
    /// is installed and nothing happened.
    ///
    /// The policy is taken out of its slot under the mutex and invoked with
    /// the mutex released, so `set_sampling_policy` never blocks behind a
    /// sampling step. A replacement installed mid-step wins: the old policy
    /// is dropped instead of being put back.
    fn step(&mut self) -> Result<bool, WorkerError> {
        let Some(mut policy) = self
            .shared
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(false);
        };

        let sampled = self.sample_once(policy.as_mut());

        {
            let mut slot = self
                .shared
                .sampler
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(policy);
            }
        }
        let token = sampled?;

        // A rewind posted after sampling started invalidates this token.
        if self.shared.flags.take_ignore() {
            debug!(token, "discarding token sampled across a rewind");
            return Ok(true);
        }

        let mut notes = Vec::new();
        {
            let mut history = self
                .shared
                .history
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            history.push_token(token);
            self.batch.push(token);
            let token_index = history.token_len() - 1;
            self.converter.process_token(&self.tokenizer, token, &mut notes);
            for &note in &notes {
                history.append_note(note, token_index);
            }
        }
        self.shared.clock.note_generated(
            self.shared
                .clock
                .lib_to_playback(self.converter.current_tick()),
        );
        self.grammar.advance(self.tokenizer.token_category(token));

        let callbacks = self.shared.callbacks();
        if let Some(on_token) = &callbacks.on_token_generated {
            on_token(token);
        }
        if let Some(on_note) = &callbacks.on_note_generated {
            for &note in &notes {
                on_note(note);
            }
        }
        Ok(true)
    }

    /// Runs one inference pass and one sampling decision. No shared mutex is
    /// held here; only the history read lock, for the duration of the
    /// sampling call.
    fn sample_once(&mut self, policy: &mut dyn SamplingPolicy) -> Result<Token, WorkerError> {
        let (_, window) = self.batch.trimmed_context();
        let mut logits = self.backend.inference_step(self.batch.id(), window)?;
        let history = self
            .shared
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let token = policy.sample(SampleContext {
            logits: &mut logits,
            group: self.grammar.active_group(&self.groups),
            history: &history,
            oracle: &self.tokenizer,
        })?;
        Ok(token)
    }

    fn apply_rewind(&mut self, lib_target: i64) -> Result<(), WorkerError> {
        let truncation = {
            let mut history = self
                .shared
                .history
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            history.truncate_from_tick(lib_target)
        };
        let Some(t) = truncation else {
            debug!(lib_target, "rewind target beyond generated material; nothing to do");
            return Ok(());
        };

        self.batch.truncate(t.token_len);
        self.backend.rewind_batch(self.batch.id(), t.resolved_tick)?;
        self.converter.reset_to(t.resolved_tick);
        self.shared
            .clock
            .set_last_generated(self.shared.clock.lib_to_playback(t.resolved_tick));
        self.grammar.resync(self.batch.last_token(), &self.tokenizer);
        info!(
            lib_target,
            tokens = t.token_len,
            notes = t.note_len,
            "rewind applied"
        );

        if let Some(on_cache_removed) = self.shared.callbacks().on_cache_removed {
            on_cache_removed(t.resolved_tick);
        }
        Ok(())
    }

    /// Backend teardown in reverse order of creation.
    fn teardown(&mut self) {
        self.backend.destroy_batch(self.batch.id());
    }
}
