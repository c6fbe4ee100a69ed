//! # Fermata
//!
//! Real-time streaming MIDI generation from autoregressive token models.
//!
//! ## Overview
//!
//! This library runs an autoregressive music model ahead of a real-time
//! consumer: a dedicated generation thread keeps producing tokens, decodes
//! them into timed notes, and a playback thread drains those notes as its
//! clock advances. The two sides coordinate through atomics and short
//! critical sections, so the playback side never blocks on inference.
//!
//! Key components include:
//!
//! - A generation worker owning the produce/decode loop and its lifecycle
//! - A grammar-constrained top-k / top-p sampling pipeline with musical
//!   penalties (scale, pitch range, repetition)
//! - A rewind protocol that discards and regenerates material past a target
//!   tick when the musical context changes mid-stream
//! - A clock bridge translating model ticks into consumer playback ticks and
//!   throttling generation to a bounded look-ahead window
//!
//! ## Architecture
//!
//! ### Backend Trait
//!
//! The [`InferenceBackend`] trait defines the interface any model runtime
//! must satisfy: load weights, score next-token logits for a context, and
//! honor cache rewinds. The worker stays independent of how inference
//! actually runs.
//!
//! ### Sampling
//!
//! The [`SamplingPolicy`] trait turns raw logits into the next token. The
//! stock [`LogitPipeline`] restricts candidates to the grammar's active
//! [`RangeGroup`] before selection, so an illegal token can never be
//! sampled.
//!
//! ### Threading
//!
//! One generation thread per [`GenerationWorker`]; every control-surface
//! method is safe to call from a real-time playback thread.

mod batch;
mod history;
mod note;
mod range_group;

pub mod backend;
pub mod clock;
pub mod error;
pub mod sampling;
pub mod scales;
pub mod tokenizer;
pub mod worker;

pub use backend::{BatchId, InferenceBackend};
pub use clock::{ClockBridge, ClockConfig};
pub use error::{BackendError, SampleError, Stage, TokenizerError, WorkerError};
pub use history::{GenerationHistory, Truncation};
pub use note::Note;
pub use range_group::{Range, RangeGroup};
pub use sampling::{LogitPipeline, SampleContext, SamplerConfig, SamplingPolicy};
pub use tokenizer::{
    ConverterConfig, MidiTokenizer, NoteConverter, Symbol, SymbolId, Token, TokenCategory,
    TokenCategoryOracle, TokenizerConfig,
};
pub use worker::{GenerationWorker, WorkerConfig, WorkerState};
